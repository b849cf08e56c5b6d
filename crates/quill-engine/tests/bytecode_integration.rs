//! Integration tests for code object building, relocation, and compaction

use quill_engine::compiler::bytecode::{MAX_LABELS, MAX_TABLE_ENTRIES};
use quill_engine::{
    BinaryOp, CodeError, CodeObject, Jump, JumpCondition, Opcode, Process, ProcessId,
    ProcessState, Value,
};

/// i = 0; while i < 3 { i = i + 1 }; return i
fn counting_loop() -> CodeObject {
    let mut code = CodeObject::new();
    code.set_subroutine_name("COUNT");
    let i = code.add_local_variable("i").unwrap();
    let top = code.make_label().unwrap();
    let end = code.make_label().unwrap();

    code.add_push_literal(Value::from(0)).unwrap();
    code.add_instruction(Opcode::PopLocal(i));
    code.add_label(top);
    code.add_instruction(Opcode::PushLocal(i));
    code.add_push_literal(Value::from(3)).unwrap();
    code.add_instruction(Opcode::Binary(BinaryOp::Lt));
    code.add_instruction(Opcode::Jump(Jump::to_label(JumpCondition::IfFalse, end).popping()));
    code.add_instruction(Opcode::PushLocal(i));
    code.add_push_literal(Value::from(1)).unwrap();
    code.add_instruction(Opcode::Binary(BinaryOp::Add));
    code.add_instruction(Opcode::PopLocal(i));
    code.add_jump(JumpCondition::Always, top);
    code.add_label(end);
    code.add_instruction(Opcode::PushLocal(i));
    code.add_instruction(Opcode::Return(1));
    code
}

fn run_for_result(code: CodeObject) -> Option<i32> {
    let mut process = Process::new(ProcessId::from_u32(1), "test");
    process.push_frame(code.into_ref(), true).unwrap();
    process.run(None);
    assert_eq!(process.state(), ProcessState::Ended);
    process.result().and_then(Value::as_int)
}

// ============================================================================
// Relocation
// ============================================================================

#[test]
fn test_relocate_two_labels() {
    let mut code = CodeObject::new();
    let l0 = code.make_label().unwrap();
    let l1 = code.make_label().unwrap();
    code.add_jump(JumpCondition::IfFalse, l1); // 0
    code.add_label(l0); // 1
    code.add_jump(JumpCondition::Always, l0); // 2
    code.add_label(l1); // 3

    code.relocate();

    assert_eq!(code.num_labels(), 0);
    assert!(!code.needs_relocation());
    assert_eq!(
        code.instructions(),
        &[
            Opcode::Jump(Jump::to_index(JumpCondition::IfFalse, 3)),
            Opcode::Nop,
            Opcode::Jump(Jump::to_index(JumpCondition::Always, 1)),
            Opcode::Nop,
        ]
    );
}

#[test]
fn test_loop_runs_relocated() {
    assert_eq!(run_for_result(counting_loop()), Some(3));
}

#[test]
fn test_loop_runs_compacted() {
    let mut code = counting_loop();
    let before = code.len();
    code.compact();
    assert!(code.len() < before);
    assert!(!code.instructions().contains(&Opcode::Nop));
    assert_eq!(run_for_result(code), Some(3));
}

#[test]
fn test_appended_code_runs() {
    let mut head = CodeObject::new();
    let x = head.add_local_variable("x").unwrap();
    head.add_push_literal(Value::from(10)).unwrap();
    head.add_instruction(Opcode::PopLocal(x));

    let mut tail = CodeObject::new();
    let y = tail.add_local_variable("y").unwrap();
    let x_in_tail = tail.add_local_variable("x").unwrap();
    tail.add_push_literal(Value::from(5)).unwrap();
    tail.add_instruction(Opcode::PopLocal(y));
    tail.add_instruction(Opcode::PushLocal(x_in_tail));
    tail.add_instruction(Opcode::PushLocal(y));
    tail.add_instruction(Opcode::Binary(BinaryOp::Sub));
    tail.add_instruction(Opcode::Return(1));

    head.append(&tail).unwrap();
    assert_eq!(head.local_names(), &["x".to_string(), "y".to_string()]);
    assert_eq!(run_for_result(head), Some(5));
}

// ============================================================================
// Tables
// ============================================================================

#[test]
fn test_name_table_cap() {
    let mut code = CodeObject::new();
    for i in 0..MAX_TABLE_ENTRIES {
        code.add_name(&format!("n{}", i)).unwrap();
    }
    assert_eq!(code.add_name("n0").unwrap(), 0);
    assert_eq!(code.add_name("overflow"), Err(CodeError::TooManyNames));
}

#[test]
fn test_label_cap() {
    let mut code = CodeObject::new();
    for _ in 0..MAX_LABELS {
        code.make_label().unwrap();
    }
    assert_eq!(code.make_label(), Err(CodeError::TooManyLabels));
}

#[test]
fn test_has_user_call() {
    let mut code = counting_loop();
    assert!(!code.has_user_call());
    code.add_instruction(Opcode::Call {
        args: 0,
        want_result: true,
    });
    assert!(code.has_user_call());
}
