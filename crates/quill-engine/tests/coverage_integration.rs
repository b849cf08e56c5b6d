//! Integration tests for lcov coverage collected from scheduled processes

use quill_engine::{
    CodeObject, CodeRef, CoverageRecorder, Opcode, ProcessList, ProcessObserver, Value,
};
use std::fs;

fn sub(file: &str, name: &str, line: u32) -> CodeRef {
    let mut code = CodeObject::new();
    code.set_file_name(file);
    code.set_subroutine_name(name);
    code.add_line_number(line);
    code.add_push_literal(Value::from(5)).unwrap();
    code.add_instruction(Opcode::Drop(1));
    code.into_ref()
}

/// MAIN calls SUB on line 1, pushes a value on line 2; UNUSED is only a literal
fn program() -> CodeRef {
    let mut code = CodeObject::new();
    code.set_file_name("main.q");
    code.set_subroutine_name("MAIN");
    code.add_line_number(1);
    code.add_push_literal(Value::from(sub("main.q", "SUB", 10))).unwrap();
    code.add_instruction(Opcode::Call {
        args: 0,
        want_result: false,
    });
    code.add_literal(Value::from(sub("lib.q", "UNUSED", 3))).unwrap();
    code.add_line_number(2);
    code.add_push_literal(Value::from(1)).unwrap();
    code.into_ref()
}

fn run(recorder: &mut CoverageRecorder, code: CodeRef) {
    let mut list = ProcessList::new();
    let process = list.create("main");
    process.push_frame(code, false).unwrap();
    let id = process.id();
    let group = list.allocate_process_group();
    list.resume_process(id, group);
    list.start_process_group(group);
    list.run(Some(recorder as &mut dyn ProcessObserver));
}

// ============================================================================
// Coverage files
// ============================================================================

#[test]
fn test_save_to_file() {
    let code = program();
    let mut recorder = CoverageRecorder::new();
    recorder.add_bco(&code);
    assert_eq!(recorder.registered(), 3);

    run(&mut recorder, code);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coverage.info");
    recorder.save_to_file(&path, "integration").unwrap();

    let expected = "\
TN:integration
SF:lib.q
FN:3,UNUSED
FNDA:0,UNUSED
FNF:1
FNH:0
DA:3,0
end_of_record
TN:integration
SF:main.q
FN:1,MAIN
FNDA:1,MAIN
FN:10,SUB
FNDA:1,SUB
FNF:2
FNH:2
DA:1,1
DA:2,1
DA:10,1
end_of_record
";
    assert_eq!(fs::read_to_string(&path).unwrap(), expected);
}

#[test]
fn test_code_registered_while_running() {
    let code = program();
    let mut recorder = CoverageRecorder::new();
    run(&mut recorder, code.clone());
    assert!(recorder.is_registered(&code));

    let mut out = Vec::new();
    recorder.save(&mut out, "lazy").unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("FNDA:1,MAIN\n"));
    assert!(text.contains("FNDA:1,SUB\n"));
    assert!(text.contains("FNDA:0,UNUSED\n"));
}

#[test]
fn test_save_to_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("coverage.info");
    let recorder = CoverageRecorder::new();
    assert!(recorder.save_to_file(&path, "none").is_err());
}
