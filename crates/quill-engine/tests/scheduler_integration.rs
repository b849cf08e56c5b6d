//! Integration tests for the process-group scheduler

use crossbeam::channel::Receiver;
use quill_engine::{
    BinaryOp, CodeObject, CodeRef, Context, ContextRef, JumpCondition, ObjectId, Opcode,
    ProcessId, ProcessKind, ProcessList, ProcessState, SchedulerEvent, SpecialOp, Value,
    VariableContext,
};

/// Appends `tag` to the shared `log` variable, optionally suspending first
fn logger(tag: &str, before: Option<SpecialOp>) -> CodeRef {
    let mut code = CodeObject::new();
    code.set_subroutine_name(tag);
    let log = code.add_name("log").unwrap();
    if let Some(op) = before {
        code.add_instruction(Opcode::Special(op));
    }
    code.add_instruction(Opcode::PushName(log));
    code.add_push_literal(Value::from(tag)).unwrap();
    code.add_instruction(Opcode::Binary(BinaryOp::Concat));
    code.add_instruction(Opcode::StoreName(log));
    code.into_ref()
}

fn spawn(list: &mut ProcessList, globals: &ContextRef, code: CodeRef, priority: i32) -> ProcessId {
    let process = list.create("worker");
    process.push_context(globals.clone());
    process.push_frame(code, false).unwrap();
    let id = process.id();
    list.set_priority(id, priority);
    id
}

fn globals() -> ContextRef {
    let globals = VariableContext::new("globals");
    globals.define("log", Value::from(""));
    globals.into_ref()
}

fn log(globals: &ContextRef) -> String {
    globals
        .lookup("log")
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}

fn drain(events: &Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
    events.try_iter().collect()
}

fn state(list: &ProcessList, id: ProcessId) -> ProcessState {
    list.get_process_by_id(id).unwrap().state()
}

// ============================================================================
// Group sequencing
// ============================================================================

#[test]
fn test_group_runs_in_priority_order() {
    let mut list = ProcessList::new();
    let events = list.subscribe();
    let globals = globals();
    let a = spawn(&mut list, &globals, logger("A", None), 60);
    let b = spawn(&mut list, &globals, logger("B", None), 40);

    let group = list.allocate_process_group();
    list.resume_process(a, group);
    list.resume_process(b, group);
    list.start_process_group(group);
    list.run(None);

    assert_eq!(log(&globals), "BA");
    assert_eq!(state(&list, a), ProcessState::Ended);
    assert_eq!(state(&list, b), ProcessState::Ended);
    assert_eq!(drain(&events), vec![SchedulerEvent::ProcessGroupFinished(group)]);
}

#[test]
fn test_waiting_blocks_group() {
    let mut list = ProcessList::new();
    let events = list.subscribe();
    let globals = globals();
    let a = spawn(&mut list, &globals, logger("A", Some(SpecialOp::Suspend)), 10);
    let b = spawn(&mut list, &globals, logger("B", None), 20);

    let group = list.allocate_process_group();
    list.resume_suspended_processes(group);
    list.start_process_group(group);
    list.run(None);

    assert_eq!(state(&list, a), ProcessState::Waiting);
    assert_eq!(state(&list, b), ProcessState::Runnable);
    assert_eq!(log(&globals), "");
    assert!(drain(&events).is_empty());

    assert!(list.continue_process(a));
    list.run(None);
    assert_eq!(log(&globals), "AB");
    assert_eq!(drain(&events), vec![SchedulerEvent::ProcessGroupFinished(group)]);
}

#[test]
fn test_stop_passes_the_slot_on() {
    let mut list = ProcessList::new();
    let globals = globals();
    let a = spawn(&mut list, &globals, logger("A", Some(SpecialOp::Stop)), 10);
    let b = spawn(&mut list, &globals, logger("B", None), 20);

    let group = list.allocate_process_group();
    list.resume_suspended_processes(group);
    list.start_process_group(group);
    list.run(None);

    assert_eq!(state(&list, a), ProcessState::Suspended);
    assert_eq!(state(&list, b), ProcessState::Ended);
    assert_eq!(log(&globals), "B");

    let group = list.allocate_process_group();
    assert!(list.resume_process(a, group));
    list.start_process_group(group);
    list.run(None);
    assert_eq!(state(&list, a), ProcessState::Ended);
    assert_eq!(log(&globals), "BA");
}

#[test]
fn test_groups_are_independent() {
    let mut list = ProcessList::new();
    let globals = globals();
    let a = spawn(&mut list, &globals, logger("A", Some(SpecialOp::Suspend)), 10);
    let b = spawn(&mut list, &globals, logger("B", None), 20);

    let first = list.allocate_process_group();
    let second = list.allocate_process_group();
    list.resume_process(a, first);
    list.resume_process(b, second);

    list.start_process_group(first);
    list.run(None);
    assert_eq!(state(&list, a), ProcessState::Waiting);

    list.start_process_group(second);
    list.run(None);
    assert_eq!(state(&list, b), ProcessState::Ended);
    assert_eq!(log(&globals), "B");
}

// ============================================================================
// Continuation and termination
// ============================================================================

#[test]
fn test_continue_with_failure_is_catchable() {
    let mut code = CodeObject::new();
    let handler = code.make_label().unwrap();
    code.add_jump(JumpCondition::Catch, handler);
    code.add_instruction(Opcode::Special(SpecialOp::Suspend));
    code.add_push_literal(Value::from("no error")).unwrap();
    code.add_instruction(Opcode::Return(1));
    code.add_label(handler);
    code.add_instruction(Opcode::Return(1));

    let mut list = ProcessList::new();
    let process = list.create("waiter");
    process.push_frame(code.into_ref(), true).unwrap();
    let id = process.id();

    let group = list.allocate_process_group();
    list.resume_process(id, group);
    list.start_process_group(group);
    list.run(None);
    assert_eq!(state(&list, id), ProcessState::Waiting);

    assert!(list.continue_process_with_failure(id, "timed out"));
    list.run(None);
    let process = list.get_process_by_id(id).unwrap();
    assert_eq!(process.state(), ProcessState::Ended);
    assert_eq!(process.result().and_then(Value::as_str), Some("timed out"));
}

#[test]
fn test_uncaught_continue_failure_fails_process() {
    let mut list = ProcessList::new();
    let globals = globals();
    let a = spawn(&mut list, &globals, logger("A", Some(SpecialOp::Suspend)), 10);
    let group = list.allocate_process_group();
    list.resume_process(a, group);
    list.start_process_group(group);
    list.run(None);

    list.continue_process_with_failure(a, "cancelled");
    list.run(None);
    let process = list.get_process_by_id(a).unwrap();
    assert_eq!(process.state(), ProcessState::Failed);
    assert_eq!(process.error().unwrap().message, "cancelled");
    assert_eq!(log(&globals), "");
}

#[test]
fn test_terminate_waiting_process_advances_group() {
    let mut list = ProcessList::new();
    let globals = globals();
    let a = spawn(&mut list, &globals, logger("A", Some(SpecialOp::Suspend)), 10);
    let b = spawn(&mut list, &globals, logger("B", None), 20);
    let group = list.allocate_process_group();
    list.resume_suspended_processes(group);
    list.start_process_group(group);
    list.run(None);
    assert_eq!(state(&list, a), ProcessState::Waiting);

    assert!(list.terminate_process(a));
    assert_eq!(list.running_process(), Some(b));
    list.run(None);
    assert_eq!(log(&globals), "B");
    assert_eq!(state(&list, a), ProcessState::Terminated);
}

// ============================================================================
// Lookup and reaping
// ============================================================================

#[test]
fn test_process_by_object_and_reaping() {
    let mut list = ProcessList::new();
    let events = list.subscribe();
    let npc = VariableContext::bound_to("npc", ObjectId(5)).into_ref();

    let mut code = CodeObject::new();
    code.add_instruction(Opcode::Special(SpecialOp::Suspend));
    let code = code.into_ref();

    let process = list.create("npc script");
    process.set_kind(ProcessKind::AutoTask);
    process.push_context(npc);
    process.push_frame(code, false).unwrap();
    let id = process.id();
    let idle = list.create("idle").id();

    let group = list.allocate_process_group();
    list.resume_process(id, group);
    list.start_process_group(group);
    list.run(None);

    let found = list.get_process_by_object(ObjectId(5), ProcessKind::AutoTask);
    assert_eq!(found.map(|p| p.id()), Some(id));
    assert!(list
        .get_process_by_object(ObjectId(5), ProcessKind::Default)
        .is_none());

    assert_eq!(list.remove_terminated_processes(), 0);
    list.continue_process(id);
    list.run(None);
    drain(&events);

    assert_eq!(list.remove_terminated_processes(), 1);
    assert_eq!(
        drain(&events),
        vec![SchedulerEvent::InvokingObjectChanged(ObjectId(5))]
    );
    assert_eq!(list.len(), 1);
    assert_eq!(list.processes()[0].id(), idle);
}
