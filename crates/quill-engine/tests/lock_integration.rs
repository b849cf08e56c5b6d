//! Integration tests for named locks shared between processes

use quill_engine::{
    CodeObject, CodeRef, EngineConfig, JumpCondition, LockValue, MutexList, Opcode, ProcessId,
    ProcessList, ProcessState, SpecialOp, Value,
};

/// Take lock `name`, keep it in a local, then wait
fn holder(name: &str, note: &str) -> CodeRef {
    let mut code = CodeObject::new();
    code.set_subroutine_name("HOLD");
    let held = code.add_local_variable("held").unwrap();
    code.add_push_literal(Value::from(name)).unwrap();
    code.add_push_literal(Value::from(note)).unwrap();
    code.add_instruction(Opcode::Special(SpecialOp::Lock));
    code.add_instruction(Opcode::PopLocal(held));
    code.add_instruction(Opcode::Special(SpecialOp::Suspend));
    code.into_ref()
}

/// Try to take lock `name`; return the lock, or the error message
fn taker(name: &str, note: &str) -> CodeRef {
    let mut code = CodeObject::new();
    code.set_subroutine_name("TAKE");
    let handler = code.make_label().unwrap();
    code.add_jump(JumpCondition::Catch, handler);
    code.add_push_literal(Value::from(name)).unwrap();
    code.add_push_literal(Value::from(note)).unwrap();
    code.add_instruction(Opcode::Special(SpecialOp::Lock));
    code.add_instruction(Opcode::Return(1));
    code.add_label(handler);
    code.add_instruction(Opcode::Return(1));
    code.into_ref()
}

fn engine() -> (MutexList, ProcessList) {
    let locks = MutexList::new();
    let list = ProcessList::with_mutexes(EngineConfig::default(), locks.handle());
    (locks, list)
}

fn start(list: &mut ProcessList, code: CodeRef) -> ProcessId {
    let process = list.create("script");
    process.push_frame(code, true).unwrap();
    let id = process.id();
    let group = list.allocate_process_group();
    list.resume_process(id, group);
    list.start_process_group(group);
    list.run(None);
    id
}

fn result(list: &ProcessList, id: ProcessId) -> Option<Value> {
    list.get_process_by_id(id).and_then(|p| p.result().cloned())
}

// ============================================================================
// Lock opcode
// ============================================================================

#[test]
fn test_lock_is_exclusive_until_holder_finishes() {
    let (locks, mut list) = engine();
    let first = start(&mut list, holder("door", "front"));
    assert_eq!(list.get_process_by_id(first).unwrap().state(), ProcessState::Waiting);

    let mutex = locks.query("door").unwrap();
    assert_eq!(mutex.owner(), Some(first));
    assert_eq!(mutex.note(), "front");
    drop(mutex);

    let second = start(&mut list, taker("door", "back"));
    assert_eq!(
        result(&list, second).as_ref().and_then(Value::as_str),
        Some("Already locked")
    );

    assert!(list.terminate_process(first));
    assert!(locks.query("door").is_none());

    let third = start(&mut list, taker("door", "back"));
    match result(&list, third) {
        Some(Value::Lock(lock)) => {
            assert_eq!(lock.mutex().name(), "door");
            assert_eq!(lock.mutex().owner(), Some(third));
        }
        other => panic!("expected a lock, got {:?}", other),
    }
}

#[test]
fn test_reaping_releases_returned_lock() {
    let (locks, mut list) = engine();
    let id = start(&mut list, taker("vault", ""));
    assert_eq!(list.get_process_by_id(id).unwrap().state(), ProcessState::Ended);
    assert_eq!(locks.query("vault").unwrap().owner(), Some(id));

    assert_eq!(list.remove_terminated_processes(), 1);
    assert!(locks.query("vault").is_none());
    assert!(locks.is_empty());
}

#[test]
fn test_lock_without_registry_is_catchable() {
    let mut list = ProcessList::new();
    let id = start(&mut list, taker("door", ""));
    let message = result(&list, id);
    assert_eq!(
        message.as_ref().and_then(Value::as_str),
        Some("Entity unavailable: lock registry")
    );
}

#[test]
fn test_registry_dropped_under_holder() {
    let (locks, mut list) = engine();
    let id = start(&mut list, holder("door", ""));
    let mutex = locks.query("door").unwrap();
    drop(locks);

    assert!(mutex.is_abandoned());
    assert_eq!(mutex.name(), "<dead>");
    assert!(!list.mutex_list().is_alive());

    list.continue_process(id);
    list.run(None);
    assert_eq!(list.get_process_by_id(id).unwrap().state(), ProcessState::Ended);
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn test_create_release_create() {
    let locks = MutexList::new();
    let owner = ProcessId::from_u32(1);

    let first = LockValue::new(locks.create("gate", "", Some(owner)).unwrap());
    assert!(locks.create("gate", "", None).is_err());
    drop(first);

    let second = locks.create("gate", "again", None).unwrap();
    assert_eq!(second.note(), "again");
    assert_eq!(second.owner(), None);
}

#[test]
fn test_load_respects_owner() {
    let locks = MutexList::new();
    let a = ProcessId::from_u32(1);
    let b = ProcessId::from_u32(2);

    let held = LockValue::new(locks.create("gate", "", Some(a)).unwrap());
    assert!(locks.load("gate", "", Some(b)).is_err());

    let again = LockValue::new(locks.load("gate", "", Some(a)).unwrap());
    assert!(again.same_lock(&held));
    assert_eq!(held.mutex().references(), 2);

    locks.disown_locks_by_process(a);
    let other = LockValue::new(locks.load("gate", "", Some(b)).unwrap());
    assert!(other.same_lock(&held));
    assert_eq!(held.mutex().owner(), Some(b));

    drop(held);
    drop(again);
    assert!(locks.query("gate").is_some());
    drop(other);
    assert!(locks.query("gate").is_none());
}

#[test]
fn test_enum_mutexes_by_owner() {
    let locks = MutexList::new();
    let a = ProcessId::from_u32(1);
    let b = ProcessId::from_u32(2);
    let _x = LockValue::new(locks.create("x", "", Some(a)).unwrap());
    let _y = LockValue::new(locks.create("y", "", Some(b)).unwrap());
    let _z = LockValue::new(locks.create("z", "", Some(a)).unwrap());

    let mut all = Vec::new();
    locks.enum_mutexes(&mut all, None);
    assert_eq!(all.len(), 3);

    let mut owned = Vec::new();
    locks.enum_mutexes(&mut owned, Some(a));
    let mut names: Vec<&str> = owned.iter().map(|m| m.name()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["x", "z"]);
}
