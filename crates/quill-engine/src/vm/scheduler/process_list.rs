//! Process list and group scheduling

use super::SchedulerEvent;
use crate::config::EngineConfig;
use crate::vm::context::ObjectId;
use crate::vm::defaults::NO_PROCESS_GROUP;
use crate::vm::interpreter::{Process, ProcessId, ProcessKind, ProcessObserver, ProcessState};
use crate::vm::sync::MutexListRef;
use crate::vm::VmError;
use crossbeam::channel::{unbounded, Receiver, Sender};
use tracing::{debug, trace, warn};

/// Owner of all processes
///
/// The backing sequence is kept sorted ascending by priority; processes of
/// equal priority keep their relative order.
pub struct ProcessList {
    processes: Vec<Process>,
    next_process_id: u32,
    next_group_id: u32,
    config: EngineConfig,
    mutexes: MutexListRef,
    subscribers: Vec<Sender<SchedulerEvent>>,
}

impl ProcessList {
    /// Create an empty list with the default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an empty list
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            processes: Vec::new(),
            next_process_id: 1,
            next_group_id: 1,
            config,
            mutexes: MutexListRef::detached(),
            subscribers: Vec::new(),
        }
    }

    /// Create an empty list whose processes lock through `mutexes`
    pub fn with_mutexes(config: EngineConfig, mutexes: MutexListRef) -> Self {
        Self {
            mutexes,
            ..Self::with_config(config)
        }
    }

    /// Configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Lock registry handle given to new processes
    pub fn mutex_list(&self) -> &MutexListRef {
        &self.mutexes
    }

    /// Attach a lock registry to this list and every existing process
    pub fn set_mutex_list(&mut self, mutexes: MutexListRef) {
        for process in &mut self.processes {
            process.set_mutex_list(mutexes.clone());
        }
        self.mutexes = mutexes;
    }

    /// Receive scheduler events from now on
    pub fn subscribe(&mut self) -> Receiver<SchedulerEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers.push(sender);
        receiver
    }

    fn emit(&mut self, event: SchedulerEvent) {
        trace!(?event, "scheduler event");
        self.subscribers.retain(|s| s.send(event).is_ok());
    }

    // ========================================================================
    // Creation and lookup
    // ========================================================================

    /// Create a suspended process
    pub fn create(&mut self, name: &str) -> &mut Process {
        let id = ProcessId::from_u32(self.next_process_id);
        self.next_process_id += 1;

        let mut process = Process::new(id, name);
        process.set_priority(self.config.default_priority);
        process.set_limits(self.config.limits);
        process.set_mutex_list(self.mutexes.clone());

        let index = self
            .processes
            .partition_point(|p| p.priority() <= process.priority());
        self.processes.insert(index, process);
        debug!(process = %id, name, "process created");
        &mut self.processes[index]
    }

    /// Allocate a fresh process group id
    pub fn allocate_process_group(&mut self) -> u32 {
        let group = self.next_group_id;
        self.next_group_id += 1;
        group
    }

    /// All processes in scheduling order
    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    /// Number of processes
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Check if the list has no processes
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Find a process
    pub fn get_process_by_id(&self, id: ProcessId) -> Option<&Process> {
        self.processes.iter().find(|p| p.id() == id)
    }

    /// Find a process for modification
    pub fn get_process_by_id_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.id() == id)
    }

    /// Find the first unfinished process of `kind` invoked by `object`
    pub fn get_process_by_object(&self, object: ObjectId, kind: ProcessKind) -> Option<&Process> {
        self.processes.iter().find(|p| {
            p.kind() == kind && !p.state().is_terminal() && p.invoking_object() == Some(object)
        })
    }

    /// The process currently running, if any
    pub fn running_process(&self) -> Option<ProcessId> {
        self.processes
            .iter()
            .find(|p| p.state() == ProcessState::Running)
            .map(Process::id)
    }

    fn index_of(&self, id: ProcessId) -> Option<usize> {
        self.processes.iter().position(|p| p.id() == id)
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Hand the group's slot to its first runnable member
    ///
    /// Emits [`SchedulerEvent::ProcessGroupFinished`] if there is none.
    /// Group 0 means "no group": it is never started and never finishes.
    pub fn start_process_group(&mut self, group: u32) {
        if group == NO_PROCESS_GROUP {
            return;
        }
        let next = self
            .processes
            .iter_mut()
            .find(|p| p.process_group_id() == group && p.state() == ProcessState::Runnable);
        match next {
            Some(process) => {
                debug!(group, process = %process.id(), "group advanced");
                process.set_state(ProcessState::Running);
            }
            None => {
                debug!(group, "group finished");
                self.emit(SchedulerEvent::ProcessGroupFinished(group));
            }
        }
    }

    /// Run processes until none is running
    ///
    /// Each time the running process gives up control its group is
    /// advanced, unless it is waiting, which blocks the group.
    pub fn run(&mut self, mut observer: Option<&mut dyn ProcessObserver>) {
        while let Some(index) = self
            .processes
            .iter()
            .position(|p| p.state() == ProcessState::Running)
        {
            let process = &mut self.processes[index];
            process.run(observer.as_mut().map(|o| &mut **o as &mut dyn ProcessObserver));
            let group = process.process_group_id();

            match process.state() {
                ProcessState::Waiting => {}
                ProcessState::Suspended
                | ProcessState::Frozen
                | ProcessState::Ended
                | ProcessState::Terminated
                | ProcessState::Failed => self.start_process_group(group),
                ProcessState::Runnable | ProcessState::Running => {
                    warn!(
                        process = %process.id(),
                        state = ?process.state(),
                        "process returned to the scheduler while still active"
                    );
                    process.force_failure("Process returned while still active");
                    self.start_process_group(group);
                }
            }
        }
    }

    /// Move a process, and every process sharing its group, to `group`
    ///
    /// A suspended or frozen process cannot be joined itself, but other
    /// members of its group move along whatever their state.
    pub fn join_process(&mut self, id: ProcessId, group: u32) -> bool {
        let Some(process) = self.get_process_by_id(id) else {
            return false;
        };
        if !joinable(process.state()) {
            debug!(process = %id, state = ?process.state(), "join refused");
            return false;
        }
        let old_group = process.process_group_id();
        for p in &mut self.processes {
            let shares_group =
                old_group != NO_PROCESS_GROUP && p.process_group_id() == old_group;
            if p.id() == id || shares_group {
                p.set_process_group_id(group);
            }
        }
        true
    }

    /// Make a suspended or runnable process runnable in `group`
    pub fn resume_process(&mut self, id: ProcessId, group: u32) -> bool {
        let Some(process) = self.get_process_by_id_mut(id) else {
            return false;
        };
        match process.state() {
            ProcessState::Suspended | ProcessState::Runnable => {
                process.set_state(ProcessState::Runnable);
                process.set_process_group_id(group);
                debug!(process = %id, group, "process resumed");
                true
            }
            state => {
                debug!(process = %id, ?state, "resume refused");
                false
            }
        }
    }

    /// Make every suspended (or ungrouped runnable) process runnable in
    /// `group`; returns how many were moved
    pub fn resume_suspended_processes(&mut self, group: u32) -> usize {
        let mut moved = 0;
        for process in &mut self.processes {
            let eligible = match process.state() {
                ProcessState::Suspended => true,
                ProcessState::Runnable => process.process_group_id() == NO_PROCESS_GROUP,
                _ => false,
            };
            if eligible {
                process.set_state(ProcessState::Runnable);
                process.set_process_group_id(group);
                moved += 1;
            }
        }
        debug!(group, moved, "suspended processes resumed");
        moved
    }

    /// Let a waiting process run again in the slot it holds
    pub fn continue_process(&mut self, id: ProcessId) -> bool {
        match self.get_process_by_id_mut(id) {
            Some(process) if process.state() == ProcessState::Waiting => {
                process.set_state(ProcessState::Running);
                true
            }
            _ => false,
        }
    }

    /// Continue a waiting process by raising `message` inside it
    pub fn continue_process_with_failure(&mut self, id: ProcessId, message: &str) -> bool {
        match self.get_process_by_id_mut(id) {
            Some(process) if process.state() == ProcessState::Waiting => {
                process.set_pending_error(VmError::UserError(message.to_string()));
                process.set_state(ProcessState::Running);
                true
            }
            _ => false,
        }
    }

    /// Terminate a process without running any more of its code
    ///
    /// Any process, finished ones included, ends up `Terminated`. A running
    /// or waiting process held its group's slot, so the group is advanced.
    /// Returns false only for an unknown id.
    pub fn terminate_process(&mut self, id: ProcessId) -> bool {
        let Some(process) = self.get_process_by_id_mut(id) else {
            return false;
        };
        let state = process.state();
        let group = process.process_group_id();
        process.terminate();
        if matches!(state, ProcessState::Running | ProcessState::Waiting) {
            self.start_process_group(group);
        }
        true
    }

    /// Restore priority order after a process's priority changed
    ///
    /// The process moves past neighbours with strictly higher (or, moving
    /// back, strictly lower) priority only.
    pub fn handle_priority_change(&mut self, id: ProcessId) {
        let Some(mut index) = self.index_of(id) else {
            return;
        };
        let priority = self.processes[index].priority();
        while index > 0 && self.processes[index - 1].priority() > priority {
            self.processes.swap(index - 1, index);
            index -= 1;
        }
        while index + 1 < self.processes.len() && self.processes[index + 1].priority() < priority {
            self.processes.swap(index, index + 1);
            index += 1;
        }
    }

    /// Set a process's priority and reorder
    pub fn set_priority(&mut self, id: ProcessId, priority: i32) -> bool {
        match self.get_process_by_id_mut(id) {
            Some(process) => {
                process.set_priority(priority);
                self.handle_priority_change(id);
                true
            }
            None => false,
        }
    }

    /// Drop every finished process; returns how many were removed
    pub fn remove_terminated_processes(&mut self) -> usize {
        let (finished, active): (Vec<Process>, Vec<Process>) = std::mem::take(&mut self.processes)
            .into_iter()
            .partition(|p| p.state().is_terminal());
        self.processes = active;

        for process in &finished {
            if let Some(object) = process.invoking_object() {
                self.emit(SchedulerEvent::InvokingObjectChanged(object));
            }
        }
        if !finished.is_empty() {
            debug!(removed = finished.len(), "finished processes removed");
        }
        finished.len()
    }
}

fn joinable(state: ProcessState) -> bool {
    !matches!(state, ProcessState::Suspended | ProcessState::Frozen)
}
