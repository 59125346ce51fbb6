use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::clock::monotonic_ms;
use crate::error::{CoreError, CoreResult};
use crate::task::table::{TaskRecord, TaskTable};
use crate::task::types::{
    truncate_to, TaskFlags, TaskId, TaskLimits, TaskPriority, TaskSnapshot, TaskState, TaskType,
    MAX_DESCRIPTION_BYTES, MAX_NAME_BYTES,
};

/// What a handler sees of the task it runs. The input is a private copy.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub id: TaskId,
    pub task_type: TaskType,
    pub name: String,
    pub priority: TaskPriority,
    pub flags: TaskFlags,
    pub input: Vec<u8>,
}

impl TaskContext {
    pub fn input_text(&self) -> CoreResult<&str> {
        std::str::from_utf8(&self.input)
            .map_err(|e| CoreError::InvalidArgument(format!("task input is not UTF-8: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub output: Vec<u8>,
    pub exit_code: i32,
}

impl TaskOutcome {
    pub fn new(output: impl Into<Vec<u8>>) -> Self {
        Self {
            output: output.into(),
            exit_code: 0,
        }
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }
}

/// Work performed for one task type.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, task: &TaskContext) -> CoreResult<TaskOutcome>;
}

impl<F> TaskHandler for F
where
    F: Fn(&TaskContext) -> CoreResult<TaskOutcome> + Send + Sync,
{
    fn handle(&self, task: &TaskContext) -> CoreResult<TaskOutcome> {
        self(task)
    }
}

/// Owns the task table and drives tasks through their state machine.
///
/// ```text
/// Created --start--> Queued --dispatch--> Running --ok--> Completed
///                                            \--error/limit--> Failed
/// {Created, Queued, Running} --cancel--> Cancelled
/// ```
///
/// `start` runs the handler on the calling thread without holding the table lock, so other
/// threads can inspect, cancel or wait on the task meanwhile.
pub struct TaskManager {
    table: Mutex<TaskTable>,
    finished: Condvar,
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
    limits: TaskLimits,
}

impl TaskManager {
    pub fn new(limits: TaskLimits) -> Self {
        Self {
            table: Mutex::new(TaskTable::new(limits.capacity)),
            finished: Condvar::new(),
            handlers: RwLock::new(HashMap::new()),
            limits,
        }
    }

    pub fn limits(&self) -> &TaskLimits {
        &self.limits
    }

    fn lock(&self) -> MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs (or replaces) the handler for `task_type`.
    pub fn register_handler(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_type, handler);
    }

    fn handler_for(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task_type)
            .cloned()
    }

    pub fn create(
        &self,
        task_type: TaskType,
        name: &str,
        description: &str,
        priority: TaskPriority,
        flags: TaskFlags,
        input: impl Into<Vec<u8>>,
    ) -> CoreResult<TaskId> {
        if name.trim().is_empty() {
            return Err(CoreError::InvalidArgument(
                "task name is empty".to_string(),
            ));
        }
        let input = input.into();
        if input.is_empty() && task_type.requires_input() {
            return Err(CoreError::InvalidArgument(format!(
                "{} tasks need a non-empty input",
                task_type
            )));
        }

        let id = self.lock().insert(|id| TaskRecord {
            id,
            task_type,
            name: truncate_to(name, MAX_NAME_BYTES),
            description: truncate_to(description, MAX_DESCRIPTION_BYTES),
            priority,
            flags,
            state: TaskState::Created,
            created_ms: monotonic_ms(),
            started_ms: None,
            completed_ms: None,
            input,
            output: None,
            exit_code: 0,
            error_message: None,
        })?;
        info!(task_id = %id, task_type = %task_type, name, "Task created");
        Ok(id)
    }

    /// Runs the task's handler to completion and returns the state it ended in: `Completed`,
    /// or `Cancelled` when it was cancelled while running. A handler or limit failure leaves
    /// the task `Failed` and is returned as the error.
    pub fn start(&self, id: TaskId) -> CoreResult<TaskState> {
        let (context, handler, started) = {
            let mut table = self.lock();
            let record = table.get_mut(id)?;
            match record.state {
                TaskState::Created | TaskState::Queued => {}
                TaskState::Running => return Err(CoreError::AlreadyRunning(id)),
                state => return Err(CoreError::AlreadyTerminal { id, state }),
            }
            record.state = TaskState::Queued;
            let started = monotonic_ms().max(record.created_ms);
            record.started_ms = Some(started);

            if let Err(e) = self.check_limits(record, started) {
                record.fail(e.to_string());
                self.finished.notify_all();
                warn!(task_id = %id, "Task rejected at dispatch: {}", e);
                return Err(e);
            }
            let Some(handler) = self.handler_for(record.task_type) else {
                let e = CoreError::InvalidArgument(format!(
                    "no handler registered for {} tasks",
                    record.task_type
                ));
                record.fail(e.to_string());
                self.finished.notify_all();
                return Err(e);
            };

            record.state = TaskState::Running;
            let context = TaskContext {
                id,
                task_type: record.task_type,
                name: record.name.clone(),
                priority: record.priority,
                flags: record.flags,
                input: record.input.clone(),
            };
            (context, handler, started)
        };

        debug!(task_id = %id, task_type = %context.task_type, "Dispatching task");
        let clock = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&context)))
            .unwrap_or_else(|_| {
                Err(CoreError::InvalidArgument(
                    "task handler panicked".to_string(),
                ))
            });
        let elapsed_ms = clock.elapsed().as_millis() as u64;

        let mut table = self.lock();
        let record = match table.get_mut(id) {
            Ok(record) => record,
            Err(_) => {
                warn!(task_id = %id, "Task was removed while running, result dropped");
                return Ok(TaskState::Cancelled);
            }
        };
        if record.state == TaskState::Cancelled {
            info!(task_id = %id, elapsed_ms, "Task cancelled while running, result dropped");
            return Ok(TaskState::Cancelled);
        }

        let outcome = match result {
            Ok(outcome) => self.check_limits(record, started).map(|_| outcome),
            Err(e) => Err(e),
        };
        let state = match outcome {
            Ok(outcome) => {
                record.complete(outcome.output, outcome.exit_code);
                info!(task_id = %id, elapsed_ms, "Task completed");
                Ok(TaskState::Completed)
            }
            Err(e) => {
                record.fail(e.to_string());
                warn!(task_id = %id, elapsed_ms, "Task failed: {}", e);
                Err(e)
            }
        };
        self.finished.notify_all();
        state
    }

    fn check_limits(&self, record: &TaskRecord, started_ms: u64) -> CoreResult<()> {
        if record.input.len() > self.limits.max_input_bytes {
            return Err(CoreError::LimitExceeded(format!(
                "input is {} bytes, ceiling is {}",
                record.input.len(),
                self.limits.max_input_bytes
            )));
        }
        let elapsed = monotonic_ms().saturating_sub(started_ms);
        if elapsed > self.limits.max_wall_clock_ms {
            return Err(CoreError::LimitExceeded(format!(
                "ran for {}ms, budget is {}ms",
                elapsed, self.limits.max_wall_clock_ms
            )));
        }
        Ok(())
    }

    /// Moves a non-terminal task to `Cancelled`. A handler already running is not interrupted.
    pub fn cancel(&self, id: TaskId) -> CoreResult<()> {
        let mut table = self.lock();
        let record = table.get_mut(id)?;
        if record.state.is_terminal() {
            return Err(CoreError::AlreadyTerminal {
                id,
                state: record.state,
            });
        }
        let was = record.state;
        record.cancel();
        self.finished.notify_all();
        info!(task_id = %id, from = %was, "Task cancelled");
        Ok(())
    }

    pub fn info(&self, id: TaskId) -> CoreResult<TaskSnapshot> {
        Ok(self.lock().get(id)?.snapshot())
    }

    /// Copies the output of a completed task into `buf`, returning its length.
    pub fn result(&self, id: TaskId, buf: &mut [u8]) -> CoreResult<usize> {
        let table = self.lock();
        let output = completed_output(table.get(id)?)?;
        if buf.len() < output.len() {
            return Err(CoreError::BufferTooSmall {
                required: output.len(),
                available: buf.len(),
            });
        }
        buf[..output.len()].copy_from_slice(output);
        Ok(output.len())
    }

    /// Owned copy of a completed task's output.
    pub fn output(&self, id: TaskId) -> CoreResult<Vec<u8>> {
        let table = self.lock();
        completed_output(table.get(id)?).map(<[u8]>::to_vec)
    }

    /// Blocks until the task is terminal and returns that state. A zero timeout waits forever.
    /// Reaching the timeout leaves the task untouched.
    pub fn wait(&self, id: TaskId, timeout: Duration) -> CoreResult<TaskState> {
        let begun = Instant::now();
        let deadline = (!timeout.is_zero()).then(|| begun + timeout);
        let poll = Duration::from_millis(self.limits.wait_poll_interval_ms.max(1));

        let mut table = self.lock();
        loop {
            let state = table.get(id)?.state;
            if state.is_terminal() {
                return Ok(state);
            }
            let mut slice = poll;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(CoreError::Timeout {
                        waited_ms: begun.elapsed().as_millis() as u64,
                    });
                }
                slice = slice.min(deadline - now);
            }
            table = match self.finished.wait_timeout(table, slice) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Frees the slot of a task that is not running.
    pub fn delete(&self, id: TaskId) -> CoreResult<()> {
        let mut table = self.lock();
        if table.get(id)?.state == TaskState::Running {
            return Err(CoreError::AlreadyRunning(id));
        }
        table.remove(id)?;
        debug!(task_id = %id, "Task deleted");
        Ok(())
    }

    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.lock()
            .records()
            .into_iter()
            .map(TaskRecord::snapshot)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every non-terminal task.
    pub fn cancel_all(&self) -> usize {
        let mut table = self.lock();
        let mut cancelled = 0;
        for record in table.records_mut() {
            if !record.state.is_terminal() {
                record.cancel();
                cancelled += 1;
            }
        }
        self.finished.notify_all();
        cancelled
    }

    /// Cancels everything, then releases every slot.
    pub fn clear(&self) -> usize {
        self.cancel_all();
        let released = self.lock().clear();
        self.finished.notify_all();
        released
    }
}

fn completed_output(record: &TaskRecord) -> CoreResult<&[u8]> {
    match (&record.output, record.state) {
        (Some(output), TaskState::Completed) => Ok(output),
        (_, state) => Err(CoreError::NotCompleted {
            id: record.id,
            state,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn handler<F>(f: F) -> Arc<dyn TaskHandler>
    where
        F: Fn(&TaskContext) -> CoreResult<TaskOutcome> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn manager() -> Arc<TaskManager> {
        let manager = Arc::new(TaskManager::new(TaskLimits::default()));
        manager.register_handler(
            TaskType::Custom,
            handler(|task| Ok(TaskOutcome::new(task.input.clone()))),
        );
        manager
    }

    fn create(manager: &TaskManager, input: &[u8]) -> TaskId {
        manager
            .create(
                TaskType::Custom,
                "t1",
                "d",
                TaskPriority::Normal,
                TaskFlags::NONE,
                input,
            )
            .unwrap()
    }

    #[test]
    fn test_create_reports_created_state() {
        let manager = manager();
        let before = monotonic_ms();
        let id = create(&manager, b"abc");
        let info = manager.info(id).unwrap();
        assert_eq!(info.state, TaskState::Created);
        assert!(info.created_ms >= before);
        assert_eq!(info.input_size, 3);
        assert_ne!(id.as_u64(), 0);
    }

    #[test]
    fn test_create_validates_arguments() {
        let manager = manager();
        let empty_name = manager.create(
            TaskType::Custom,
            " ",
            "",
            TaskPriority::Low,
            TaskFlags::NONE,
            Vec::new(),
        );
        assert!(matches!(empty_name, Err(CoreError::InvalidArgument(_))));

        let empty_input = manager.create(
            TaskType::CodeAnalysis,
            "a",
            "",
            TaskPriority::Low,
            TaskFlags::NONE,
            Vec::new(),
        );
        assert!(matches!(empty_input, Err(CoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_long_names_are_truncated() {
        let manager = manager();
        let long = "n".repeat(200);
        let id = manager
            .create(
                TaskType::Custom,
                &long,
                &long.repeat(3),
                TaskPriority::Low,
                TaskFlags::NONE,
                b"x".to_vec(),
            )
            .unwrap();
        let info = manager.info(id).unwrap();
        assert_eq!(info.name.len(), MAX_NAME_BYTES);
        assert_eq!(info.description.len(), MAX_DESCRIPTION_BYTES);
    }

    #[test]
    fn test_full_table_rejects_new_tasks() {
        let manager = TaskManager::new(TaskLimits {
            capacity: 2,
            ..Default::default()
        });
        for _ in 0..2 {
            create(&manager, b"x");
        }
        let third = manager.create(
            TaskType::Custom,
            "t",
            "",
            TaskPriority::Low,
            TaskFlags::NONE,
            b"x".to_vec(),
        );
        assert!(matches!(third, Err(CoreError::NoFreeSlot { capacity: 2 })));
    }

    #[test]
    fn test_start_completes_and_second_start_is_rejected() {
        let manager = manager();
        let id = create(&manager, b"payload");
        assert_eq!(manager.start(id).unwrap(), TaskState::Completed);
        assert!(matches!(
            manager.start(id),
            Err(CoreError::AlreadyTerminal {
                state: TaskState::Completed,
                ..
            })
        ));

        let info = manager.info(id).unwrap();
        assert!(info.completed_ms.unwrap() >= info.started_ms.unwrap());
        assert!(info.started_ms.unwrap() >= info.created_ms);
        assert_eq!(manager.output(id).unwrap(), b"payload".to_vec());
    }

    #[test]
    fn test_handler_runs_once() {
        let manager = TaskManager::new(TaskLimits::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        manager.register_handler(
            TaskType::Custom,
            handler(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(TaskOutcome::new("done"))
            }),
        );
        let id = create(&manager, b"x");
        manager.start(id).unwrap();
        let _ = manager.start(id);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_error_fails_task() {
        let manager = TaskManager::new(TaskLimits::default());
        manager.register_handler(
            TaskType::Custom,
            handler(|_| Err(CoreError::ModelNotLoaded)),
        );
        let id = create(&manager, b"x");
        assert!(matches!(manager.start(id), Err(CoreError::ModelNotLoaded)));
        let info = manager.info(id).unwrap();
        assert_eq!(info.state, TaskState::Failed);
        assert_eq!(info.exit_code, -1);
        assert!(info.error_message.unwrap().contains("no model"));
        assert!(matches!(
            manager.output(id),
            Err(CoreError::NotCompleted { .. })
        ));
    }

    #[test]
    fn test_missing_handler_fails_task() {
        let manager = TaskManager::new(TaskLimits::default());
        let id = create(&manager, b"x");
        assert!(matches!(
            manager.start(id),
            Err(CoreError::InvalidArgument(_))
        ));
        assert_eq!(manager.info(id).unwrap().state, TaskState::Failed);
    }

    #[test]
    fn test_oversized_input_fails_without_running_handler() {
        let manager = TaskManager::new(TaskLimits {
            max_input_bytes: 4,
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        manager.register_handler(
            TaskType::Custom,
            handler(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(TaskOutcome::new(""))
            }),
        );
        let id = create(&manager, b"too large");
        assert!(matches!(
            manager.start(id),
            Err(CoreError::LimitExceeded(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.info(id).unwrap().state, TaskState::Failed);
    }

    #[test]
    fn test_overrunning_handler_fails_with_limit() {
        let manager = TaskManager::new(TaskLimits {
            max_wall_clock_ms: 5,
            ..Default::default()
        });
        manager.register_handler(
            TaskType::Custom,
            handler(|_| {
                thread::sleep(Duration::from_millis(50));
                Ok(TaskOutcome::new("late"))
            }),
        );
        let id = create(&manager, b"x");
        assert!(matches!(
            manager.start(id),
            Err(CoreError::LimitExceeded(_))
        ));
        assert_eq!(manager.info(id).unwrap().state, TaskState::Failed);
    }

    #[test]
    fn test_panicking_handler_fails_task() {
        let manager = TaskManager::new(TaskLimits::default());
        manager.register_handler(
            TaskType::Custom,
            handler(|_| panic!("boom")),
        );
        let id = create(&manager, b"x");
        assert!(manager.start(id).is_err());
        assert_eq!(manager.info(id).unwrap().state, TaskState::Failed);
    }

    #[test]
    fn test_cancel_rules() {
        let manager = manager();
        let id = create(&manager, b"x");
        manager.cancel(id).unwrap();
        assert_eq!(manager.info(id).unwrap().state, TaskState::Cancelled);
        assert!(matches!(
            manager.cancel(id),
            Err(CoreError::AlreadyTerminal { .. })
        ));
        assert!(matches!(
            manager.start(id),
            Err(CoreError::AlreadyTerminal { .. })
        ));

        let done = create(&manager, b"x");
        manager.start(done).unwrap();
        assert!(matches!(
            manager.cancel(done),
            Err(CoreError::AlreadyTerminal {
                state: TaskState::Completed,
                ..
            })
        ));
    }

    #[test]
    fn test_result_reports_required_size() {
        let manager = manager();
        let id = create(&manager, b"0123456789");
        manager.start(id).unwrap();

        let mut small = [0u8; 4];
        match manager.result(id, &mut small) {
            Err(CoreError::BufferTooSmall {
                required,
                available,
            }) => {
                assert_eq!(required, 10);
                assert_eq!(available, 4);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(small, [0u8; 4]);

        let mut buf = [0u8; 16];
        assert_eq!(manager.result(id, &mut buf).unwrap(), 10);
        assert_eq!(&buf[..10], b"0123456789");
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let manager = manager();
        let ghost = TaskId::from_raw(0xdead_00);
        assert!(matches!(manager.info(ghost), Err(CoreError::NotFound(_))));
        assert!(matches!(manager.start(ghost), Err(CoreError::NotFound(_))));
        assert!(matches!(manager.cancel(ghost), Err(CoreError::NotFound(_))));
        assert!(matches!(
            manager.wait(ghost, Duration::from_millis(5)),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_wait_times_out_while_running_then_completes() {
        let manager = Arc::new(TaskManager::new(TaskLimits::default()));
        manager.register_handler(
            TaskType::Custom,
            handler(|_| {
                thread::sleep(Duration::from_millis(300));
                Ok(TaskOutcome::new("slow"))
            }),
        );
        let id = create(&manager, b"x");
        let runner = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.start(id))
        };
        while manager.info(id).unwrap().state != TaskState::Running {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(matches!(
            manager.wait(id, Duration::from_millis(10)),
            Err(CoreError::Timeout { .. })
        ));
        assert_eq!(manager.info(id).unwrap().state, TaskState::Running);

        assert_eq!(
            manager.wait(id, Duration::ZERO).unwrap(),
            TaskState::Completed
        );
        assert_eq!(runner.join().unwrap().unwrap(), TaskState::Completed);
    }

    #[test]
    fn test_cancel_while_running_discards_result() {
        let manager = Arc::new(TaskManager::new(TaskLimits::default()));
        manager.register_handler(
            TaskType::Custom,
            handler(|_| {
                thread::sleep(Duration::from_millis(100));
                Ok(TaskOutcome::new("ignored"))
            }),
        );
        let id = create(&manager, b"x");
        let runner = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.start(id))
        };
        while manager.info(id).unwrap().state != TaskState::Running {
            thread::sleep(Duration::from_millis(1));
        }
        manager.cancel(id).unwrap();
        assert_eq!(
            manager.wait(id, Duration::from_secs(5)).unwrap(),
            TaskState::Cancelled
        );

        assert_eq!(runner.join().unwrap().unwrap(), TaskState::Cancelled);
        let info = manager.info(id).unwrap();
        assert_eq!(info.state, TaskState::Cancelled);
        assert_eq!(info.output_size, 0);
    }

    #[test]
    fn test_delete_and_list() {
        let manager = manager();
        let a = create(&manager, b"a");
        let b = create(&manager, b"b");
        manager.delete(a).unwrap();
        let ids: Vec<TaskId> = manager.list().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![b]);
        assert!(matches!(manager.info(a), Err(CoreError::NotFound(_))));
        assert_eq!(manager.clear(), 1);
        assert!(manager.is_empty());
    }
}
