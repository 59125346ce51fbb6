use crate::clock::monotonic_ms;
use crate::error::{CoreError, CoreResult};
use crate::task::types::{
    TaskFlags, TaskId, TaskPriority, TaskSnapshot, TaskState, TaskType, MAX_TASK_CAPACITY,
};

/// One task as stored in the table. Input and output buffers are owned by the record.
#[derive(Debug)]
pub(crate) struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub name: String,
    pub description: String,
    pub priority: TaskPriority,
    pub flags: TaskFlags,
    pub state: TaskState,
    pub created_ms: u64,
    pub started_ms: Option<u64>,
    pub completed_ms: Option<u64>,
    pub input: Vec<u8>,
    /// Present only once the task has completed.
    pub output: Option<Vec<u8>>,
    pub exit_code: i32,
    pub error_message: Option<String>,
}

impl TaskRecord {
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            task_type: self.task_type,
            name: self.name.clone(),
            description: self.description.clone(),
            priority: self.priority,
            flags: self.flags,
            state: self.state,
            created_ms: self.created_ms,
            started_ms: self.started_ms,
            completed_ms: self.completed_ms,
            input_size: self.input.len(),
            output_size: self.output.as_ref().map(Vec::len).unwrap_or(0),
            exit_code: self.exit_code,
            error_message: self.error_message.clone(),
        }
    }

    /// Completion time, never earlier than the start or creation time.
    fn finish_time(&self) -> u64 {
        monotonic_ms()
            .max(self.started_ms.unwrap_or(0))
            .max(self.created_ms)
    }

    pub fn complete(&mut self, output: Vec<u8>, exit_code: i32) {
        self.state = TaskState::Completed;
        self.output = Some(output);
        self.exit_code = exit_code;
        self.completed_ms = Some(self.finish_time());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = TaskState::Failed;
        self.output = None;
        self.exit_code = -1;
        self.error_message = Some(message.into());
        self.completed_ms = Some(self.finish_time());
    }

    pub fn cancel(&mut self) {
        self.state = TaskState::Cancelled;
        self.output = None;
        self.completed_ms = Some(self.finish_time());
    }
}

/// Fixed-capacity arena of task records addressed by generation-checked ids.
#[derive(Debug)]
pub(crate) struct TaskTable {
    slots: Vec<Option<TaskRecord>>,
    next_seq: u64,
    len: usize,
}

impl TaskTable {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_TASK_CAPACITY);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            next_seq: 1,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Claims a free slot and stores the record built for the new id.
    pub fn insert<F>(&mut self, build: F) -> CoreResult<TaskId>
    where
        F: FnOnce(TaskId) -> TaskRecord,
    {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(CoreError::NoFreeSlot {
                capacity: self.capacity(),
            })?;
        let id = TaskId::new(self.next_seq, slot);
        self.next_seq += 1;
        self.slots[slot] = Some(build(id));
        self.len += 1;
        Ok(id)
    }

    pub fn get(&self, id: TaskId) -> CoreResult<&TaskRecord> {
        match self.slots.get(id.slot()) {
            Some(Some(record)) if record.id == id => Ok(record),
            _ => Err(CoreError::NotFound(id)),
        }
    }

    pub fn get_mut(&mut self, id: TaskId) -> CoreResult<&mut TaskRecord> {
        match self.slots.get_mut(id.slot()) {
            Some(Some(record)) if record.id == id => Ok(record),
            _ => Err(CoreError::NotFound(id)),
        }
    }

    pub fn remove(&mut self, id: TaskId) -> CoreResult<TaskRecord> {
        self.get(id)?;
        let record = self.slots[id.slot()].take().ok_or(CoreError::NotFound(id))?;
        self.len -= 1;
        Ok(record)
    }

    /// Records in ascending id order.
    pub fn records(&self) -> Vec<&TaskRecord> {
        let mut records: Vec<&TaskRecord> = self.slots.iter().flatten().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut TaskRecord> {
        self.slots.iter_mut().flatten()
    }

    /// Drops every record, returning how many were held.
    pub fn clear(&mut self) -> usize {
        let held = self.len;
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.len = 0;
        held
    }
}
