//! Task lifecycle: a fixed-capacity table, the task state machine, and handler dispatch.
//!
//! ```text
//! ┌──────────────┐ create ┌─────────────────────────────┐
//! │   caller     │───────▶│ TaskTable (arena, N slots)  │
//! │              │ start  │  slot 0: TaskRecord         │
//! │              │───────▶│  slot 1: TaskRecord ...     │
//! │              │ wait   └──────────────┬──────────────┘
//! │              │◀── Condvar ───────────┤ dispatch by TaskType
//! └──────────────┘                       ▼
//!                               Arc<dyn TaskHandler>
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let manager = TaskManager::new(TaskLimits::default());
//! manager.register_handler(TaskType::Custom, Arc::new(my_handler));
//! let id = manager.create(TaskType::Custom, "t1", "demo", TaskPriority::Normal,
//!                         TaskFlags::NONE, b"input".to_vec())?;
//! manager.start(id)?;
//! let output = manager.output(id)?;
//! ```

mod manager;
mod table;
mod types;

pub use manager::{TaskContext, TaskHandler, TaskManager, TaskOutcome};
pub use types::{
    TaskFlags, TaskId, TaskLimits, TaskPriority, TaskSnapshot, TaskState, TaskType,
    MAX_DESCRIPTION_BYTES, MAX_NAME_BYTES, MAX_TASK_CAPACITY,
};
