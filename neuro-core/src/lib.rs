//! Neuro core: the AI task execution subsystem.
//!
//! - [`task`]: fixed-capacity task table, lifecycle state machine, handler dispatch
//! - [`generation`], [`tokenizer`], [`sampler`]: autoregressive text generation
//! - [`sandbox`]: compile-and-run of untrusted code in a capped child process
//! - [`NeuroCore`]: the facade that wires them together

pub mod analysis;
pub mod clock;
pub mod config;
pub mod error;
pub mod generation;
pub mod handlers;
pub mod metrics;
pub mod runtime;
pub mod sampler;
pub mod sandbox;
pub mod snapshot;
pub mod task;
pub mod tokenizer;

pub use crate::config::{CoreConfig, ModelConfig, ModelKind};
pub use crate::error::{CoreError, CoreResult, ErrorKind};
pub use crate::generation::{FinishReason, GeneratedText, GenerationEngine, GenerationParams};
pub use crate::handlers::ExecutionRequest;
pub use crate::metrics::HealthMetrics;
pub use crate::runtime::{ModelInfo, NeuroCore};
pub use crate::sandbox::{CapturedOutput, Language, SandboxCaps, SandboxConfig, SandboxExecutor};
pub use crate::snapshot::SnapshotInfo;
pub use crate::task::{
    TaskFlags, TaskHandler, TaskId, TaskPriority, TaskSnapshot, TaskState, TaskType,
};
pub use crate::tokenizer::Tokenizer;
