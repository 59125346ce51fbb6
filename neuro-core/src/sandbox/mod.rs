//! Sandboxed execution of model-produced code.
//!
//! Each call gets a private scratch directory, builds an argument-vector plan for the language
//! (compile then run, or interpret directly), and runs every step as a child process with:
//!
//! - stdout and stderr sharing one pipe, captured up to a byte/line ceiling
//! - rlimits for data size, file size, open files and CPU time (plus optional process count)
//! - its own session, so the whole process tree can be killed
//! - a private network namespace when the host permits one
//!
//! The scratch directory, and with it the source file and any compiled artifact, is removed
//! before `execute` returns on every path.

pub mod config;
pub mod executor;
pub mod language;
pub mod resources;

pub use config::SandboxConfig;
pub use executor::{CapturedOutput, SandboxExecutor};
pub use language::{CommandSpec, Language};
pub use resources::{NetworkAccess, SandboxCaps};
