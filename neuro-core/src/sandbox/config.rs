use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::sandbox::resources::SandboxCaps;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub default_caps: SandboxCaps,
    /// Parent directory for per-execution scratch dirs; system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    /// Wall-clock watchdog for the child, 0 disables it.
    pub timeout_ms: u64,
    /// Apply `RLIMIT_NPROC`. Off by default since the limit counts every process of the user.
    pub enforce_process_limit: bool,
    /// Fail the spawn when a private network namespace cannot be created. When off, the child
    /// runs anyway and the result reports `network_isolated = false`.
    pub require_network_isolation: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_caps: SandboxCaps::default(),
            scratch_dir: None,
            timeout_ms: 30_000, // 30 seconds
            enforce_process_limit: false,
            require_network_isolation: true,
        }
    }
}

impl SandboxConfig {
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
