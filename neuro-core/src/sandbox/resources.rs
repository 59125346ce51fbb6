use serde::{Deserialize, Serialize};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Network policy for sandboxed code. Code produced by the model never gets network access,
/// so the only representable policy is `Denied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkAccess {
    #[default]
    Denied,
}

/// Resource caps applied to one sandboxed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxCaps {
    /// Share of one CPU, 1..=100.
    pub cpu_percent: u32,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub process_limit: u32,
    pub thread_limit: u32,
    pub open_file_limit: u32,
    pub network: NetworkAccess,
    /// Ceiling on captured stdout+stderr bytes.
    pub max_output_bytes: usize,
    /// Ceiling on captured lines, 0 for unlimited.
    pub max_output_lines: usize,
}

impl Default for SandboxCaps {
    fn default() -> Self {
        Self {
            cpu_percent: 50,
            memory_bytes: 256 * MIB,
            disk_bytes: 100 * MIB,
            process_limit: 10,
            thread_limit: 20,
            open_file_limit: 100,
            network: NetworkAccess::Denied,
            max_output_bytes: MIB as usize,
            max_output_lines: 0,
        }
    }
}

impl SandboxCaps {
    /// CPU seconds granted to the child: the CPU share applied to a one-minute window.
    pub fn cpu_time(&self) -> Duration {
        let pct = u64::from(self.cpu_percent.clamp(1, 100));
        Duration::from_secs((60 * pct / 100).max(1))
    }

    /// Linux counts threads against `RLIMIT_NPROC`, so the larger of the two counts is used.
    pub fn task_limit(&self) -> u64 {
        u64::from(self.process_limit.max(self.thread_limit))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cpu_percent == 0 || self.cpu_percent > 100 {
            return Err(format!("cpu_percent must be 1..=100, got {}", self.cpu_percent));
        }
        if self.memory_bytes == 0 {
            return Err("memory_bytes must be positive".to_string());
        }
        if self.max_output_bytes == 0 {
            return Err("max_output_bytes must be positive".to_string());
        }
        if self.open_file_limit < 3 {
            return Err("open_file_limit must leave room for stdio".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_caps() {
        let caps = SandboxCaps::default();
        assert_eq!(caps.cpu_percent, 50);
        assert_eq!(caps.memory_bytes, 256 * MIB);
        assert_eq!(caps.network, NetworkAccess::Denied);
        assert_eq!(caps.cpu_time(), Duration::from_secs(30));
        assert_eq!(caps.task_limit(), 20);
        assert!(caps.validate().is_ok());
    }

    #[test]
    fn test_network_cannot_be_granted_from_toml() {
        let parsed: Result<SandboxCaps, _> = toml::from_str("network = \"allowed\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_zero_cpu_share_rejected() {
        let caps = SandboxCaps {
            cpu_percent: 0,
            ..Default::default()
        };
        assert!(caps.validate().is_err());
    }
}
