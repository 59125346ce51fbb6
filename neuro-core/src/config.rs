//! Runtime configuration, loaded from TOML.
//!
//! ```toml
//! [model]
//! kind = "deepseek-r1"
//! path = "/models/deepseek.bin"
//! memory_limit_bytes = 2147483648
//!
//! [model.defaults]
//! temperature = 0.7
//! top_k = 40
//!
//! [tasks]
//! max_wall_clock_ms = 60000
//!
//! [sandbox]
//! timeout_ms = 30000
//! ```
//!
//! Every section and field is optional; missing values take their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};
use crate::generation::GenerationParams;
use crate::sandbox::SandboxConfig;
use crate::task::{TaskLimits, MAX_TASK_CAPACITY};
use crate::tokenizer::FIRST_WORD_ID;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    #[default]
    DeepseekR1,
    Custom,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::DeepseekR1 => write!(f, "deepseek-r1"),
            ModelKind::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub kind: ModelKind,
    /// Weight file. No model is loaded when unset.
    pub path: Option<PathBuf>,
    pub memory_limit_bytes: u64,
    /// Accepted for compatibility; inference always runs on the CPU.
    pub use_gpu: bool,
    pub num_threads: u32,
    pub vocab_size: u32,
    /// Vocabulary file, one word per line. The built-in vocabulary is used when unset.
    pub tokenizer_path: Option<PathBuf>,
    pub max_sequence_length: usize,
    /// Fixed sampler seed for reproducible output.
    pub seed: Option<u64>,
    pub defaults: GenerationParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::DeepseekR1,
            path: None,
            memory_limit_bytes: 2 * GIB,
            use_gpu: false,
            num_threads: 4,
            vocab_size: 32_000,
            tokenizer_path: None,
            max_sequence_length: 4096,
            seed: None,
            defaults: GenerationParams::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub model: ModelConfig,
    pub tasks: TaskLimits,
    pub sandbox: SandboxConfig,
}

impl CoreConfig {
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: CoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.model.vocab_size <= FIRST_WORD_ID {
            return Err(CoreError::Config(format!(
                "model.vocab_size must exceed {}",
                FIRST_WORD_ID
            )));
        }
        if self.model.memory_limit_bytes == 0 {
            return Err(CoreError::Config(
                "model.memory_limit_bytes must be positive".to_string(),
            ));
        }
        self.model
            .defaults
            .validate()
            .map_err(|e| CoreError::Config(format!("model.defaults: {}", e)))?;

        if self.tasks.capacity == 0 || self.tasks.capacity > MAX_TASK_CAPACITY {
            return Err(CoreError::Config(format!(
                "tasks.capacity must be 1..={}",
                MAX_TASK_CAPACITY
            )));
        }
        if self.tasks.wait_poll_interval_ms == 0 {
            return Err(CoreError::Config(
                "tasks.wait_poll_interval_ms must be positive".to_string(),
            ));
        }
        self.sandbox
            .default_caps
            .validate()
            .map_err(|e| CoreError::Config(format!("sandbox.default_caps: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = CoreConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.tasks.capacity, 64);
        assert_eq!(config.tasks.max_wall_clock_ms, 60_000);
        assert_eq!(config.tasks.max_input_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config = CoreConfig::from_toml_str(
            r#"
            [model]
            kind = "custom"
            path = "/models/tiny.bin"
            seed = 9

            [model.defaults]
            temperature = 0.2
            top_k = 5

            [sandbox]
            timeout_ms = 0

            [sandbox.default_caps]
            max_output_bytes = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.model.kind, ModelKind::Custom);
        assert_eq!(config.model.seed, Some(9));
        assert_eq!(config.model.defaults.top_k, 5);
        assert_eq!(config.model.defaults.top_p, 0.9);
        assert_eq!(config.sandbox.timeout_ms, 0);
        assert_eq!(config.sandbox.default_caps.max_output_bytes, 4096);
        assert_eq!(config.sandbox.default_caps.cpu_percent, 50);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = CoreConfig::from_toml_str("[tasks]\ncapacity = 0").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));

        let err = CoreConfig::from_toml_str("[model.defaults]\ntop_p = 3.0").unwrap_err();
        assert!(err.to_string().contains("model.defaults"));

        let err = CoreConfig::from_toml_str("[model]\nkind = \"gpt\"").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
