//! `NeuroCore`: the entry point that ties the task table, the generation engine and the sandbox
//! together.
//!
//! A `NeuroCore` is a cheap handle; clones share one task table, one model and one set of health
//! counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{CoreConfig, ModelKind};
use crate::error::{CoreError, CoreResult};
use crate::generation::{GeneratedText, GenerationEngine, GenerationParams, LoadedModel};
use crate::handlers::{self, Services};
use crate::metrics::{HealthMetrics, SystemMetrics};
use crate::sandbox::{CapturedOutput, SandboxCaps, SandboxExecutor};
use crate::snapshot::{self, SnapshotInfo};
use crate::task::{
    TaskFlags, TaskHandler, TaskId, TaskManager, TaskPriority, TaskSnapshot, TaskState, TaskType,
};
use crate::tokenizer::Tokenizer;

/// What is currently loaded, as reported by [`NeuroCore::model_info`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub kind: ModelKind,
    pub path: Option<PathBuf>,
    pub loaded: bool,
    pub size_bytes: usize,
    pub loaded_at: Option<DateTime<Utc>>,
    pub vocab_size: u32,
    pub known_words: usize,
    pub max_sequence_length: usize,
    pub defaults: GenerationParams,
}

#[derive(Debug, Clone, Default)]
struct LoadRecord {
    path: Option<PathBuf>,
    loaded_at: Option<DateTime<Utc>>,
}

struct Inner {
    config: CoreConfig,
    tokenizer: Tokenizer,
    tasks: TaskManager,
    services: Arc<Services>,
    load: Mutex<LoadRecord>,
}

#[derive(Clone)]
pub struct NeuroCore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NeuroCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeuroCore")
            .field("tasks", &self.inner.tasks.len())
            .field("model_loaded", &self.is_model_loaded())
            .finish()
    }
}

impl NeuroCore {
    /// Validates the configuration, builds the tokenizer and loads the model when a path is set.
    pub fn init(config: CoreConfig) -> CoreResult<Self> {
        config.validate()?;
        let model = &config.model;
        let tokenizer = match &model.tokenizer_path {
            Some(path) => Tokenizer::from_file(path, model.vocab_size, model.max_sequence_length)?,
            None => Tokenizer::builtin(model.vocab_size, model.max_sequence_length)?,
        };

        let mut load = LoadRecord::default();
        let engine = match &model.path {
            Some(path) => {
                let loaded = LoadedModel::load(model, &tokenizer)?;
                load = LoadRecord {
                    path: Some(path.clone()),
                    loaded_at: Some(Utc::now()),
                };
                Some(GenerationEngine::new(
                    Box::new(loaded),
                    tokenizer.clone(),
                    model.seed,
                )?)
            }
            None => {
                warn!("No model path configured, generation tasks will fail until a state is loaded");
                None
            }
        };

        let services = Arc::new(Services::new(
            engine,
            model.defaults.clone(),
            SandboxExecutor::new(config.sandbox.clone()),
        ));
        let tasks = TaskManager::new(config.tasks.clone());
        handlers::register_builtin(&tasks, &services);

        info!(
            kind = %model.kind,
            vocab_size = model.vocab_size,
            capacity = config.tasks.capacity,
            model_loaded = load.path.is_some(),
            "Neuro core initialized"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                tokenizer,
                tasks,
                services,
                load: Mutex::new(load),
            }),
        })
    }

    /// Cancels and frees every task and unloads the model. The handle stays usable.
    pub fn shutdown(&self) {
        let released = self.inner.tasks.clear();
        let unloaded = self.inner.services.engine().take().is_some();
        *self.lock_load() = LoadRecord::default();
        info!(released, unloaded, "Neuro core shut down");
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    fn lock_load(&self) -> std::sync::MutexGuard<'_, LoadRecord> {
        self.inner.load.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_model_loaded(&self) -> bool {
        self.inner.services.engine().is_some()
    }

    // Tasks

    pub fn create_task(
        &self,
        task_type: TaskType,
        name: &str,
        description: &str,
        priority: TaskPriority,
        flags: TaskFlags,
        input: &[u8],
    ) -> CoreResult<TaskId> {
        self.inner
            .tasks
            .create(task_type, name, description, priority, flags, input)
    }

    /// Runs the task on the calling thread. See [`TaskManager::start`].
    pub fn start_task(&self, id: TaskId) -> CoreResult<TaskState> {
        let result = self.inner.tasks.start(id);
        match &result {
            Ok(TaskState::Completed) => self.inner.services.health.record_task(true),
            Ok(_) => {}
            // Rejected before anything ran.
            Err(CoreError::NotFound(_))
            | Err(CoreError::AlreadyRunning(_))
            | Err(CoreError::AlreadyTerminal { .. }) => {}
            Err(_) => self.inner.services.health.record_task(false),
        }
        result
    }

    pub fn cancel_task(&self, id: TaskId) -> CoreResult<()> {
        self.inner.tasks.cancel(id)
    }

    pub fn delete_task(&self, id: TaskId) -> CoreResult<()> {
        self.inner.tasks.delete(id)
    }

    pub fn get_task_info(&self, id: TaskId) -> CoreResult<TaskSnapshot> {
        self.inner.tasks.info(id)
    }

    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.inner.tasks.list()
    }

    /// Copies a completed task's output into `buf` and returns its length.
    pub fn get_task_result(&self, id: TaskId, buf: &mut [u8]) -> CoreResult<usize> {
        self.inner.tasks.result(id, buf)
    }

    pub fn task_output(&self, id: TaskId) -> CoreResult<Vec<u8>> {
        self.inner.tasks.output(id)
    }

    /// Waits for a terminal state. `timeout_ms == 0` waits forever.
    pub fn wait_for_task(&self, id: TaskId, timeout_ms: u64) -> CoreResult<TaskState> {
        self.inner
            .tasks
            .wait(id, Duration::from_millis(timeout_ms))
    }

    pub fn register_handler(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        self.inner.tasks.register_handler(task_type, handler);
    }

    // Inference and execution

    pub fn generate_text(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> CoreResult<GeneratedText> {
        self.inner.services.generate(prompt, params)
    }

    /// Generation parameters used when a caller does not supply its own.
    pub fn default_params(&self) -> GenerationParams {
        self.inner.services.defaults()
    }

    /// Replaces the default generation parameters after validating them.
    pub fn set_model_parameters(&self, params: GenerationParams) -> CoreResult<()> {
        params.validate()?;
        info!(
            temperature = params.temperature,
            top_k = params.top_k,
            top_p = params.top_p,
            max_tokens = params.max_tokens,
            "Default generation parameters updated"
        );
        self.inner.services.set_defaults(params);
        Ok(())
    }

    /// Runs `source` in the sandbox. `caps` falls back to the configured defaults.
    pub fn execute_code(
        &self,
        source: &str,
        language: &str,
        caps: Option<&SandboxCaps>,
    ) -> CoreResult<CapturedOutput> {
        self.inner.services.execute(source, language, caps)
    }

    pub fn generate_code(&self, request: &str) -> CoreResult<String> {
        handlers::generate_code(&self.inner.services, request)
    }

    pub fn optimize_code(&self, code: &str, level: u8) -> CoreResult<String> {
        handlers::optimize_code(&self.inner.services, code, level)
    }

    pub fn analyze_code(&self, code: &str) -> CoreResult<String> {
        handlers::analyze_code(&self.inner.services, code)
    }

    pub fn process_natural_language(&self, text: &str, flags: TaskFlags) -> CoreResult<String> {
        handlers::process_natural_language(&self.inner.services, text, flags)
    }

    pub fn monitor_system_health(&self) -> String {
        handlers::monitor_system(&self.inner.services)
    }

    pub fn optimize_system(&self, target: &str) -> String {
        handlers::optimize_system(target)
    }

    pub fn analyze_network(&self, filter: &str) -> String {
        handlers::analyze_network(filter)
    }

    // Model state and health

    pub fn model_info(&self) -> ModelInfo {
        let size_bytes = self
            .inner
            .services
            .engine()
            .as_ref()
            .and_then(|engine| engine.model().state_bytes().map(<[u8]>::len))
            .unwrap_or(0);
        let load = self.lock_load().clone();
        ModelInfo {
            kind: self.inner.config.model.kind,
            loaded: load.loaded_at.is_some(),
            path: load.path,
            size_bytes,
            loaded_at: load.loaded_at,
            vocab_size: self.inner.tokenizer.vocab_size(),
            known_words: self.inner.tokenizer.known_words(),
            max_sequence_length: self.inner.tokenizer.max_length(),
            defaults: self.default_params(),
        }
    }

    pub fn health(&self) -> HealthMetrics {
        self.inner
            .services
            .health
            .snapshot(&SystemMetrics::collect())
    }

    /// Drops every task, clears the health counters and restores the configured defaults.
    /// The loaded model is kept.
    pub fn reset(&self) {
        let released = self.inner.tasks.clear();
        self.inner.services.health.reset();
        self.inner
            .services
            .set_defaults(self.inner.config.model.defaults.clone());
        info!(released, "Neuro core reset");
    }

    pub fn save_state(&self, path: &Path) -> CoreResult<SnapshotInfo> {
        let guard = self.inner.services.engine();
        let engine = guard.as_ref().ok_or(CoreError::ModelNotLoaded)?;
        snapshot::save(path, engine.model())
    }

    /// Replaces the active model with the blob at `path`.
    pub fn load_state(&self, path: &Path) -> CoreResult<SnapshotInfo> {
        let (model, snapshot) = snapshot::load(
            path,
            self.inner.config.model.memory_limit_bytes,
            &self.inner.tokenizer,
        )?;
        let engine = GenerationEngine::new(
            Box::new(model),
            self.inner.tokenizer.clone(),
            self.inner.config.model.seed,
        )?;
        *self.inner.services.engine() = Some(engine);
        *self.lock_load() = LoadRecord {
            path: Some(path.to_path_buf()),
            loaded_at: Some(Utc::now()),
        };
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config_with_model(dir: &Path) -> CoreConfig {
        let path = dir.join("model.bin");
        std::fs::write(&path, (0..=255u8).cycle().take(4096).collect::<Vec<u8>>()).unwrap();
        let mut config = CoreConfig::default();
        config.model.path = Some(path);
        config.model.vocab_size = 2_000;
        config.model.seed = Some(42);
        config
    }

    #[test]
    fn test_init_without_model() {
        let core = NeuroCore::init(CoreConfig::default()).unwrap();
        assert!(!core.is_model_loaded());
        assert!(matches!(
            core.generate_text("hi", &GenerationParams::default()),
            Err(CoreError::ModelNotLoaded)
        ));
        assert!(matches!(
            core.save_state(Path::new("unused.bin")),
            Err(CoreError::ModelNotLoaded)
        ));
        assert!(!core.model_info().loaded);
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let mut config = CoreConfig::default();
        config.tasks.capacity = 0;
        assert!(matches!(
            NeuroCore::init(config),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn test_model_info_and_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let core = NeuroCore::init(config_with_model(dir.path())).unwrap();
        let info = core.model_info();
        assert!(info.loaded);
        assert_eq!(info.size_bytes, 4096);
        assert_eq!(info.vocab_size, 2_000);

        let saved = core.save_state(&dir.path().join("snap.bin")).unwrap();
        core.shutdown();
        assert!(!core.is_model_loaded());

        let loaded = core.load_state(&saved.path).unwrap();
        assert_eq!(loaded.sha256, saved.sha256);
        assert!(core.is_model_loaded());
        assert_eq!(core.model_info().path, Some(saved.path));
    }

    #[test]
    fn test_set_model_parameters_validates() {
        let core = NeuroCore::init(CoreConfig::default()).unwrap();
        let bad = GenerationParams {
            max_tokens: 0,
            ..Default::default()
        };
        assert!(core.set_model_parameters(bad).is_err());

        let good = GenerationParams {
            temperature: 0.2,
            ..Default::default()
        };
        core.set_model_parameters(good.clone()).unwrap();
        assert_eq!(core.default_params(), good);
        core.reset();
        assert_eq!(core.default_params(), GenerationParams::default());
    }

    #[test]
    fn test_clones_share_the_task_table() {
        let core = NeuroCore::init(CoreConfig::default()).unwrap();
        let other = core.clone();
        let id = core
            .create_task(
                TaskType::SystemOptimization,
                "opt",
                "",
                TaskPriority::Normal,
                TaskFlags::NONE,
                b"memory",
            )
            .unwrap();
        assert_eq!(other.start_task(id).unwrap(), TaskState::Completed);
        assert_eq!(core.list_tasks().len(), 1);
        assert_eq!(core.health().error_count, 0);
    }

    #[test]
    fn test_failed_task_counts_as_error() {
        let core = NeuroCore::init(CoreConfig::default()).unwrap();
        let id = core
            .create_task(
                TaskType::NaturalLanguage,
                "nlp",
                "",
                TaskPriority::Normal,
                TaskFlags::SUMMARIZATION,
                b"some text",
            )
            .unwrap();
        assert!(core.start_task(id).is_err());
        assert!(matches!(
            core.start_task(id),
            Err(CoreError::AlreadyTerminal { .. })
        ));
        assert_eq!(core.health().error_count, 1);
    }
}
