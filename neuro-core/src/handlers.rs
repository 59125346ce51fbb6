//! Built-in task handlers and the shared services they run against.
//!
//! | task type           | work                                             |
//! |---------------------|--------------------------------------------------|
//! | code-generation     | prompt the model, keep the fenced code block     |
//! | code-optimization   | prompt the model with the code and a level       |
//! | code-analysis       | static warnings, then the model's analysis       |
//! | nlp                 | prompt prefix picked by the NLP flag             |
//! | system-monitoring   | procfs readings and model health                 |
//! | system-optimization | recommendations for the input target             |
//! | network-analysis    | `/proc/net/dev` summary filtered by the input    |
//! | code-execution      | JSON request run by the sandbox executor         |

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::debug;

use crate::analysis::{
    detect_language_from_code, detect_language_from_prompt, extract_code_block, static_warnings,
};
use crate::error::{CoreError, CoreResult};
use crate::generation::{FinishReason, GeneratedText, GenerationEngine, GenerationParams};
use crate::metrics::{self, HealthTracker, NetworkStats, SystemMetrics};
use crate::sandbox::{CapturedOutput, SandboxCaps, SandboxExecutor};
use crate::task::{TaskContext, TaskFlags, TaskManager, TaskOutcome, TaskType};

pub const DEFAULT_OPTIMIZATION_LEVEL: u8 = 3;

/// State shared by the core facade and every built-in handler.
pub(crate) struct Services {
    engine: Mutex<Option<GenerationEngine>>,
    defaults: RwLock<GenerationParams>,
    pub sandbox: SandboxExecutor,
    pub health: HealthTracker,
}

impl Services {
    pub fn new(
        engine: Option<GenerationEngine>,
        defaults: GenerationParams,
        sandbox: SandboxExecutor,
    ) -> Self {
        Self {
            engine: Mutex::new(engine),
            defaults: RwLock::new(defaults),
            sandbox,
            health: HealthTracker::default(),
        }
    }

    pub fn engine(&self) -> MutexGuard<'_, Option<GenerationEngine>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn defaults(&self) -> GenerationParams {
        self.defaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_defaults(&self, params: GenerationParams) {
        *self.defaults.write().unwrap_or_else(PoisonError::into_inner) = params;
    }

    /// Runs one generation on the loaded model and feeds the health counters.
    pub fn generate(&self, prompt: &str, params: &GenerationParams) -> CoreResult<GeneratedText> {
        let mut guard = self.engine();
        let engine = guard.as_mut().ok_or(CoreError::ModelNotLoaded)?;
        let out = engine.generate(prompt, params)?;
        let unknown = out
            .generated
            .iter()
            .filter(|id| engine.tokenizer().is_hashed(**id))
            .count();
        self.health.record_generation(
            out.elapsed_ms,
            out.generated.len(),
            unknown,
            out.finish_reason != FinishReason::MaxTokens,
        );
        Ok(out)
    }

    pub fn execute(
        &self,
        source: &str,
        language: &str,
        caps: Option<&SandboxCaps>,
    ) -> CoreResult<CapturedOutput> {
        let caps = caps.unwrap_or(&self.sandbox.config().default_caps);
        self.sandbox.execute(source, language, caps)
    }
}

fn code_generation_params() -> GenerationParams {
    GenerationParams {
        max_tokens: 1024,
        temperature: 0.7,
        top_p: 0.9,
        top_k: 40,
        repetition_penalty: 1.1,
        ..Default::default()
    }
    .with_stop(["```", "###"])
}

fn code_optimization_params() -> GenerationParams {
    GenerationParams {
        max_tokens: 2048,
        temperature: 0.5,
        top_p: 0.95,
        top_k: 50,
        repetition_penalty: 1.2,
        ..Default::default()
    }
}

fn code_analysis_params() -> GenerationParams {
    GenerationParams {
        max_tokens: 2048,
        temperature: 0.3,
        top_p: 0.95,
        top_k: 40,
        repetition_penalty: 1.1,
        ..Default::default()
    }
}

pub(crate) fn generate_code(services: &Services, request: &str) -> CoreResult<String> {
    let language = detect_language_from_prompt(request);
    let prompt = format!(
        "Write {} code for the following request.\n{}\n```{}\n",
        language,
        request,
        language.as_str()
    );
    let out = services.generate(&prompt, &code_generation_params())?;
    Ok(extract_code_block(&out.text))
}

pub(crate) fn optimize_code(services: &Services, code: &str, level: u8) -> CoreResult<String> {
    if !(1..=5).contains(&level) {
        return Err(CoreError::InvalidArgument(format!(
            "optimization level must be 1..=5, got {}",
            level
        )));
    }
    let language = detect_language_from_code(code);
    let prompt = format!(
        "Optimize the following {} code at level {} of 5 for speed and clarity.\n```{}\n{}\n```\nOptimized:\n",
        language,
        level,
        language.as_str(),
        code
    );
    let out = services.generate(&prompt, &code_optimization_params())?;
    Ok(extract_code_block(&out.text))
}

pub(crate) fn analyze_code(services: &Services, code: &str) -> CoreResult<String> {
    let language = detect_language_from_code(code);
    let warnings = static_warnings(code, language);
    services.health.record_warnings(warnings.len());

    let prompt = format!(
        "Analyze the following {} code for bugs, security issues and performance problems.\n```{}\n{}\n```\nAnalysis:\n",
        language,
        language.as_str(),
        code
    );
    let out = services.generate(&prompt, &code_analysis_params())?;

    let mut report = String::new();
    for warning in &warnings {
        report.push_str(warning);
        report.push('\n');
    }
    if !warnings.is_empty() {
        report.push('\n');
    }
    report.push_str("Analysis (");
    report.push_str(language.as_str());
    report.push_str("):\n");
    report.push_str(out.text.trim());
    Ok(report)
}

/// Instruction placed in front of NLP input. The lowest set NLP flag wins.
pub fn nlp_instruction(flags: TaskFlags) -> &'static str {
    if flags.contains(TaskFlags::SENTIMENT) {
        "Analyze the sentiment of the following text:"
    } else if flags.contains(TaskFlags::ENTITY) {
        "Extract the named entities from the following text:"
    } else if flags.contains(TaskFlags::SUMMARIZATION) {
        "Summarize the following text:"
    } else if flags.contains(TaskFlags::TRANSLATION) {
        "Translate the following text:"
    } else if flags.contains(TaskFlags::QUESTION_ANSWERING) {
        "Answer the following question:"
    } else {
        "Respond to the following text:"
    }
}

pub(crate) fn process_natural_language(
    services: &Services,
    text: &str,
    flags: TaskFlags,
) -> CoreResult<String> {
    let prompt = format!("{}\n{}\n", nlp_instruction(flags), text);
    let out = services.generate(&prompt, &services.defaults())?;
    Ok(out.text)
}

pub(crate) fn monitor_system(services: &Services) -> String {
    let system = SystemMetrics::collect();
    let health = services.health.snapshot(&system);
    metrics::monitoring_report(&system, &health)
}

pub(crate) fn optimize_system(target: &str) -> String {
    metrics::optimization_report(&SystemMetrics::collect(), target)
}

pub(crate) fn analyze_network(filter: &str) -> String {
    metrics::network_report(&NetworkStats::collect(), filter)
}

/// Input of a `code-execution` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caps: Option<SandboxCaps>,
}

/// The child's exit code is kept on the task; a non-zero exit still completes it.
fn run_execution_request(services: &Services, input: &[u8]) -> CoreResult<TaskOutcome> {
    let request: ExecutionRequest = serde_json::from_slice(input)?;
    let captured = services.execute(&request.source, &request.language, request.caps.as_ref())?;
    let exit_code = captured.exit_code.unwrap_or(-1);
    Ok(TaskOutcome::new(captured.output).with_exit_code(exit_code))
}

fn dispatch(services: &Services, task: &TaskContext) -> CoreResult<TaskOutcome> {
    debug!(task_id = %task.id, task_type = %task.task_type, "Running built-in handler");
    let text = match task.task_type {
        TaskType::CodeGeneration => generate_code(services, task.input_text()?)?,
        TaskType::CodeOptimization => {
            optimize_code(services, task.input_text()?, DEFAULT_OPTIMIZATION_LEVEL)?
        }
        TaskType::CodeAnalysis => analyze_code(services, task.input_text()?)?,
        TaskType::NaturalLanguage => {
            process_natural_language(services, task.input_text()?, task.flags)?
        }
        TaskType::SystemMonitoring => monitor_system(services),
        TaskType::SystemOptimization => optimize_system(task.input_text()?),
        TaskType::NetworkAnalysis => analyze_network(task.input_text()?),
        TaskType::CodeExecution => return run_execution_request(services, &task.input),
        TaskType::Custom => {
            return Err(CoreError::InvalidArgument(
                "custom tasks need a registered handler".to_string(),
            ))
        }
    };
    Ok(TaskOutcome::new(text))
}

/// Registers a handler for every task type except `Custom`.
pub(crate) fn register_builtin(manager: &TaskManager, services: &Arc<Services>) {
    for task_type in TaskType::ALL {
        if task_type == TaskType::Custom {
            continue;
        }
        let services = Arc::clone(services);
        manager.register_handler(
            task_type,
            Arc::new(move |task: &TaskContext| dispatch(&services, task)),
        );
    }
}
