//! Neuro agent: command line front end for the AI task core.
//!
//! Usage:
//!   neuro-agent --model model.bin generate "write a loop in python"
//!   neuro-agent run code-analysis --input-file main.c
//!   neuro-agent exec script.py
//!   neuro-agent health --json

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use neuro_core::analysis::detect_language_from_code;
use neuro_core::{
    CoreConfig, GenerationParams, Language, NeuroCore, TaskFlags, TaskPriority, TaskState,
    TaskType,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "neuro-agent")]
#[command(about = "Neuro agent - run AI tasks, generation and sandboxed code")]
struct Args {
    /// Path to the core configuration file (TOML format)
    #[arg(long, global = true, env = "NEURO_CONFIG")]
    config: Option<PathBuf>,

    /// Model weight file, overrides `model.path` from the config
    #[arg(long, global = true, env = "NEURO_MODEL")]
    model: Option<PathBuf>,

    /// Fixed sampler seed for reproducible output
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate text from a prompt
    Generate {
        prompt: String,

        #[arg(long)]
        max_tokens: Option<usize>,

        #[arg(long)]
        temperature: Option<f32>,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        top_p: Option<f32>,

        /// Stop substring (repeatable)
        #[arg(long)]
        stop: Vec<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a task, run it and print its output
    Run {
        /// Task type, e.g. code-generation, code-analysis, nlp, system-monitoring
        task_type: String,

        /// Task input text
        input: Option<String>,

        /// Read the task input from a file instead
        #[arg(long, conflicts_with = "input")]
        input_file: Option<PathBuf>,

        #[arg(long, default_value = "cli-task")]
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value = "normal")]
        priority: String,

        /// Comma-separated flags, e.g. "sandbox,summarization"
        #[arg(long, default_value = "")]
        flags: String,
    },

    /// Run a source file in the sandbox
    Exec {
        file: PathBuf,

        /// Language tag; taken from the file extension or contents when omitted
        #[arg(long)]
        language: Option<String>,
    },

    /// Show model and system health
    Health {
        #[arg(long)]
        json: bool,
    },

    /// Show the loaded model and default generation parameters
    Info,
}

fn load_config(args: &Args) -> anyhow::Result<CoreConfig> {
    let mut config = match &args.config {
        Some(path) => CoreConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => CoreConfig::default(),
    };
    if let Some(model) = &args.model {
        config.model.path = Some(model.clone());
    }
    if args.seed.is_some() {
        config.model.seed = args.seed;
    }
    Ok(config)
}

fn language_for(file: &Path, source: &str) -> Language {
    let extension = file.extension().and_then(|e| e.to_str()).unwrap_or("");
    Language::ALL
        .into_iter()
        .find(|lang| lang.file_extension() == extension)
        .unwrap_or_else(|| detect_language_from_code(source))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("neuro_agent=info".parse()?)
                .add_directive("neuro_core=info".parse()?),
        )
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    debug!(?config, "Loaded configuration");
    let core = NeuroCore::init(config).context("failed to initialize the neuro core")?;

    match args.command {
        Command::Generate {
            prompt,
            max_tokens,
            temperature,
            top_k,
            top_p,
            stop,
            json,
        } => {
            let defaults = core.default_params();
            let params = GenerationParams {
                max_tokens: max_tokens.unwrap_or(defaults.max_tokens),
                temperature: temperature.unwrap_or(defaults.temperature),
                top_k: top_k.unwrap_or(defaults.top_k),
                top_p: top_p.unwrap_or(defaults.top_p),
                ..defaults
            }
            .with_stop(stop);
            let out = core.generate_text(&prompt, &params)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", out.text);
            }
        }

        Command::Run {
            task_type,
            input,
            input_file,
            name,
            description,
            priority,
            flags,
        } => {
            let task_type: TaskType = task_type.parse()?;
            let priority: TaskPriority = priority.parse()?;
            let flags = TaskFlags::parse_list(&flags)?;
            let input = match (input, input_file) {
                (_, Some(path)) => std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (Some(text), None) => text.into_bytes(),
                (None, None) => Vec::new(),
            };

            let id = core.create_task(task_type, &name, &description, priority, flags, &input)?;
            info!(task_id = %id, "Running task");
            let state = core.start_task(id)?;
            if state != TaskState::Completed {
                bail!("task {} ended {}", id, state);
            }
            let output = core.task_output(id)?;
            println!("{}", String::from_utf8_lossy(&output));
            let snapshot = core.get_task_info(id)?;
            if snapshot.exit_code != 0 {
                std::process::exit(snapshot.exit_code);
            }
        }

        Command::Exec { file, language } => {
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let language = match language {
                Some(tag) => tag,
                None => language_for(&file, &source).as_str().to_string(),
            };
            let out = core.execute_code(&source, &language, None)?;
            print!("{}", out.output_text());
            if !out.success {
                std::process::exit(out.exit_code.unwrap_or(1));
            }
        }

        Command::Health { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&core.health())?);
            } else {
                println!("{}", core.monitor_system_health());
            }
        }

        Command::Info => {
            println!("{}", serde_json::to_string_pretty(&core.model_info())?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_extension_then_contents() {
        assert_eq!(language_for(Path::new("a.py"), ""), Language::Python);
        assert_eq!(language_for(Path::new("main.rs"), ""), Language::Rust);
        assert_eq!(
            language_for(Path::new("script"), "console.log(1)"),
            Language::JavaScript
        );
    }

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "neuro-agent",
            "--model",
            "weights.bin",
            "--seed",
            "9",
            "info",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.model.path, Some(PathBuf::from("weights.bin")));
        assert_eq!(config.model.seed, Some(9));
    }
}
