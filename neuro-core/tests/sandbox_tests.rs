//! Integration tests for sandboxed code execution through `NeuroCore`.

use neuro_core::{
    CoreConfig, CoreError, ExecutionRequest, Language, NeuroCore, SandboxCaps, SandboxExecutor,
    TaskFlags, TaskPriority, TaskState, TaskType,
};
use pretty_assertions::assert_eq;
use std::path::Path;

fn core_with_scratch(scratch: &Path) -> NeuroCore {
    let mut config = CoreConfig::default();
    config.sandbox.scratch_dir = Some(scratch.to_path_buf());
    config.sandbox.timeout_ms = 10_000;
    NeuroCore::init(config).unwrap()
}

fn scratch_is_empty(scratch: &Path) -> bool {
    std::fs::read_dir(scratch).unwrap().next().is_none()
}

#[test]
fn test_unsupported_language_leaves_nothing_behind() {
    let scratch = tempfile::tempdir().unwrap();
    let core = core_with_scratch(scratch.path());
    let err = core.execute_code("print 1", "cobol", None).unwrap_err();
    assert!(matches!(err, CoreError::UnsupportedLanguage(_)));
    assert!(scratch_is_empty(scratch.path()));
}

#[test]
fn test_python_run_cleans_scratch() {
    if !SandboxExecutor::is_available(Language::Python) {
        println!("Skipping test: python3 not available");
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let core = core_with_scratch(scratch.path());
    let out = core
        .execute_code("print('hello from the sandbox')", "py", None)
        .unwrap();
    assert!(out.success);
    assert_eq!(out.output_text(), "hello from the sandbox\n");
    assert!(scratch_is_empty(scratch.path()));
}

#[test]
fn test_c_compile_error_cleans_scratch() {
    if !SandboxExecutor::is_available(Language::C) {
        println!("Skipping test: gcc not available");
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let core = core_with_scratch(scratch.path());
    let out = core
        .execute_code("int main( { return 0; }", "c", None)
        .unwrap();
    assert!(!out.success);
    assert!(!out.output.is_empty());
    assert!(scratch_is_empty(scratch.path()));
}

#[test]
fn test_output_ceiling_is_an_error() {
    if !SandboxExecutor::is_available(Language::Python) {
        println!("Skipping test: python3 not available");
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let core = core_with_scratch(scratch.path());
    let caps = SandboxCaps {
        max_output_bytes: 64,
        ..Default::default()
    };
    let err = core
        .execute_code("print('x' * 1000)", "python", Some(&caps))
        .unwrap_err();
    assert!(matches!(err, CoreError::OutputTooLarge(_)));
    assert!(scratch_is_empty(scratch.path()));
}

#[test]
fn test_code_execution_task() {
    if !SandboxExecutor::is_available(Language::Python) {
        println!("Skipping test: python3 not available");
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let core = core_with_scratch(scratch.path());
    let request = ExecutionRequest {
        language: "python".to_string(),
        source: "print(6 * 7)".to_string(),
        caps: None,
    };
    let id = core
        .create_task(
            TaskType::CodeExecution,
            "run",
            "",
            TaskPriority::Normal,
            TaskFlags::SANDBOX,
            &serde_json::to_vec(&request).unwrap(),
        )
        .unwrap();
    assert_eq!(core.start_task(id).unwrap(), TaskState::Completed);
    assert_eq!(core.task_output(id).unwrap(), b"42\n".to_vec());
    assert_eq!(core.get_task_info(id).unwrap().exit_code, 0);
}

#[test]
fn test_strict_isolation_refuses_to_spawn_without_namespaces() {
    if SandboxExecutor::network_isolation_available() {
        println!("Skipping test: network namespaces are available here");
        return;
    }
    if std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_err()
    {
        println!("Skipping test: python3 not available");
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let core = core_with_scratch(scratch.path());
    let err = core.execute_code("print(1)", "python", None).unwrap_err();
    assert!(matches!(err, CoreError::SpawnFailed(_)));
    assert!(scratch_is_empty(scratch.path()));
}
