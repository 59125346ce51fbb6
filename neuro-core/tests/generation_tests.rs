//! Integration tests for text generation through `NeuroCore`.

use neuro_core::tokenizer::{BOS_ID, EOS_ID};
use neuro_core::{CoreConfig, FinishReason, GenerationParams, NeuroCore};
use pretty_assertions::assert_eq;

fn core(seed: u64) -> (tempfile::TempDir, NeuroCore) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.bin");
    let weights: Vec<u8> = (0..64 * 1024u32).map(|i| (i * 31 % 251) as u8).collect();
    std::fs::write(&path, weights).unwrap();

    let mut config = CoreConfig::default();
    config.model.path = Some(path);
    config.model.seed = Some(seed);
    let core = NeuroCore::init(config).unwrap();
    (dir, core)
}

#[test]
fn test_single_token_budget() {
    let (_dir, core) = core(1);
    let params = GenerationParams {
        max_tokens: 1,
        top_k: 1,
        ..Default::default()
    };
    let out = core.generate_text("hi", &params).unwrap();
    assert_eq!(out.prompt_tokens, 2);
    match out.finish_reason {
        FinishReason::EndOfSequence => assert!(out.generated.is_empty()),
        _ => {
            assert_eq!(out.generated.len(), 1);
            assert_ne!(out.generated[0], EOS_ID);
            assert_ne!(out.generated[0], BOS_ID);
        }
    }
}

#[test]
fn test_same_seed_same_text() {
    let params = GenerationParams {
        max_tokens: 24,
        ..Default::default()
    };
    let (_a_dir, a) = core(99);
    let (_b_dir, b) = core(99);
    let first = a.generate_text("write a sort function", &params).unwrap();
    let second = b.generate_text("write a sort function", &params).unwrap();
    assert_eq!(first.generated, second.generated);
    assert_eq!(first.text, second.text);
}

#[test]
fn test_greedy_decoding_is_repeatable_without_seed() {
    let (_dir, core) = core(5);
    let params = GenerationParams {
        max_tokens: 8,
        temperature: 0.0,
        ..Default::default()
    };
    let first = core.generate_text("hello world", &params).unwrap();
    let second = core.generate_text("hello world", &params).unwrap();
    assert_eq!(first.generated, second.generated);
}

#[test]
fn test_health_tracks_generations() {
    let (_dir, core) = core(3);
    let params = GenerationParams {
        max_tokens: 4,
        ..Default::default()
    };
    core.generate_text("status", &params).unwrap();
    let health = core.health();
    assert!(health.coherence >= 0.0 && health.coherence <= 1.0);
    assert!(health.hallucination_score >= 0.0 && health.hallucination_score <= 1.0);
}
