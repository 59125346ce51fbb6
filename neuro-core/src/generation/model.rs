use std::ops::Range;
use std::path::Path;

use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::error::{CoreError, CoreResult};
use crate::tokenizer::{Tokenizer, EOS_ID};

/// Context tokens that feed the logit function.
const CONTEXT_WINDOW: usize = 8;

/// Source of next-token scores.
pub trait LanguageModel: Send {
    fn vocab_size(&self) -> usize;

    /// Writes one score per vocabulary id into `out` (`out.len() == vocab_size()`).
    fn logits(&self, context: &[u32], out: &mut [f32]);

    /// Raw bytes to persist in a state snapshot, if the model has any.
    fn state_bytes(&self) -> Option<&[u8]> {
        None
    }
}

/// Model weights held in memory.
///
/// Scores are a deterministic function of the weight bytes and the trailing context. Vocabulary
/// words are favoured over hash buckets, and end-of-sequence becomes likelier as the sequence
/// grows.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    weights: Vec<u8>,
    vocab_size: usize,
    words: Range<u32>,
}

impl LoadedModel {
    /// Reads the weight file named by `config.path`.
    pub fn load(config: &ModelConfig, tokenizer: &Tokenizer) -> CoreResult<Self> {
        let path = config
            .path
            .as_deref()
            .ok_or_else(|| CoreError::ModelLoad("model path is not configured".to_string()))?;
        if config.use_gpu {
            warn!("GPU inference requested but not available, running on CPU");
        }
        let weights = read_weights(path, config.memory_limit_bytes)?;
        info!(
            path = %path.display(),
            kind = %config.kind,
            bytes = weights.len(),
            threads = config.num_threads,
            "Loaded model weights"
        );
        Self::from_bytes(weights, config.memory_limit_bytes, tokenizer)
    }

    pub fn from_bytes(
        weights: Vec<u8>,
        memory_limit_bytes: u64,
        tokenizer: &Tokenizer,
    ) -> CoreResult<Self> {
        check_weight_size(weights.len() as u64, memory_limit_bytes)?;
        let first_word = crate::tokenizer::FIRST_WORD_ID;
        Ok(Self {
            weights,
            vocab_size: tokenizer.vocab_size() as usize,
            words: first_word..first_word + tokenizer.known_words() as u32,
        })
    }

    pub fn weights(&self) -> &[u8] {
        &self.weights
    }

    pub fn size_bytes(&self) -> usize {
        self.weights.len()
    }
}

impl LanguageModel for LoadedModel {
    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn logits(&self, context: &[u32], out: &mut [f32]) {
        let tail = &context[context.len().saturating_sub(CONTEXT_WINDOW)..];
        let seed = tail.iter().fold(0xcbf2_9ce4_8422_2325u64, |h, id| {
            (h ^ u64::from(*id)).wrapping_mul(0x0000_0100_0000_01b3)
        });
        let len = self.weights.len() as u64;

        for (id, score) in out.iter_mut().enumerate() {
            let offset = seed.wrapping_add((id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)) % len;
            let byte = self.weights[offset as usize];
            *score = f32::from(byte) / 127.5 - 1.0;
            if self.words.contains(&(id as u32)) {
                *score += 2.0;
            }
        }

        if let Some(eos) = out.get_mut(EOS_ID as usize) {
            *eos += (context.len() as f32 / 32.0).min(4.0);
        }
        if let Some(last) = context.last() {
            if let Some(score) = out.get_mut(*last as usize) {
                *score -= 1.0;
            }
        }
    }

    fn state_bytes(&self) -> Option<&[u8]> {
        Some(&self.weights)
    }
}

pub(crate) fn read_weights(path: &Path, memory_limit_bytes: u64) -> CoreResult<Vec<u8>> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| CoreError::ModelLoad(format!("cannot stat {}: {}", path.display(), e)))?;
    check_weight_size(metadata.len(), memory_limit_bytes)?;
    let weights = std::fs::read(path)
        .map_err(|e| CoreError::ModelLoad(format!("cannot read {}: {}", path.display(), e)))?;
    check_weight_size(weights.len() as u64, memory_limit_bytes)?;
    Ok(weights)
}

fn check_weight_size(size: u64, memory_limit_bytes: u64) -> CoreResult<()> {
    if size == 0 {
        return Err(CoreError::ModelLoad("model file is empty".to_string()));
    }
    if size > memory_limit_bytes {
        return Err(CoreError::ModelLoad(format!(
            "model needs {} bytes, memory budget is {}",
            size, memory_limit_bytes
        )));
    }
    Ok(())
}
