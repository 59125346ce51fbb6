//! Autoregressive text generation.
//!
//! ```text
//! prompt --encode--> [BOS, w1, w2, ...]
//!                        |
//!          +-------------v--------------+
//!          | model.logits(sequence)     |
//!          | sampler.sample(logits)     |<--+
//!          | push id, stop on EOS/stop  |---+  up to max_tokens
//!          +-------------+--------------+
//!                        |
//!              detokenize(new ids) --> GeneratedText
//! ```

mod model;
mod params;

pub use model::{LanguageModel, LoadedModel};
pub use params::{GenerationParams, DEFAULT_PENALTY_WINDOW};

pub(crate) use model::read_weights;

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::sampler::Sampler;
use crate::tokenizer::{Tokenizer, EOS_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndOfSequence,
    MaxTokens,
    StopSequence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub text: String,
    /// Length of the encoded prompt, BOS included.
    pub prompt_tokens: usize,
    /// Ids emitted after the prompt. A terminating EOS is not included.
    pub generated: Vec<u32>,
    pub finish_reason: FinishReason,
    pub elapsed_ms: u64,
}

pub struct GenerationEngine {
    model: Box<dyn LanguageModel>,
    tokenizer: Tokenizer,
    sampler: Sampler,
}

impl GenerationEngine {
    pub fn new(
        model: Box<dyn LanguageModel>,
        tokenizer: Tokenizer,
        seed: Option<u64>,
    ) -> CoreResult<Self> {
        if model.vocab_size() != tokenizer.vocab_size() as usize {
            return Err(CoreError::ModelLoad(format!(
                "model vocabulary ({}) does not match tokenizer vocabulary ({})",
                model.vocab_size(),
                tokenizer.vocab_size()
            )));
        }
        Ok(Self {
            model,
            tokenizer,
            sampler: Sampler::new(seed),
        })
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn model(&self) -> &dyn LanguageModel {
        self.model.as_ref()
    }

    pub fn generate(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
    ) -> CoreResult<GeneratedText> {
        params.validate()?;
        let started = Instant::now();

        let mut sequence = self.tokenizer.encode(prompt)?;
        let prompt_tokens = sequence.len();
        // max_tokens is only an upper bound.
        sequence.reserve(params.max_tokens.min(self.tokenizer.max_length()));

        let mut logits = vec![0.0f32; self.model.vocab_size()];
        let mut generated = Vec::new();
        let mut text = String::new();
        let mut finish_reason = FinishReason::MaxTokens;

        for _ in 0..params.max_tokens {
            self.model.logits(&sequence, &mut logits);
            let id = self.sampler.sample(&mut logits, &sequence, params);
            sequence.push(id);
            if id == EOS_ID {
                finish_reason = FinishReason::EndOfSequence;
                break;
            }
            generated.push(id);

            if let Some(piece) = self.tokenizer.token_text(id) {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&piece);
            }
            if let Some(cut) = find_stop(&text, &params.stop) {
                text.truncate(cut);
                finish_reason = FinishReason::StopSequence;
                break;
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            prompt_tokens,
            generated = generated.len(),
            ?finish_reason,
            elapsed_ms,
            "Generation finished"
        );
        Ok(GeneratedText {
            text,
            prompt_tokens,
            generated,
            finish_reason,
            elapsed_ms,
        })
    }
}

/// Byte offset of the earliest stop substring in `text`.
fn find_stop(text: &str, stops: &[String]) -> Option<usize> {
    stops
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}
