use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Default trailing window inspected by the repetition penalty.
pub const DEFAULT_PENALTY_WINDOW: usize = 64;

/// Knobs for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub max_tokens: usize,
    /// 0 selects greedy decoding, 1 leaves logits untouched.
    pub temperature: f32,
    /// Values outside (0, 1) disable nucleus truncation.
    pub top_p: f32,
    /// 0 disables top-k truncation.
    pub top_k: usize,
    /// Values <= 1 disable the penalty.
    pub repetition_penalty: f32,
    pub penalty_window: usize,
    pub stop: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repetition_penalty: 1.1,
            penalty_window: DEFAULT_PENALTY_WINDOW,
            stop: Vec::new(),
        }
    }
}

impl GenerationParams {
    pub fn with_stop<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.max_tokens == 0 {
            return Err(CoreError::InvalidArgument(
                "max_tokens must be at least 1".to_string(),
            ));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(CoreError::InvalidArgument(format!(
                "temperature must be a non-negative number, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(CoreError::InvalidArgument(format!(
                "top_p must be within [0, 1], got {}",
                self.top_p
            )));
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty <= 0.0 {
            return Err(CoreError::InvalidArgument(format!(
                "repetition_penalty must be positive, got {}",
                self.repetition_penalty
            )));
        }
        Ok(())
    }
}
