use std::sync::Arc;

use crate::{error::ServiceError, model::LoadOptions};

/// Halts a sequence once its trailing token ids equal `stop_sequence`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopAtTokens {
    stop_sequence: Vec<u32>,
}

impl StopAtTokens {
    pub fn new(stop_sequence: Vec<u32>) -> Self {
        Self { stop_sequence }
    }

    pub fn stop_sequence(&self) -> &[u32] {
        &self.stop_sequence
    }

    pub fn should_stop(&self, sequence: &[u32]) -> bool {
        !self.stop_sequence.is_empty() && sequence.ends_with(&self.stop_sequence)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_p: f64,
    pub num_return_sequences: usize,
    pub max_new_tokens: usize,
    /// Single-token stop sequence, handled natively as end-of-sequence.
    pub eos_token_id: Option<u32>,
    pub stopping_criteria: Vec<StopAtTokens>,
}

impl GenerationParams {
    /// True if `token` ends the sequence `sequence` (which already contains `token`).
    pub fn is_finished(&self, sequence: &[u32], token: u32) -> bool {
        self.eos_token_id == Some(token)
            || self
                .stopping_criteria
                .iter()
                .any(|criterion| criterion.should_stop(sequence))
    }
}

/// Output of a generation call.
///
/// `sequences[i]` is the prompt followed by the tokens generated for return
/// sequence `i`; sequences may differ in length when they stop early.
/// `scores[i][step]` is the full-vocabulary score vector from which
/// `sequences[i][input_len + step]` was chosen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGeneration {
    pub sequences: Vec<Vec<u32>>,
    pub scores: Vec<Vec<Vec<f32>>>,
}

pub trait LanguageModel: Send + Sync {
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<RawGeneration, ServiceError>;

    /// Output distributions at every prompt position; entry `i` scores the token at `i + 1`.
    fn forward(&self, input_ids: &[u32]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

pub trait InferenceBackend: Send + Sync {
    fn load(
        &self,
        model_id: &str,
        options: &LoadOptions,
    ) -> Result<Arc<dyn LanguageModel>, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_criterion_matches_trailing_tokens_only() {
        let stop = StopAtTokens::new(vec![7, 8]);
        assert!(stop.should_stop(&[1, 2, 7, 8]));
        assert!(!stop.should_stop(&[7, 8, 1]));
        assert!(!stop.should_stop(&[8]));
    }

    #[test]
    fn empty_stop_sequence_never_matches() {
        assert!(!StopAtTokens::new(vec![]).should_stop(&[1, 2]));
    }

    #[test]
    fn eos_or_any_criterion_finishes() {
        let params = GenerationParams {
            temperature: 1.0,
            top_p: 1.0,
            num_return_sequences: 1,
            max_new_tokens: 4,
            eos_token_id: Some(0),
            stopping_criteria: vec![StopAtTokens::new(vec![3, 4])],
        };
        assert!(params.is_finished(&[5, 0], 0));
        assert!(params.is_finished(&[3, 4], 4));
        assert!(!params.is_finished(&[4, 3], 3));
    }
}
