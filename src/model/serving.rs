use std::{sync::Arc, time::Instant};

use tracing::{info, info_span};

use crate::{
    error::ServiceError,
    model::{
        DevicePlacement, GenerationParams, HuggingFaceRequest, InferenceBackend, LanguageModel,
        LoadOptions, RawCompletion, ServedResponse, StopAtTokens, logprobs,
    },
    tokenizer::WrappedTokenizer,
};

/// A loaded causal language model plus the tokenizer it was trained with.
pub struct HuggingFaceServer {
    model_id: String,
    model: Arc<dyn LanguageModel>,
    tokenizer: WrappedTokenizer,
}

impl HuggingFaceServer {
    pub fn new(
        backend: &dyn InferenceBackend,
        pretrained_model_name_or_path: &str,
        tokenizer: WrappedTokenizer,
        options: &LoadOptions,
    ) -> Result<Self, ServiceError> {
        let span = info_span!("load_model", model = pretrained_model_name_or_path);
        let _enter = span.enter();

        match &options.placement {
            DevicePlacement::Auto => info!("device chosen automatically"),
            DevicePlacement::Device(device) => info!(%device, "device set from kwargs"),
            DevicePlacement::DeviceMap(map) => {
                info!(device_map = %map, "device_map set from kwargs")
            }
        }

        let start = Instant::now();
        let model = backend.load(pretrained_model_name_or_path, options)?;
        info!(elapsed_ms = start.elapsed().as_millis() as u64, "model loaded");

        Ok(Self::from_parts(pretrained_model_name_or_path, model, tokenizer))
    }

    pub fn from_parts(
        model_id: &str,
        model: Arc<dyn LanguageModel>,
        tokenizer: WrappedTokenizer,
    ) -> Self {
        Self {
            model_id: model_id.to_string(),
            model,
            tokenizer,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn serve_request(&self, raw: &HuggingFaceRequest) -> Result<ServedResponse, ServiceError> {
        let input_ids = self.tokenizer.with(|t| t.encode(&raw.prompt, true))?;
        let input_length = input_ids.len();

        let (sequences, all_logprobs, prompt_logprobs) = if raw.logprobs_only() {
            let distributions = self.model.forward(&input_ids)?;
            let prompt_logprobs = logprobs::prompt_logprobs(&input_ids, &distributions)?;
            (vec![input_ids], vec![Vec::new()], prompt_logprobs)
        } else {
            let (eos_token_id, stopping_criteria) = self.stop_criteria(&raw.stop_sequences)?;
            let params = GenerationParams {
                temperature: raw.temperature,
                top_p: raw.top_p,
                num_return_sequences: raw.num_return_sequences,
                max_new_tokens: raw.max_new_tokens,
                eos_token_id,
                stopping_criteria,
            };
            let output = self.model.generate(&input_ids, &params)?;
            if output.sequences.len() != raw.num_return_sequences
                || output.scores.len() != output.sequences.len()
            {
                return Err(ServiceError::Backend(format!(
                    "expected {} sequences, backend returned {} sequences and {} score sets",
                    raw.num_return_sequences,
                    output.sequences.len(),
                    output.scores.len()
                )));
            }

            let all_logprobs = output
                .sequences
                .iter()
                .zip(&output.scores)
                .map(|(sequence, scores)| {
                    logprobs::generated_logprobs(sequence, scores, input_length)
                })
                .collect::<Result<Vec<_>, _>>()?;
            (output.sequences, all_logprobs, Vec::new())
        };

        let sequences: Vec<Vec<u32>> = if raw.echo_prompt {
            sequences
        } else {
            sequences
                .into_iter()
                .map(|sequence| sequence.get(input_length..).unwrap_or_default().to_vec())
                .collect()
        };

        let (all_tokens, all_texts) = self.tokenizer.with(|t| {
            let tokens = sequences
                .iter()
                .map(|sequence| {
                    sequence
                        .iter()
                        .map(|&id| t.decode(&[id]))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()?;
            let texts = t.batch_decode(&sequences)?;
            Ok::<_, ServiceError>((tokens, texts))
        })?;

        let completions = all_texts
            .into_iter()
            .zip(all_tokens)
            .zip(all_logprobs)
            .map(|((text, tokens), logprobs)| RawCompletion {
                text,
                tokens,
                logprobs,
                prompt_logprobs: prompt_logprobs.clone(),
            })
            .collect();

        Ok(ServedResponse {
            completions,
            input_length,
        })
    }

    /// A lone stop sequence that encodes to one token becomes the native EOS
    /// id; anything else is checked token-wise after each step.
    fn stop_criteria(
        &self,
        stop_sequences: &[String],
    ) -> Result<(Option<u32>, Vec<StopAtTokens>), ServiceError> {
        if stop_sequences.is_empty() {
            return Ok((None, Vec::new()));
        }

        let encoded = self.tokenizer.with(|t| {
            stop_sequences
                .iter()
                .map(|stop| t.encode(stop, false))
                .collect::<Result<Vec<_>, _>>()
        })?;

        if let [single] = encoded.as_slice() {
            if let [eos] = single.as_slice() {
                return Ok((Some(*eos), Vec::new()));
            }
        }
        Ok((None, encoded.into_iter().map(StopAtTokens::new).collect()))
    }
}
