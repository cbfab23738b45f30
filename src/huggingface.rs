use std::sync::Arc;

use tracing::{error, warn};

use crate::{
    cache::{Cache, make_cache_key},
    client::Client,
    error::ServiceError,
    model::{
        HuggingFaceRequest, HuggingFaceServer, InferenceBackend, LoadOptions, ServedResponse,
        ServerRegistry,
    },
    request::{ChatMessage, Completion, Request, RequestResult, Token},
    tokenizer::WrappedTokenizer,
    truncation::truncate_sequence,
};

/// Temperature sent in place of 0.0, which the sampler rejects.
pub const GREEDY_TEMPERATURE: f64 = 1e-7;

#[derive(Debug, Clone, Default)]
pub struct HuggingFaceClientConfig {
    /// Backend model id or path; the request's model name is used when unset.
    pub pretrained_model_name_or_path: Option<String>,
    pub end_of_text_token: Option<String>,
    /// Inferred from the tokenizer when unset.
    pub apply_chat_template: Option<bool>,
    pub load_options: LoadOptions,
}

pub struct HuggingFaceClient {
    cache: Cache,
    tokenizer: WrappedTokenizer,
    backend: Arc<dyn InferenceBackend>,
    registry: Arc<ServerRegistry>,
    pretrained_model_name_or_path: Option<String>,
    end_of_text_token: Option<String>,
    apply_chat_template: bool,
    load_options: LoadOptions,
}

impl HuggingFaceClient {
    pub fn new(
        config: HuggingFaceClientConfig,
        tokenizer: WrappedTokenizer,
        backend: Arc<dyn InferenceBackend>,
        registry: Arc<ServerRegistry>,
        cache: Cache,
    ) -> Self {
        let apply_chat_template = match config.apply_chat_template {
            Some(apply) => apply,
            None => {
                let inferred = tokenizer.with(|t| t.has_chat_template());
                warn!(
                    apply_chat_template = inferred,
                    "apply_chat_template inferred from whether the tokenizer has a chat template; \
                     set it explicitly if this is wrong"
                );
                inferred
            }
        };

        Self {
            cache,
            tokenizer,
            backend,
            registry,
            pretrained_model_name_or_path: config.pretrained_model_name_or_path,
            end_of_text_token: config.end_of_text_token,
            apply_chat_template,
            load_options: config.load_options,
        }
    }

    pub fn applies_chat_template(&self) -> bool {
        self.apply_chat_template
    }

    /// Prompt text to feed the model, after chat formatting where applicable.
    pub fn get_prompt(&self, request: &Request) -> Result<String, ServiceError> {
        if !request.prompt.is_empty() && !request.messages.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "More than one of `prompt` and `messages` was set in request".to_string(),
            ));
        }

        if self.apply_chat_template {
            self.tokenizer.with(|t| {
                if request.messages.is_empty() {
                    t.apply_chat_template(&[ChatMessage::user(request.prompt.clone())])
                } else {
                    t.apply_chat_template(&request.messages)
                }
            })
        } else if !request.messages.is_empty() {
            Err(ServiceError::InvalidRequest(
                "Chat messages not supported by non-chat model".to_string(),
            ))
        } else {
            Ok(request.prompt.clone())
        }
    }

    pub fn adapt(&self, request: &Request) -> Result<HuggingFaceRequest, ServiceError> {
        Ok(HuggingFaceRequest {
            engine: request.model_engine().to_string(),
            prompt: self.get_prompt(request)?,
            temperature: if request.temperature == 0.0 {
                GREEDY_TEMPERATURE
            } else {
                request.temperature
            },
            num_return_sequences: request.num_completions,
            max_new_tokens: request.max_tokens,
            top_p: request.top_p,
            echo_prompt: request.echo_prompt,
            top_k_per_token: request.top_k_per_token,
            stop_sequences: request.stop_sequences.clone(),
        })
    }

    fn server_for(&self, request: &Request) -> Result<Arc<HuggingFaceServer>, ServiceError> {
        let pretrained = self
            .pretrained_model_name_or_path
            .as_deref()
            .unwrap_or(&request.model);
        self.registry.get_or_create(&request.model, || {
            HuggingFaceServer::new(
                self.backend.as_ref(),
                pretrained,
                self.tokenizer.clone(),
                &self.load_options,
            )
        })
    }

    fn serve(
        &self,
        request: &Request,
        raw: &HuggingFaceRequest,
    ) -> Result<RequestResult, ServiceError> {
        let server = self.server_for(request)?;
        let key = make_cache_key(raw, request)?;
        let (timed, cached) = self.cache.get(&key, || server.serve_request(raw))?;

        let completions = assemble_completions(&timed.response, request)
            .into_iter()
            .map(|completion| {
                truncate_sequence(completion, request, self.end_of_text_token.as_deref())
            })
            .collect();

        Ok(RequestResult {
            success: true,
            cached,
            request_time: Some(timed.request_time),
            request_datetime: Some(timed.request_datetime),
            completions,
            embedding: Vec::new(),
            error: None,
            error_flags: None,
        })
    }
}

impl Client for HuggingFaceClient {
    fn make_request(&self, request: &Request) -> RequestResult {
        if request.embedding {
            return RequestResult::embedding_unavailable();
        }

        let raw = match self.adapt(request) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(model = %request.model, %err, "rejected request");
                return RequestResult::from_error(&err);
            }
        };

        match self.serve(request, &raw) {
            Ok(result) => result,
            Err(err) => {
                error!(model = %request.model, %err, "HuggingFace request failed");
                RequestResult::failure(format!("HuggingFace error: {err}"), Some(err.error_flags()))
            }
        }
    }
}

/// Pairs decoded tokens with their logprobs. Echoed prompt tokens come first,
/// scored when prompt logprobs were computed and 0.0 otherwise.
fn assemble_completions(response: &ServedResponse, request: &Request) -> Vec<Completion> {
    response
        .completions
        .iter()
        .map(|raw| {
            let mut tokens = Vec::with_capacity(raw.tokens.len());
            let generated = if request.echo_prompt {
                let split = response.input_length.min(raw.tokens.len());
                let (prompt, generated) = raw.tokens.split_at(split);
                for (i, text) in prompt.iter().enumerate() {
                    tokens.push(Token {
                        text: text.clone(),
                        logprob: raw.prompt_logprobs.get(i).copied().unwrap_or(0.0),
                    });
                }
                generated
            } else {
                raw.tokens.as_slice()
            };

            tokens.extend(generated.iter().zip(&raw.logprobs).map(|(text, &logprob)| Token {
                text: text.clone(),
                logprob,
            }));

            Completion::from_tokens(raw.text.clone(), tokens)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{LanguageModel, RawCompletion},
        tokenizer::TextTokenizer,
    };

    struct Plain {
        template: bool,
    }

    impl TextTokenizer for Plain {
        fn encode(&self, text: &str, _: bool) -> Result<Vec<u32>, ServiceError> {
            Ok(text.bytes().map(u32::from).collect())
        }

        fn decode(&self, ids: &[u32]) -> Result<String, ServiceError> {
            Ok(ids.iter().map(|&id| id as u8 as char).collect())
        }

        fn has_chat_template(&self) -> bool {
            self.template
        }

        fn apply_chat_template(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
            Ok(messages
                .iter()
                .map(|m| format!("[{}] {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }

    struct NoBackend;

    impl InferenceBackend for NoBackend {
        fn load(
            &self,
            model_id: &str,
            _: &LoadOptions,
        ) -> Result<Arc<dyn LanguageModel>, ServiceError> {
            Err(ServiceError::Backend(format!("cannot load {model_id}")))
        }
    }

    fn client(template: bool, apply: Option<bool>) -> HuggingFaceClient {
        HuggingFaceClient::new(
            HuggingFaceClientConfig {
                apply_chat_template: apply,
                ..Default::default()
            },
            WrappedTokenizer::new(Plain { template }),
            Arc::new(NoBackend),
            Arc::new(ServerRegistry::default()),
            Cache::in_memory(),
        )
    }

    #[test]
    fn chat_template_setting_is_inferred_from_tokenizer() {
        assert!(client(true, None).applies_chat_template());
        assert!(!client(false, None).applies_chat_template());
        assert!(!client(true, Some(false)).applies_chat_template());
    }

    #[test]
    fn prompt_and_messages_together_are_rejected() {
        let request = Request {
            prompt: "hi".into(),
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        let err = client(true, None).get_prompt(&request).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[test]
    fn raw_prompt_is_wrapped_as_user_message_for_chat_models() {
        let request = Request {
            prompt: "hello".into(),
            ..Default::default()
        };
        assert_eq!(client(true, None).get_prompt(&request).unwrap(), "[user] hello");
    }

    #[test]
    fn messages_are_rejected_by_base_models() {
        let request = Request {
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        let err = client(false, None).get_prompt(&request).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[test]
    fn zero_temperature_is_never_forwarded() {
        let request = Request {
            model: "huggingface/gpt2".into(),
            prompt: "hi".into(),
            temperature: 0.0,
            ..Default::default()
        };
        let raw = client(false, None).adapt(&request).unwrap();
        assert_eq!(raw.temperature, GREEDY_TEMPERATURE);
        assert_eq!(raw.engine, "gpt2");
    }

    #[test]
    fn load_failures_become_failed_results() {
        let request = Request {
            model: "huggingface/gpt2".into(),
            prompt: "hi".into(),
            ..Default::default()
        };
        let result = client(false, None).make_request(&request);
        assert!(!result.success);
        assert!(result.completions.is_empty());
        assert!(result.error.unwrap().starts_with("HuggingFace error:"));
    }

    #[test]
    fn echoed_prompt_tokens_without_scores_get_zero() {
        let response = ServedResponse {
            completions: vec![RawCompletion {
                text: "abXY".into(),
                tokens: vec!["a".into(), "b".into(), "X".into(), "Y".into()],
                logprobs: vec![-1.0, -2.0],
                prompt_logprobs: vec![],
            }],
            input_length: 2,
        };
        let request = Request {
            echo_prompt: true,
            ..Default::default()
        };

        let completions = assemble_completions(&response, &request);
        let logprobs: Vec<f64> = completions[0].tokens.iter().map(|t| t.logprob).collect();
        assert_eq!(logprobs, vec![0.0, 0.0, -1.0, -2.0]);
        assert_eq!(completions[0].logprob, -3.0);
    }
}
