use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

pub const EMBEDDING_UNAVAILABLE: &str = "Computing the embedding is unavailable in this client";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageGenerationParameters {
    pub output_image_width: Option<u32>,
    pub output_image_height: Option<u32>,
}

/// A model-agnostic evaluation request, as produced by the evaluation harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    /// `<organization>/<engine>`
    pub model: String,
    pub model_deployment: String,
    pub embedding: bool,
    pub prompt: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub num_completions: usize,
    pub max_tokens: usize,
    pub top_p: f64,
    pub echo_prompt: bool,
    pub top_k_per_token: usize,
    pub stop_sequences: Vec<String>,
    /// Folded into the cache key so identical requests can be sampled more than once.
    pub random: Option<String>,
    pub image_generation_parameters: Option<ImageGenerationParameters>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            model: String::new(),
            model_deployment: String::new(),
            embedding: false,
            prompt: String::new(),
            messages: Vec::new(),
            temperature: 1.0,
            num_completions: 1,
            max_tokens: 100,
            top_p: 1.0,
            echo_prompt: false,
            top_k_per_token: 1,
            stop_sequences: Vec::new(),
            random: None,
            image_generation_parameters: None,
        }
    }
}

impl Request {
    pub fn model_engine(&self) -> &str {
        self.model
            .split_once('/')
            .map(|(_, engine)| engine)
            .unwrap_or(&self.model)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    #[serde(with = "crate::nonfinite")]
    pub logprob: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentPolicy(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaObject {
    pub content_type: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Sum of the logprobs of `tokens`.
    #[serde(with = "crate::nonfinite")]
    pub logprob: f64,
    pub tokens: Vec<Token>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaObject>,
}

impl Completion {
    pub fn from_tokens(text: String, tokens: Vec<Token>) -> Self {
        let logprob = tokens.iter().map(|token| token.logprob).sum();
        Self {
            text,
            logprob,
            tokens,
            finish_reason: None,
            media: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFlags {
    pub is_retriable: bool,
    pub is_fatal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResult {
    pub success: bool,
    pub cached: bool,
    pub request_time: Option<f64>,
    pub request_datetime: Option<u64>,
    pub completions: Vec<Completion>,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_flags: Option<ErrorFlags>,
}

impl RequestResult {
    pub fn failure(error: impl Into<String>, error_flags: Option<ErrorFlags>) -> Self {
        Self {
            success: false,
            cached: false,
            request_time: None,
            request_datetime: None,
            completions: Vec::new(),
            embedding: Vec::new(),
            error: Some(error.into()),
            error_flags,
        }
    }

    pub fn from_error(err: &ServiceError) -> Self {
        Self::failure(err.to_string(), Some(err.error_flags()))
    }

    pub fn embedding_unavailable() -> Self {
        Self::failure(EMBEDDING_UNAVAILABLE, None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizationRequest {
    pub text: String,
    #[serde(default)]
    pub tokenizer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizationResult {
    pub tokens: Vec<u32>,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeRequest {
    pub tokens: Vec<u32>,
    #[serde(default)]
    pub tokenizer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeResult {
    pub text: String,
    pub cached: bool,
}
