use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ServiceError;

/// Native generation parameters, derived from an evaluation request.
/// Used verbatim as the cache fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HuggingFaceRequest {
    pub engine: String,
    pub prompt: String,
    pub temperature: f64,
    pub num_return_sequences: usize,
    pub max_new_tokens: usize,
    pub top_p: f64,
    pub echo_prompt: bool,
    pub top_k_per_token: usize,
    pub stop_sequences: Vec<String>,
}

impl HuggingFaceRequest {
    /// Scoring a prompt: no new tokens, one sequence, prompt echoed.
    pub fn logprobs_only(&self) -> bool {
        self.max_new_tokens == 0 && self.num_return_sequences == 1 && self.echo_prompt
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCompletion {
    pub text: String,
    pub tokens: Vec<String>,
    /// One entry per generated token.
    #[serde(with = "crate::nonfinite::vec")]
    pub logprobs: Vec<f64>,
    /// One entry per prompt token, only filled when scoring a prompt.
    #[serde(with = "crate::nonfinite::vec")]
    pub prompt_logprobs: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServedResponse {
    pub completions: Vec<RawCompletion>,
    pub input_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DevicePlacement {
    /// CUDA when available, CPU otherwise.
    Auto,
    Device(String),
    /// Placement delegated to the backend, e.g. `"auto"` sharding.
    DeviceMap(String),
}

/// Model construction options, built from loosely typed client kwargs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadOptions {
    pub placement: DevicePlacement,
    pub dtype: Option<String>,
    pub trust_remote_code: bool,
    pub extra: Map<String, Value>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            placement: DevicePlacement::Auto,
            dtype: None,
            trust_remote_code: true,
            extra: Map::new(),
        }
    }
}

const DTYPE_KEY: &str = "torch_dtype";
const DTYPE_PREFIX: &str = "torch.";

impl LoadOptions {
    pub fn from_kwargs(mut kwargs: Map<String, Value>) -> Result<Self, ServiceError> {
        let device = kwargs.remove("device");
        let device_map = kwargs.remove("device_map");
        let placement = match (device, device_map) {
            (Some(_), Some(_)) => {
                return Err(ServiceError::InvalidRequest(
                    "At most one of `device` and `device_map` may be specified".to_string(),
                ));
            }
            (Some(device), None) => DevicePlacement::Device(string_kwarg("device", device)?),
            (None, Some(map)) => DevicePlacement::DeviceMap(string_kwarg("device_map", map)?),
            (None, None) => DevicePlacement::Auto,
        };

        let dtype = kwargs
            .remove(DTYPE_KEY)
            .map(|value| string_kwarg(DTYPE_KEY, value))
            .transpose()?
            .map(|dtype| {
                dtype
                    .strip_prefix(DTYPE_PREFIX)
                    .map(str::to_string)
                    .unwrap_or(dtype)
            });

        let trust_remote_code = match kwargs.remove("trust_remote_code") {
            Some(Value::Bool(trust)) => trust,
            Some(other) => {
                return Err(ServiceError::InvalidRequest(format!(
                    "`trust_remote_code` must be a boolean, got {other}"
                )));
            }
            None => true,
        };

        Ok(Self {
            placement,
            dtype,
            trust_remote_code,
            extra: kwargs,
        })
    }
}

fn string_kwarg(key: &str, value: Value) -> Result<String, ServiceError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ServiceError::InvalidRequest(format!(
            "`{key}` must be a string, got {other}"
        ))),
    }
}
