use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    error::ServiceError,
    image::{ImageApi, ImageRequest, ModerationApi},
};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiCredentials {
    pub api_key: String,
    pub org_id: Option<String>,
    pub api_base: String,
}

struct OpenAiHttp {
    http: reqwest::blocking::Client,
    credentials: OpenAiCredentials,
}

impl OpenAiHttp {
    fn new(credentials: OpenAiCredentials) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            credentials,
        }
    }

    fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Value, ServiceError> {
        let url = format!(
            "{}/{}",
            self.credentials.api_base.trim_end_matches('/'),
            path
        );
        let mut request = self
            .http
            .post(url)
            .bearer_auth(&self.credentials.api_key)
            .json(body);
        if let Some(org_id) = &self.credentials.org_id {
            request = request.header("OpenAI-Organization", org_id);
        }

        let response = request
            .send()
            .map_err(|e| ServiceError::Provider(e.to_string()))?;
        let status = response.status();
        let body: Value = response
            .json()
            .map_err(|e| ServiceError::Provider(format!("unreadable response ({status}): {e}")))?;

        if !status.is_success() {
            return Err(ServiceError::Provider(
                api_error_message(&body).unwrap_or_else(|| format!("HTTP {status}")),
            ));
        }
        Ok(body)
    }
}

fn api_error_message(body: &Value) -> Option<String> {
    body.get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn parse_images(body: &Value) -> Result<Vec<String>, ServiceError> {
    let invalid = || ServiceError::Provider(format!("Invalid response: {body}"));
    body.get("data")
        .and_then(Value::as_array)
        .ok_or_else(invalid)?
        .iter()
        .map(|image| {
            image
                .get("b64_json")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(invalid)
        })
        .collect()
}

fn parse_flagged(body: &Value) -> Result<bool, ServiceError> {
    body.get("results")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|result| result.get("flagged"))
        .and_then(Value::as_bool)
        .ok_or_else(|| ServiceError::Provider(format!("Invalid moderation response: {body}")))
}

pub struct OpenAiImageApi {
    http: OpenAiHttp,
}

impl OpenAiImageApi {
    pub fn new(credentials: OpenAiCredentials) -> Self {
        Self {
            http: OpenAiHttp::new(credentials),
        }
    }
}

impl ImageApi for OpenAiImageApi {
    fn create_images(&self, request: &ImageRequest) -> Result<Vec<String>, ServiceError> {
        let body = self.http.post("images/generations", request)?;
        parse_images(&body)
    }
}

pub struct OpenAiModerationApi {
    http: OpenAiHttp,
}

impl OpenAiModerationApi {
    pub fn new(credentials: OpenAiCredentials) -> Self {
        Self {
            http: OpenAiHttp::new(credentials),
        }
    }
}

impl ModerationApi for OpenAiModerationApi {
    fn will_be_flagged(&self, text: &str) -> Result<bool, ServiceError> {
        let body = self.http.post("moderations", &json!({ "input": text }))?;
        parse_flagged(&body)
    }
}
