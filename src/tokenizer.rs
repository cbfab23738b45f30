use std::{fs, path::Path, sync::Arc};

use minijinja::{Environment, ErrorKind, context};
use parking_lot::Mutex;
use serde_json::Value;
use tokenizers::Tokenizer;

use crate::{error::ServiceError, request::ChatMessage};

pub trait TextTokenizer: Send {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>, ServiceError>;

    fn decode(&self, ids: &[u32]) -> Result<String, ServiceError>;

    fn batch_decode(&self, sequences: &[Vec<u32>]) -> Result<Vec<String>, ServiceError> {
        sequences.iter().map(|ids| self.decode(ids)).collect()
    }

    fn has_chat_template(&self) -> bool;

    fn apply_chat_template(&self, messages: &[ChatMessage]) -> Result<String, ServiceError>;
}

/// Shared handle to a tokenizer that is not safe for unsynchronized use.
/// Every use goes through [`WrappedTokenizer::with`], which holds the lock for
/// the duration of the closure.
#[derive(Clone)]
pub struct WrappedTokenizer {
    inner: Arc<Mutex<Box<dyn TextTokenizer>>>,
}

impl WrappedTokenizer {
    pub fn new(tokenizer: impl TextTokenizer + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(tokenizer))),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&dyn TextTokenizer) -> R) -> R {
        let guard = self.inner.lock();
        f(guard.as_ref())
    }
}

/// A Jinja chat template as shipped in a HuggingFace `tokenizer_config.json`.
#[derive(Debug, Clone)]
pub struct ChatTemplate {
    source: String,
    bos_token: Option<String>,
    eos_token: Option<String>,
}

impl ChatTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            bos_token: None,
            eos_token: None,
        }
    }

    /// Reads `chat_template`, `bos_token` and `eos_token` from a tokenizer config.
    /// Returns `None` when the config carries no template.
    pub fn from_tokenizer_config(config: &Value) -> Option<Self> {
        let source = match config.get("chat_template")? {
            Value::String(source) => source.clone(),
            // Named templates: [{"name": "default", "template": "..."}, ...]
            Value::Array(named) => named
                .iter()
                .find(|entry| entry.get("name").and_then(Value::as_str) == Some("default"))
                .or_else(|| named.first())
                .and_then(|entry| entry.get("template"))
                .and_then(Value::as_str)?
                .to_string(),
            _ => return None,
        };

        Some(Self {
            source,
            bos_token: special_token(config, "bos_token"),
            eos_token: special_token(config, "eos_token"),
        })
    }

    /// Renders with the block handling and Python string methods that
    /// HuggingFace's `apply_chat_template` provides.
    pub fn render(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_unknown_method_callback(minijinja_contrib::pycompat::unknown_method_callback);
        env.add_function("raise_exception", raise_exception);

        let ctx = context! {
            messages => messages,
            bos_token => self.bos_token.as_deref().unwrap_or_default(),
            eos_token => self.eos_token.as_deref().unwrap_or_default(),
            add_generation_prompt => false,
        };

        env.render_str(&self.source, ctx)
            .map_err(|e| ServiceError::Tokenizer(format!("chat template failed: {e}")))
    }
}

fn raise_exception(message: String) -> Result<String, minijinja::Error> {
    Err(minijinja::Error::new(ErrorKind::InvalidOperation, message))
}

// Special tokens appear either as plain strings or as AddedToken objects.
fn special_token(config: &Value, key: &str) -> Option<String> {
    match config.get(key)? {
        Value::String(token) => Some(token.clone()),
        Value::Object(added) => added
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

pub struct HuggingFaceTokenizer {
    tokenizer: Tokenizer,
    chat_template: Option<ChatTemplate>,
}

impl HuggingFaceTokenizer {
    pub fn new(tokenizer: Tokenizer, chat_template: Option<ChatTemplate>) -> Self {
        Self {
            tokenizer,
            chat_template,
        }
    }

    pub fn from_files(
        tokenizer_path: &Path,
        tokenizer_config_path: Option<&Path>,
    ) -> Result<Self, ServiceError> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;

        let chat_template = match tokenizer_config_path {
            Some(path) => {
                let raw = fs::read_to_string(path)?;
                let config: Value = serde_json::from_str(&raw)?;
                ChatTemplate::from_tokenizer_config(&config)
            }
            None => None,
        };

        Ok(Self::new(tokenizer, chat_template))
    }
}

impl TextTokenizer for HuggingFaceTokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>, ServiceError> {
        let encoding = self
            .tokenizer
            .encode(text, add_special_tokens)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, ServiceError> {
        self.tokenizer
            .decode(ids, false)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))
    }

    fn has_chat_template(&self) -> bool {
        self.chat_template.is_some()
    }

    fn apply_chat_template(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        self.chat_template
            .as_ref()
            .ok_or_else(|| {
                ServiceError::InvalidRequest("tokenizer has no chat template".to_string())
            })?
            .render(messages)
    }
}
