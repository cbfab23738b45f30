#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use llm_eval_clients::{
    Cache, HuggingFaceClient, HuggingFaceClientConfig, ServerRegistry, ServiceError,
    model::{GenerationParams, InferenceBackend, LanguageModel, LoadOptions, RawGeneration},
    request::ChatMessage,
    tokenizer::{TextTokenizer, WrappedTokenizer},
};

pub const VOCAB: usize = 128;

/// One token per ASCII byte.
pub struct ByteTokenizer {
    pub chat_template: bool,
}

impl TextTokenizer for ByteTokenizer {
    fn encode(&self, text: &str, _add_special_tokens: bool) -> Result<Vec<u32>, ServiceError> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, ServiceError> {
        Ok(ids.iter().map(|&id| id as u8 as char).collect())
    }

    fn has_chat_template(&self) -> bool {
        self.chat_template
    }

    fn apply_chat_template(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        Ok(messages
            .iter()
            .map(|m| format!("<{}>{}", m.role, m.content))
            .collect())
    }
}

pub fn ids(text: &str) -> Vec<u32> {
    text.bytes().map(u32::from).collect()
}

/// Score vector putting logit 2.0 on `token` and 0.0 everywhere else.
pub fn peaked(token: u32) -> Vec<f32> {
    let mut scores = vec![0.0; VOCAB];
    scores[token as usize] = 2.0;
    scores
}

/// logprob of the peaked token in [`peaked`].
pub fn peaked_logprob() -> f64 {
    2.0 - ((VOCAB - 1) as f64 + 2f64.exp()).ln()
}

/// Return sequence `i` continues with `continuations[i % len]`, honouring
/// the token budget and stop conditions.
pub struct ScriptedModel {
    continuations: Vec<Vec<u32>>,
    pub generate_calls: AtomicUsize,
    pub forward_calls: AtomicUsize,
    pub last_params: Mutex<Option<GenerationParams>>,
}

impl ScriptedModel {
    pub fn new(continuations: &[&str]) -> Self {
        Self {
            continuations: continuations.iter().map(|c| ids(c)).collect(),
            generate_calls: AtomicUsize::new(0),
            forward_calls: AtomicUsize::new(0),
            last_params: Mutex::new(None),
        }
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn forward_calls(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }
}

impl LanguageModel for ScriptedModel {
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<RawGeneration, ServiceError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock() = Some(params.clone());

        let mut output = RawGeneration::default();
        for i in 0..params.num_return_sequences {
            let script = &self.continuations[i % self.continuations.len()];
            let mut sequence = input_ids.to_vec();
            let mut steps = Vec::new();
            for &token in script.iter().take(params.max_new_tokens) {
                steps.push(peaked(token));
                sequence.push(token);
                if params.is_finished(&sequence, token) {
                    break;
                }
            }
            output.sequences.push(sequence);
            output.scores.push(steps);
        }
        Ok(output)
    }

    fn forward(&self, input_ids: &[u32]) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..input_ids.len())
            .map(|i| match input_ids.get(i + 1) {
                Some(&next) => peaked(next),
                None => vec![0.0; VOCAB],
            })
            .collect())
    }
}

pub struct CountingBackend {
    pub model: Arc<ScriptedModel>,
    pub loads: AtomicUsize,
    failures_left: AtomicUsize,
}

impl CountingBackend {
    pub fn new(model: Arc<ScriptedModel>) -> Self {
        Self::failing(model, 0)
    }

    /// Fails the first `failures` loads.
    pub fn failing(model: Arc<ScriptedModel>, failures: usize) -> Self {
        Self {
            model,
            loads: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(failures),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for CountingBackend {
    fn load(
        &self,
        model_id: &str,
        _options: &LoadOptions,
    ) -> Result<Arc<dyn LanguageModel>, ServiceError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ServiceError::Backend(format!("CUDA out of memory loading {model_id}")));
        }
        let model: Arc<dyn LanguageModel> = self.model.clone();
        Ok(model)
    }
}

pub struct Harness {
    pub client: HuggingFaceClient,
    pub model: Arc<ScriptedModel>,
    pub backend: Arc<CountingBackend>,
}

pub fn harness(continuations: &[&str], config: HuggingFaceClientConfig) -> Harness {
    harness_with(continuations, config, 0, false)
}

pub fn harness_with(
    continuations: &[&str],
    config: HuggingFaceClientConfig,
    failing_loads: usize,
    chat_template: bool,
) -> Harness {
    let model = Arc::new(ScriptedModel::new(continuations));
    let backend = Arc::new(CountingBackend::failing(model.clone(), failing_loads));
    let client = HuggingFaceClient::new(
        config,
        WrappedTokenizer::new(ByteTokenizer { chat_template }),
        backend.clone(),
        Arc::new(ServerRegistry::default()),
        Cache::in_memory(),
    );
    Harness {
        client,
        model,
        backend,
    }
}
