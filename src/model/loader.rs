use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tch::{Device, Kind, Tensor, no_grad};
use tracing::info;

use crate::{
    error::ServiceError,
    model::{
        DevicePlacement, GenerationParams, InferenceBackend, LanguageModel, LoadOptions,
        RawGeneration,
        sampling::{apply_temperature, sample_top_p},
    },
};

/// Serves traced causal LMs (TorchScript modules whose forward takes `[1, seq]`
/// token ids and returns `[1, seq, vocab]` logits).
pub struct TorchScriptBackend {
    module_dir: PathBuf,
}

impl TorchScriptBackend {
    pub fn new(module_dir: impl Into<PathBuf>) -> Self {
        Self {
            module_dir: module_dir.into(),
        }
    }

    fn module_path(&self, model_id: &str) -> PathBuf {
        let direct = Path::new(model_id);
        if direct.extension().is_some_and(|ext| ext == "ts" || ext == "pt") {
            return direct.to_path_buf();
        }
        self.module_dir
            .join(format!("{}.ts", model_id.replace('/', "--")))
    }
}

impl InferenceBackend for TorchScriptBackend {
    fn load(
        &self,
        model_id: &str,
        options: &LoadOptions,
    ) -> Result<Arc<dyn LanguageModel>, ServiceError> {
        let module_path = self.module_path(model_id);
        if !module_path.exists() {
            return Err(ServiceError::Backend(format!(
                "model artifact missing: {}",
                module_path.display()
            )));
        }

        let device = resolve_device(&options.placement);
        let kind = options.dtype.as_deref().map(parse_kind).transpose()?;

        let mut module = tch::CModule::load_on_device(&module_path, device)
            .map_err(|e| ServiceError::Backend(e.to_string()))?;
        if let Some(kind) = kind {
            module.to(device, kind, false);
        }
        module.set_eval();
        info!(path = %module_path.display(), ?device, ?kind, "loaded TorchScript module");

        Ok(Arc::new(TorchScriptModel {
            module: Mutex::new(module),
            device,
        }))
    }
}

struct TorchScriptModel {
    module: Mutex<tch::CModule>,
    device: Device,
}

impl TorchScriptModel {
    /// Logits for every position of `input_ids`, as a `[seq, vocab]` f32 CPU tensor.
    fn logits(&self, module: &tch::CModule, input_ids: &[u32]) -> Result<Tensor, ServiceError> {
        let ids: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
        let input = Tensor::from_slice(&ids)
            .reshape([1, ids.len() as i64])
            .to(self.device);

        let output = module
            .forward_is(&[tch::IValue::Tensor(input)])
            .map_err(|e| ServiceError::Backend(e.to_string()))?;

        // Traced models return either the logits or a (logits, past) tuple.
        let logits = match output {
            tch::IValue::Tensor(t) => t,
            tch::IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                tch::IValue::Tensor(t) => t.shallow_clone(),
                _ => {
                    return Err(ServiceError::Backend(
                        "Expected tensor as first tuple element".into(),
                    ));
                }
            },
            _ => {
                return Err(ServiceError::Backend(
                    "Unexpected model output format".into(),
                ));
            }
        };

        Ok(logits
            .squeeze_dim(0)
            .to_kind(Kind::Float)
            .to_device(Device::Cpu))
    }
}

fn row(logits: &Tensor, index: i64) -> Result<Vec<f32>, ServiceError> {
    Vec::<f32>::try_from(&logits.get(index)).map_err(|e| ServiceError::Backend(e.to_string()))
}

impl LanguageModel for TorchScriptModel {
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<RawGeneration, ServiceError> {
        if input_ids.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "prompt encodes to no tokens".into(),
            ));
        }

        no_grad(|| {
            let module = self.module.lock();
            let mut rng = rand::thread_rng();
            let mut generation = RawGeneration::default();

            // Each return sequence is sampled on its own, so it can stop early.
            for _ in 0..params.num_return_sequences {
                let mut sequence = input_ids.to_vec();
                let mut steps = Vec::with_capacity(params.max_new_tokens);

                for _ in 0..params.max_new_tokens {
                    let logits = self.logits(&module, &sequence)?;
                    let last = row(&logits, sequence.len() as i64 - 1)?;
                    let scores = apply_temperature(&last, params.temperature);
                    let next = sample_top_p(&scores, params.top_p, &mut rng)?;

                    steps.push(scores);
                    sequence.push(next);
                    if params.is_finished(&sequence, next) {
                        break;
                    }
                }

                generation.sequences.push(sequence);
                generation.scores.push(steps);
            }

            Ok(generation)
        })
    }

    fn forward(&self, input_ids: &[u32]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if input_ids.is_empty() {
            return Ok(Vec::new());
        }

        no_grad(|| {
            let module = self.module.lock();
            let logits = self.logits(&module, input_ids)?;
            (0..input_ids.len() as i64)
                .map(|position| row(&logits, position))
                .collect()
        })
    }
}

fn resolve_device(placement: &DevicePlacement) -> Device {
    match placement {
        DevicePlacement::Auto | DevicePlacement::DeviceMap(_) => Device::cuda_if_available(),
        DevicePlacement::Device(raw) => parse_device(raw),
    }
}

fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}

fn parse_kind(dtype: &str) -> Result<Kind, ServiceError> {
    match dtype {
        "float32" | "float" => Ok(Kind::Float),
        "float16" | "half" => Ok(Kind::Half),
        "bfloat16" => Ok(Kind::BFloat16),
        other => Err(ServiceError::InvalidRequest(format!(
            "unsupported torch_dtype: {other}"
        ))),
    }
}
