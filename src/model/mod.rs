mod backend;
pub mod logprobs;
mod registry;
pub mod sampling;
mod serving;
mod types;

#[cfg(feature = "tch-backend")]
pub mod loader;

pub use backend::{GenerationParams, InferenceBackend, LanguageModel, RawGeneration, StopAtTokens};
pub use registry::ServerRegistry;
pub use serving::HuggingFaceServer;
pub use types::{DevicePlacement, HuggingFaceRequest, LoadOptions, RawCompletion, ServedResponse};
