pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod huggingface;
pub mod image;
pub mod model;
mod nonfinite;
pub mod request;
pub mod scenario;
pub mod server;
pub mod tokenizer;
pub mod truncation;

pub use cache::Cache;
pub use client::Client;
pub use config::AppConfig;
pub use error::ServiceError;
pub use huggingface::{HuggingFaceClient, HuggingFaceClientConfig};
pub use image::DalleClient;
pub use model::{HuggingFaceServer, ServerRegistry};
pub use request::{Completion, Request, RequestResult, Token};
pub use server::build_router;
