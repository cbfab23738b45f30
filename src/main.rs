use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llm_eval_clients::{
    AppConfig, Cache, Client, DalleClient, HuggingFaceClient, ServerRegistry, build_router,
    image::{
        LocalFileCache,
        openai::{OpenAiImageApi, OpenAiModerationApi},
    },
    model::InferenceBackend,
    tokenizer::{HuggingFaceTokenizer, WrappedTokenizer},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(model = %config.model_id, "starting model clients");

    let tokenizer = WrappedTokenizer::new(HuggingFaceTokenizer::from_files(
        &config.tokenizer_path,
        config.tokenizer_config_path.as_deref(),
    )?);
    let cache = Cache::open(config.cache_path.as_deref())?;
    let registry = Arc::new(ServerRegistry::default());

    let text: Arc<dyn Client> = Arc::new(HuggingFaceClient::new(
        config.huggingface_client_config()?,
        tokenizer,
        build_backend(&config)?,
        registry,
        cache.clone(),
    ));

    let images: Option<Arc<dyn Client>> = match &config.openai {
        Some(credentials) => {
            tracing::info!(api_base = %credentials.api_base, "image generation enabled");
            let client: Arc<dyn Client> = Arc::new(DalleClient::new(
                Box::new(OpenAiImageApi::new(credentials.clone())),
                Box::new(OpenAiModerationApi::new(credentials.clone())),
                LocalFileCache::new(&config.image_output_dir, "png")?,
                cache,
            ));
            Some(client)
        }
        None => None,
    };

    let router = build_router(text, images);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(feature = "tch-backend")]
fn build_backend(config: &AppConfig) -> anyhow::Result<Arc<dyn InferenceBackend>> {
    Ok(Arc::new(llm_eval_clients::model::loader::TorchScriptBackend::new(
        config.module_dir.clone(),
    )))
}

#[cfg(not(feature = "tch-backend"))]
fn build_backend(_config: &AppConfig) -> anyhow::Result<Arc<dyn InferenceBackend>> {
    anyhow::bail!("no inference backend compiled in; rebuild with `--features tch-backend`")
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
