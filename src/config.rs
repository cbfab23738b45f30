use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use serde_json::{Map, Value};

use crate::{
    huggingface::HuggingFaceClientConfig,
    image::openai::{DEFAULT_API_BASE, OpenAiCredentials},
    model::LoadOptions,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_id: String,
    pub pretrained_model_name_or_path: Option<String>,
    pub tokenizer_path: PathBuf,
    pub tokenizer_config_path: Option<PathBuf>,
    pub end_of_text_token: Option<String>,
    pub apply_chat_template: Option<bool>,
    pub model_kwargs: Map<String, Value>,
    pub module_dir: PathBuf,
    pub cache_path: Option<PathBuf>,
    pub openai: Option<OpenAiCredentials>,
    pub image_output_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));

        let model_id = env::var("MODEL_ID").unwrap_or_else(|_| "huggingface/gpt2".to_string());
        let pretrained_model_name_or_path = env::var("PRETRAINED_MODEL_PATH").ok();

        let tokenizer_path = PathBuf::from(
            env::var("TOKENIZER_PATH").unwrap_or_else(|_| "models/tokenizer.json".to_string()),
        );
        let tokenizer_config_path = env::var("TOKENIZER_CONFIG_PATH").ok().map(PathBuf::from);
        let end_of_text_token = env::var("END_OF_TEXT_TOKEN").ok();
        let apply_chat_template = env::var("APPLY_CHAT_TEMPLATE")
            .ok()
            .and_then(|v| v.parse().ok());

        let mut model_kwargs = match env::var("MODEL_KWARGS") {
            Ok(raw) => match serde_json::from_str::<Value>(&raw)? {
                Value::Object(map) => map,
                other => anyhow::bail!("MODEL_KWARGS must be a JSON object, got {other}"),
            },
            Err(_) => Map::new(),
        };
        for (var, key) in [
            ("DEVICE", "device"),
            ("DEVICE_MAP", "device_map"),
            ("TORCH_DTYPE", "torch_dtype"),
        ] {
            if let Ok(value) = env::var(var) {
                model_kwargs.insert(key.to_string(), Value::String(value));
            }
        }

        let module_dir =
            PathBuf::from(env::var("MODULE_DIR").unwrap_or_else(|_| "models".to_string()));
        let cache_path = env::var("CACHE_PATH").ok().map(PathBuf::from);

        let openai = env::var("OPENAI_API_KEY").ok().map(|api_key| OpenAiCredentials {
            api_key,
            org_id: env::var("OPENAI_ORG_ID").ok(),
            api_base: env::var("OPENAI_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
        });
        let image_output_dir = PathBuf::from(
            env::var("IMAGE_OUTPUT_DIR").unwrap_or_else(|_| "output/images".to_string()),
        );

        Ok(Self {
            listen_addr,
            model_id,
            pretrained_model_name_or_path,
            tokenizer_path,
            tokenizer_config_path,
            end_of_text_token,
            apply_chat_template,
            model_kwargs,
            module_dir,
            cache_path,
            openai,
            image_output_dir,
        })
    }

    pub fn huggingface_client_config(&self) -> anyhow::Result<HuggingFaceClientConfig> {
        Ok(HuggingFaceClientConfig {
            pretrained_model_name_or_path: self.pretrained_model_name_or_path.clone(),
            end_of_text_token: self.end_of_text_token.clone(),
            apply_chat_template: self.apply_chat_template,
            load_options: LoadOptions::from_kwargs(self.model_kwargs.clone())?,
        })
    }
}
