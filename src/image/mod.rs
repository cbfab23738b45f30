mod file_cache;
pub mod openai;

use std::path::PathBuf;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    cache::{Cache, make_cache_key},
    client::Client,
    error::ServiceError,
    request::{
        Completion, FinishReason, ImageGenerationParameters, MediaObject, Request,
        RequestResult,
    },
};

pub use file_cache::LocalFileCache;

pub const MAX_PROMPT_LENGTH: usize = 1000;
pub const MAX_NUM_COMPLETIONS: usize = 10;
pub const VALID_IMAGE_DIMENSIONS: [u32; 3] = [256, 512, 1024];
pub const DEFAULT_IMAGE_SIZE: &str = "512x512";

pub const CONTENT_POLICY_VIOLATED: &str = "The prompt violates OpenAI's content policy. \
    See https://labs.openai.com/policies/content-policy for more information.";

// The API answers with these messages, or substrings of them, when it refuses a prompt.
const PROMPT_FLAGGED_ERROR: &str = "Your request was rejected as a result of our safety system. \
    Your prompt may contain text that is not allowed by our safety system.";
const PROMPT_FLAGGED_ERROR2: &str =
    "Something went wrong with your generation. You may try again or ask for a different prompt";
const PROMPT_FLAGGED_ERROR3: &str = "The server had an error while processing your request. \
    Sorry about that! You can retry your request, or contact us through our help center at \
    help.openai.com if the error persists.";

pub trait ImageApi: Send + Sync {
    /// Generates images and returns them base64-encoded.
    fn create_images(&self, request: &ImageRequest) -> Result<Vec<String>, ServiceError>;
}

pub trait ModerationApi: Send + Sync {
    fn will_be_flagged(&self, text: &str) -> Result<bool, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub n: usize,
    pub size: String,
    pub response_format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredImages {
    file_paths: Vec<PathBuf>,
}

/// DALL-E 2 text-to-image client. Images are written to a local file cache and
/// only their paths are memoized.
pub struct DalleClient {
    api: Box<dyn ImageApi>,
    moderation: Box<dyn ModerationApi>,
    file_cache: LocalFileCache,
    cache: Cache,
}

impl DalleClient {
    pub fn new(
        api: Box<dyn ImageApi>,
        moderation: Box<dyn ModerationApi>,
        file_cache: LocalFileCache,
        cache: Cache,
    ) -> Self {
        Self {
            api,
            moderation,
            file_cache,
            cache,
        }
    }

    fn validate(request: &Request) -> Result<ImageRequest, ServiceError> {
        if request.prompt.chars().count() > MAX_PROMPT_LENGTH {
            return Err(ServiceError::InvalidRequest(format!(
                "The maximum length of the prompt is {MAX_PROMPT_LENGTH} characters."
            )));
        }
        if !(1..=MAX_NUM_COMPLETIONS).contains(&request.num_completions) {
            return Err(ServiceError::InvalidRequest(format!(
                "`num_completions` must be between 1 and {MAX_NUM_COMPLETIONS}."
            )));
        }

        Ok(ImageRequest {
            prompt: request.prompt.clone(),
            n: request.num_completions,
            size: size_str(request.image_generation_parameters.as_ref())?,
            // URLs expire after an hour, so always ask for the bytes.
            response_format: "b64_json".to_string(),
        })
    }

    fn generate(&self, raw: &ImageRequest) -> Result<StoredImages, ServiceError> {
        let images = self.api.create_images(raw)?;
        let file_paths = images
            .iter()
            .map(|encoded| {
                self.file_cache.store(|| {
                    STANDARD
                        .decode(encoded)
                        .map_err(|e| ServiceError::Provider(format!("invalid image payload: {e}")))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StoredImages { file_paths })
    }

    fn serve(&self, request: &Request) -> Result<RequestResult, ServiceError> {
        let raw = Self::validate(request)?;

        if self.moderation.will_be_flagged(&raw.prompt)? {
            info!(prompt = %raw.prompt, "prompt flagged by moderation");
            return Ok(content_policy_violated(request.num_completions));
        }

        let key = make_cache_key(&raw, request)?;
        let (timed, cached) = match self.cache.get(&key, || self.generate(&raw)) {
            Ok(hit) => hit,
            Err(ServiceError::Provider(message)) if is_flagged_error(&message) => {
                info!(prompt = %raw.prompt, "failed safety check");
                return Ok(content_policy_violated(request.num_completions));
            }
            Err(err) => return Err(err),
        };

        let completions = timed
            .response
            .file_paths
            .iter()
            .map(|path| Completion {
                media: Some(MediaObject {
                    content_type: "image/png".to_string(),
                    location: path.display().to_string(),
                }),
                ..Completion::from_tokens(String::new(), Vec::new())
            })
            .collect();

        Ok(RequestResult {
            success: true,
            cached,
            request_time: Some(timed.request_time),
            request_datetime: Some(timed.request_datetime),
            completions,
            embedding: Vec::new(),
            error: None,
            error_flags: None,
        })
    }
}

impl Client for DalleClient {
    fn make_request(&self, request: &Request) -> RequestResult {
        match self.serve(request) {
            Ok(result) => result,
            Err(err @ ServiceError::InvalidRequest(_)) => RequestResult::from_error(&err),
            Err(err) => {
                error!(%err, "DALL-E 2 request failed");
                RequestResult::failure(format!("DALL-E 2 error: {err}"), Some(err.error_flags()))
            }
        }
    }
}

fn size_str(params: Option<&ImageGenerationParameters>) -> Result<String, ServiceError> {
    let (width, height) = match params {
        Some(ImageGenerationParameters {
            output_image_width: Some(w),
            output_image_height: Some(h),
        }) => (*w, *h),
        _ => return Ok(DEFAULT_IMAGE_SIZE.to_string()),
    };

    if width != height {
        return Err(ServiceError::InvalidRequest(
            "The DALL-E 2 API only supports generating square images.".to_string(),
        ));
    }
    if !VALID_IMAGE_DIMENSIONS.contains(&width) {
        return Err(ServiceError::InvalidRequest(
            "Valid dimensions are 256x256, 512x512, or 1024x1024 pixels.".to_string(),
        ));
    }
    Ok(format!("{width}x{height}"))
}

fn is_flagged_error(message: &str) -> bool {
    (!message.is_empty() && PROMPT_FLAGGED_ERROR.contains(message))
        || message.contains(PROMPT_FLAGGED_ERROR2)
        || message.contains(PROMPT_FLAGGED_ERROR3)
}

fn content_policy_violated(num_completions: usize) -> RequestResult {
    let no_image = Completion {
        finish_reason: Some(FinishReason::ContentPolicy(
            CONTENT_POLICY_VIOLATED.to_string(),
        )),
        ..Completion::from_tokens(String::new(), Vec::new())
    };
    RequestResult {
        success: true,
        cached: false,
        request_time: Some(0.0),
        request_datetime: None,
        completions: vec![no_image; num_completions],
        embedding: Vec::new(),
        error: None,
        error_flags: None,
    }
}
