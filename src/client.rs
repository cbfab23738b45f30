use crate::{
    error::ServiceError,
    request::{
        DecodeRequest, DecodeResult, Request, RequestResult, TokenizationRequest,
        TokenizationResult,
    },
};

/// A model-serving client the evaluation harness sends requests through.
///
/// `make_request` never fails: errors are reported in the returned [`RequestResult`].
pub trait Client: Send + Sync {
    fn make_request(&self, request: &Request) -> RequestResult;

    fn tokenize(&self, _request: &TokenizationRequest) -> Result<TokenizationResult, ServiceError> {
        Err(ServiceError::Unsupported(
            "this client does not support tokenizing".to_string(),
        ))
    }

    fn decode(&self, _request: &DecodeRequest) -> Result<DecodeResult, ServiceError> {
        Err(ServiceError::Unsupported(
            "this client does not support decoding".to_string(),
        ))
    }
}
