//! Language model adapters.

pub mod http_model;

pub use http_model::{parse_chat_completion, HttpModel};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("api key environment variable `{0}` is not set")]
    MissingApiKey(String),
    #[error("model request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("model response could not be parsed: {0}")]
    ParseFailure(String),
}
