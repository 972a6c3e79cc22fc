//! Adapters for the host application that owns the document and runs scripts.

pub mod http;

pub use http::HttpHost;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("host response from {url} could not be parsed: {reason}")]
    Response { url: String, reason: String },
}
