#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("script manifest not found at {path}")]
    ManifestMissing { path: String },
    #[error("failed to read script manifest {path}: {source}")]
    ManifestRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid script manifest {path}: {source}")]
    ManifestParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid catalog entry `{name}`: {reason}")]
    InvalidEntry { name: String, reason: String },
    #[error("script catalog did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("script catalog unavailable: {0}")]
    Unavailable(String),
}
