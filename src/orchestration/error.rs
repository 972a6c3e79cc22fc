use crate::catalog::CatalogError;
use crate::orchestration::state::NextAction;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("no script matches `{query}`")]
    NotFound { query: String },
    #[error("`{query}` matches several scripts: {}", candidates.join(", "))]
    Ambiguous {
        query: String,
        candidates: Vec<String>,
    },
    #[error("parameter `{parameter}` needs clarification: {message}")]
    TypeMismatch { parameter: String, message: String },
    #[error("host call failed: {0}")]
    TransientHost(String),
    #[error("language model unavailable: {0}")]
    Model(String),
    #[error("script catalog unavailable: {0}")]
    Catalog(String),
    #[error("invalid arguments for tool `{tool}`: {source}")]
    Json {
        tool: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown tool `{tool}`")]
    UnknownTool { tool: String },
    #[error("next action transition `{from}` -> `{to}` is invalid")]
    InvalidTransition { from: NextAction, to: NextAction },
    #[error("internal fault: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Recoverable errors end the turn with a prompt; the rest roll the state back.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidTransition { .. } | Self::Internal(_))
    }
}

impl From<CatalogError> for OrchestratorError {
    fn from(value: CatalogError) -> Self {
        match value {
            CatalogError::ManifestMissing { path } => Self::NotFound { query: path },
            other => Self::Catalog(other.to_string()),
        }
    }
}
