pub mod descriptor;
pub mod error;
pub mod manifest;
pub mod registry;
pub mod schema;

pub use descriptor::{
    derive_tool_id, normalize_tool_id, ParamType, ParameterDefinition, ScriptDescriptor,
    ScriptKind,
};
pub use error::CatalogError;
pub use manifest::ManifestCatalog;
pub use registry::{resolve_in, search_in, MatchTier, Resolution, ScoredScript, ScriptRegistry};
pub use schema::{tool_definitions, utility_tool_definitions, ToolDefinition};
