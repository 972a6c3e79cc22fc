use super::descriptor::{normalize_tool_id, segment_count, ParameterDefinition, ScriptDescriptor};
use super::schema::{tool_definitions, ToolDefinition};
use super::CatalogError;
use crate::collab::{call_with_timeout, CollaboratorError, ScriptCatalog};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "all", "as", "at", "be", "by", "can", "do", "for", "from", "i",
    "in", "into", "is", "it", "me", "my", "of", "on", "or", "please", "script", "some", "that",
    "the", "these", "this", "those", "to", "use", "want", "with", "would", "you",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    ToolId,
    ToolIdSuffix,
    DisplayName,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found {
        script: ScriptDescriptor,
        tier: MatchTier,
    },
    Ambiguous {
        tier: MatchTier,
        candidates: Vec<ScriptDescriptor>,
    },
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredScript {
    pub script: ScriptDescriptor,
    pub score: f32,
}

fn tier_matches(
    tier: MatchTier,
    script: &ScriptDescriptor,
    raw: &str,
    query: &str,
    query_segments: usize,
) -> bool {
    let id = script.tool_id.as_str();
    match tier {
        MatchTier::ToolId => id == query,
        MatchTier::ToolIdSuffix => {
            id.len() > query.len()
                && id.ends_with(query)
                && id.as_bytes()[id.len() - query.len() - 1] == b'_'
                && segment_count(id) > query_segments
        }
        MatchTier::DisplayName => script.name == raw,
    }
}

/// Tiered lookup; the first tier with any match decides the outcome.
pub fn resolve_in(scripts: &[ScriptDescriptor], name_or_id: &str) -> Resolution {
    let raw = name_or_id.trim();
    if raw.is_empty() {
        return Resolution::NotFound;
    }
    let normalized = normalize_tool_id(raw);
    let query = normalized.as_str();
    let query_segments = segment_count(query);

    for tier in [
        MatchTier::ToolId,
        MatchTier::ToolIdSuffix,
        MatchTier::DisplayName,
    ] {
        let mut found = scripts
            .iter()
            .filter(|script| tier_matches(tier, script, raw, query, query_segments))
            .cloned()
            .collect::<Vec<_>>();
        if found.is_empty() {
            continue;
        }
        if found.len() > 1 {
            return Resolution::Ambiguous {
                tier,
                candidates: found,
            };
        }
        let script = found.remove(0);
        if tier == MatchTier::ToolIdSuffix {
            tracing::info!(
                query = raw,
                tool_id = script.tool_id.as_str(),
                "robust match on tool id suffix"
            );
        }
        return Resolution::Found { script, tier };
    }
    Resolution::NotFound
}

fn normalize_token(token: &str) -> String {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

pub(crate) fn tokenize(input: &str) -> Vec<String> {
    input
        .to_ascii_lowercase()
        .replace('\'', "")
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(normalize_token)
        .collect()
}

fn keyword_tokens(input: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(input)
        .into_iter()
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

fn score_script(script: &ScriptDescriptor, query: &[String]) -> f32 {
    let name = tokenize(&script.spoken_name())
        .into_iter()
        .collect::<HashSet<_>>();
    let tool_id = tokenize(script.tool_id.as_str())
        .into_iter()
        .collect::<HashSet<_>>();
    let description = tokenize(&script.description)
        .into_iter()
        .collect::<HashSet<_>>();
    let categories = script
        .categories
        .iter()
        .flat_map(|category| tokenize(category))
        .collect::<HashSet<_>>();

    query
        .iter()
        .map(|token| {
            let mut score = 0.0_f32;
            if name.contains(token) {
                score += 3.0;
            } else if tool_id.contains(token) {
                score += 2.0;
            }
            if categories.contains(token) {
                score += 1.5;
            }
            if description.contains(token) {
                score += 1.0;
            }
            score
        })
        .sum()
}

/// Keyword narrowing: scripts sharing at least one significant token with the
/// task, best first, ties in catalog order.
pub fn search_in(scripts: &[ScriptDescriptor], task: &str, max: usize) -> Vec<ScoredScript> {
    let query = keyword_tokens(task);
    if query.is_empty() || max == 0 {
        return Vec::new();
    }
    let mut scored = scripts
        .iter()
        .map(|script| ScoredScript {
            score: score_script(script, &query),
            script: script.clone(),
        })
        .filter(|candidate| candidate.score > 0.0)
        .collect::<Vec<_>>();
    // stable sort keeps catalog order on ties
    scored.sort_by(|left, right| {
        right
            .score
            .partial_cmp(&left.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(max);
    scored
}

fn catalog_error(err: CollaboratorError) -> CatalogError {
    match err {
        CollaboratorError::Timeout { timeout_ms, .. } => CatalogError::Timeout { timeout_ms },
        other => CatalogError::Unavailable(other.to_string()),
    }
}

/// Read-mostly cache over the script catalog. Readers hold an `Arc` snapshot;
/// a refresh builds the replacement completely before swapping it in.
pub struct ScriptRegistry {
    source: Arc<dyn ScriptCatalog>,
    timeout: Duration,
    snapshot: RwLock<Option<Arc<Vec<ScriptDescriptor>>>>,
}

impl ScriptRegistry {
    pub fn new(source: Arc<dyn ScriptCatalog>, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            snapshot: RwLock::new(None),
        }
    }

    fn load(&self) -> Result<Arc<Vec<ScriptDescriptor>>, CatalogError> {
        let source = Arc::clone(&self.source);
        let scripts = call_with_timeout("catalog", self.timeout, move || source.list_scripts())
            .map_err(catalog_error)??;
        Ok(Arc::new(scripts))
    }

    /// Discards the cached set and reloads it. On failure the previous set stays.
    pub fn refresh(&self) -> Result<usize, CatalogError> {
        let loaded = self.load()?;
        let count = loaded.len();
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(loaded);
        tracing::info!(count, "script catalog refreshed");
        Ok(count)
    }

    /// Current catalog, loading it on first use.
    pub fn catalog(&self) -> Result<Arc<Vec<ScriptDescriptor>>, CatalogError> {
        {
            let guard = self
                .snapshot
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(scripts) = guard.as_ref() {
                return Ok(Arc::clone(scripts));
            }
        }
        self.refresh()?;
        let guard = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| CatalogError::Unavailable("catalog snapshot missing".to_string()))
    }

    pub fn resolve(&self, name_or_id: &str) -> Result<Resolution, CatalogError> {
        Ok(resolve_in(&self.catalog()?, name_or_id))
    }

    pub fn search(&self, task: &str, max: usize) -> Result<Vec<ScoredScript>, CatalogError> {
        Ok(search_in(&self.catalog()?, task, max))
    }

    pub fn tool_definitions(&self) -> Result<Vec<ToolDefinition>, CatalogError> {
        Ok(tool_definitions(&self.catalog()?))
    }

    pub fn read_parameters(
        &self,
        descriptor: &ScriptDescriptor,
    ) -> Result<Vec<ParameterDefinition>, CatalogError> {
        let source = Arc::clone(&self.source);
        let descriptor = descriptor.clone();
        call_with_timeout("catalog", self.timeout, move || {
            source.read_parameters(&descriptor)
        })
        .map_err(catalog_error)?
    }
}
