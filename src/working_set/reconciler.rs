use super::{ElementId, WorkingSet};
use crate::collab::{call_with_timeout, HostValidator};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Nothing to check.
    Skipped,
    Validated {
        set: WorkingSet,
        removed: Vec<ElementId>,
    },
    /// The host could not answer; the set is returned unchanged.
    FailedOpen { set: WorkingSet, reason: String },
}

impl ValidationOutcome {
    pub fn into_set(self, current: WorkingSet) -> WorkingSet {
        match self {
            Self::Skipped => current,
            Self::Validated { set, .. } | Self::FailedOpen { set, .. } => set,
        }
    }
}

/// Drops ids the host no longer reports, pruning emptied categories.
pub fn retain_existing(current: &WorkingSet, existing: &[ElementId]) -> WorkingSet {
    let existing = existing.iter().copied().collect::<HashSet<_>>();
    let mut next = current.clone();
    next.retain(|id| existing.contains(&id));
    next
}

pub struct Reconciler {
    host: Arc<dyn HostValidator>,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(host: Arc<dyn HostValidator>, timeout: Duration) -> Self {
        Self { host, timeout }
    }

    pub fn validate(&self, current: &WorkingSet) -> ValidationOutcome {
        if current.is_empty() {
            return ValidationOutcome::Skipped;
        }
        let ids = current.flatten();
        let host = Arc::clone(&self.host);
        let request = ids.clone();
        let answer = call_with_timeout("host validation", self.timeout, move || {
            host.still_exist(&request)
        });
        match answer {
            Ok(Ok(existing)) => {
                let set = retain_existing(current, &existing);
                let kept = set.flatten().into_iter().collect::<HashSet<_>>();
                let removed = ids
                    .into_iter()
                    .filter(|id| !kept.contains(id))
                    .collect::<Vec<_>>();
                if !removed.is_empty() {
                    tracing::info!(removed = removed.len(), "dropped stale working-set ids");
                }
                ValidationOutcome::Validated { set, removed }
            }
            Ok(Err(err)) | Err(err) => {
                tracing::warn!(error = %err, "working-set validation failed open");
                ValidationOutcome::FailedOpen {
                    set: current.clone(),
                    reason: err.to_string(),
                }
            }
        }
    }
}
