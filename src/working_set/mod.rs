//! Category-grouped element ids the conversation currently refers to.

pub mod delta;
pub mod reconciler;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub use delta::{
    apply_delta, apply_output, parse_deltas, DeltaOperation, DeltaOutcome, WorkingSetDelta,
    UNKNOWN_CATEGORY,
};
pub use reconciler::{retain_existing, Reconciler, ValidationOutcome};

pub type ElementId = i64;

/// Ids are unique and keep insertion order within a category; a category with
/// no ids is never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, Vec<ElementId>>",
    into = "BTreeMap<String, Vec<ElementId>>"
)]
pub struct WorkingSet {
    categories: BTreeMap<String, Vec<ElementId>>,
}

impl From<BTreeMap<String, Vec<ElementId>>> for WorkingSet {
    fn from(raw: BTreeMap<String, Vec<ElementId>>) -> Self {
        let mut set = Self::default();
        for (category, ids) in raw {
            set.add(&category, &ids);
        }
        set
    }
}

impl From<WorkingSet> for BTreeMap<String, Vec<ElementId>> {
    fn from(set: WorkingSet) -> Self {
        set.categories
    }
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Number of ids across all categories.
    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn get(&self, category: &str) -> Option<&[ElementId]> {
        self.categories.get(category).map(Vec::as_slice)
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &[ElementId])> {
        self.categories
            .iter()
            .map(|(category, ids)| (category.as_str(), ids.as_slice()))
    }

    /// Every id once, in category order then insertion order.
    pub fn flatten(&self) -> Vec<ElementId> {
        let mut seen = HashSet::new();
        self.categories
            .values()
            .flatten()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn add(&mut self, category: &str, ids: &[ElementId]) {
        if ids.is_empty() {
            return;
        }
        let entry = self.categories.entry(category.to_string()).or_default();
        for id in ids {
            if !entry.contains(id) {
                entry.push(*id);
            }
        }
        self.prune();
    }

    pub fn remove_from(&mut self, category: &str, ids: &[ElementId]) {
        if let Some(entry) = self.categories.get_mut(category) {
            entry.retain(|id| !ids.contains(id));
        }
        self.prune();
    }

    pub fn remove_everywhere(&mut self, ids: &[ElementId]) {
        for entry in self.categories.values_mut() {
            entry.retain(|id| !ids.contains(id));
        }
        self.prune();
    }

    pub fn retain(&mut self, keep: impl Fn(ElementId) -> bool) {
        for entry in self.categories.values_mut() {
            entry.retain(|id| keep(*id));
        }
        self.prune();
    }

    pub fn clear(&mut self) {
        self.categories.clear();
    }

    fn prune(&mut self) {
        self.categories.retain(|_, ids| !ids.is_empty());
    }

    /// One line for prompts and replies, e.g. `Walls: 3, Doors: 1 (4 elements)`.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "The working set is empty.".to_string();
        }
        let parts = self
            .categories
            .iter()
            .map(|(category, ids)| format!("{category}: {}", ids.len()))
            .collect::<Vec<_>>();
        let total = self.len();
        let noun = if total == 1 { "element" } else { "elements" };
        format!("{} ({total} {noun})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_deduplicates_and_keeps_insertion_order() {
        let mut set = WorkingSet::new();
        set.add("Walls", &[3, 1, 3]);
        set.add("Walls", &[2, 1]);
        assert_eq!(set.get("Walls"), Some(&[3, 1, 2][..]));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn deserialized_sets_drop_empty_categories() {
        let set: WorkingSet =
            serde_json::from_str(r#"{"Walls":[1,1,2],"Doors":[]}"#).expect("parse set");
        assert_eq!(set.categories().count(), 1);
        assert_eq!(set.get("Walls"), Some(&[1, 2][..]));
        assert_eq!(
            serde_json::to_string(&set).expect("encode"),
            r#"{"Walls":[1,2]}"#
        );
    }

    #[test]
    fn summary_counts_per_category() {
        let mut set = WorkingSet::new();
        assert_eq!(set.summary(), "The working set is empty.");
        set.add("Walls", &[1, 2]);
        set.add("Doors", &[9]);
        assert_eq!(set.summary(), "Doors: 1, Walls: 2 (3 elements)");
        assert_eq!(set.flatten(), vec![9, 1, 2]);
    }
}
