//! Immutable sets of network actions identifying search tree leaves.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use rao_types::NetworkAction;

/// A set of network action ids plus the operators owning them.
///
/// Combinations order by size, then by concatenated id, so that candidates
/// of one depth are always visited in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ActionCombination {
    action_ids: BTreeSet<String>,
    operators: BTreeSet<String>,
}

impl ActionCombination {
    /// The empty combination of the root leaf.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_actions<'a>(actions: impl IntoIterator<Item = &'a NetworkAction>) -> Self {
        let mut combination = Self::default();
        for action in actions {
            combination.insert(action);
        }
        combination
    }

    fn insert(&mut self, action: &NetworkAction) {
        self.action_ids.insert(action.id.clone());
        if let Some(op) = &action.operator {
            self.operators.insert(op.clone());
        }
    }

    /// This combination plus one more action.
    pub fn extended_with(&self, action: &NetworkAction) -> Self {
        let mut extended = self.clone();
        extended.insert(action);
        extended
    }

    pub fn contains(&self, action_id: &str) -> bool {
        self.action_ids.contains(action_id)
    }

    pub fn action_ids(&self) -> impl Iterator<Item = &str> {
        self.action_ids.iter().map(String::as_str)
    }

    pub fn operators(&self) -> &BTreeSet<String> {
        &self.operators
    }

    pub fn len(&self) -> usize {
        self.action_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.action_ids.is_empty()
    }

    pub fn concatenated_id(&self) -> String {
        if self.is_empty() {
            return "root".to_string();
        }
        self.action_ids
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

impl fmt::Display for ActionCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.concatenated_id())
    }
}

impl Ord for ActionCombination {
    fn cmp(&self, other: &Self) -> Ordering {
        self.len()
            .cmp(&other.len())
            .then_with(|| self.action_ids.iter().cmp(other.action_ids.iter()))
            .then_with(|| self.operators.cmp(&other.operators))
    }
}

impl PartialOrd for ActionCombination {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
