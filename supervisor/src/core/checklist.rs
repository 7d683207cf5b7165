//! Feature checklist model and its append/flip-only contract.

use serde::{Deserialize, Serialize};

/// One verifiable behavior of the target project.
///
/// `category`, `description` and `steps` are fixed once the initialization
/// session writes them; only `passes` may move, and only from false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    /// Free-form tag such as `functional` or `style`.
    pub category: String,
    pub description: String,
    pub steps: Vec<String>,
    pub passes: bool,
}

/// Ordered checklist as stored on disk (a bare JSON array).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checklist {
    pub items: Vec<ChecklistItem>,
}

impl Checklist {
    pub fn new(items: Vec<ChecklistItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn passing(&self) -> usize {
        self.items.iter().filter(|item| item.passes).count()
    }
}

/// True iff the checklist has at least one item and every item passes.
///
/// An empty checklist is never complete: zero items means initialization
/// produced nothing, not that the project is done.
pub fn is_complete(checklist: &Checklist) -> bool {
    !checklist.is_empty() && checklist.items.iter().all(|item| item.passes)
}

/// Check that `next` is a legal successor of `prev`.
///
/// Enforces:
/// - Cardinality is unchanged (no removal, no additions after initialization).
/// - Each position keeps its `category`, `description` and `steps`, which also
///   rejects reordering.
/// - `passes` never moves from true back to false.
///
/// Returns a list of stable error messages in item order.
pub fn check_checklist_transition(prev: &Checklist, next: &Checklist) -> Vec<String> {
    let mut errors = Vec::new();
    if prev.len() != next.len() {
        errors.push(format!(
            "item count changed from {} to {}",
            prev.len(),
            next.len()
        ));
    }

    for (index, (before, after)) in prev.items.iter().zip(&next.items).enumerate() {
        if before.category != after.category
            || before.description != after.description
            || before.steps != after.steps
        {
            errors.push(format!(
                "item {index} ('{}') was rewritten or reordered",
                before.description
            ));
            continue;
        }
        if before.passes && !after.passes {
            errors.push(format!(
                "item {index} ('{}') regressed from passing to failing",
                before.description
            ));
        }
    }

    errors
}
