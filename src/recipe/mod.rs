use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ledger::Address;

pub mod builder;
pub mod graph;

/// A user-submitted multi-step intent. Immutable once submitted; archived
/// inside its batch record when execution reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub recipe_id: String,
    pub owner: Address,
    pub nodes: Vec<RecipeNode>,
}

/// One operation invocation inside a recipe.
///
/// Nodes never pass values to each other directly; outputs land in the
/// internal balance store and successors draw from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeNode {
    pub id: String,
    pub function_name: String,
    pub user: Address,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub next_ids: Vec<String>,
}

impl RecipeNode {
    pub fn is_terminal(&self) -> bool {
        !self.has_next
    }
}
