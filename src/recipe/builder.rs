use serde_json::{Value, json};

use crate::ledger::{Address, amount_value};
use crate::recipe::{Recipe, RecipeNode};

/// Fluent recipe construction, mainly for tests and embedders.
///
/// ```
/// use rezept::recipe::builder::RecipeBuilder;
///
/// let recipe = RecipeBuilder::new("r1", "0xUser")
///     .node("n1", "add_funds")
///         .arg("0xTokenA")
///         .amount(100)
///         .then(&["n2"])
///         .build()
///     .node("n2", "send_to_wallet")
///         .arg("0xTokenA")
///         .amount(100)
///         .build()
///     .build();
/// assert_eq!(recipe.nodes.len(), 2);
/// ```
pub struct RecipeBuilder {
    recipe_id: String,
    owner: Address,
    nodes: Vec<RecipeNode>,
}

impl RecipeBuilder {
    pub fn new(recipe_id: &str, owner: impl Into<Address>) -> Self {
        Self {
            recipe_id: recipe_id.to_string(),
            owner: owner.into(),
            nodes: Vec::new(),
        }
    }

    pub fn node(self, id: &str, function_name: &str) -> NodeBuilder {
        NodeBuilder {
            recipe_builder: self,
            id: id.to_string(),
            function_name: function_name.to_string(),
            arguments: Vec::new(),
            next_ids: Vec::new(),
        }
    }

    pub fn build(self) -> Recipe {
        Recipe {
            recipe_id: self.recipe_id,
            owner: self.owner,
            nodes: self.nodes,
        }
    }
}

pub struct NodeBuilder {
    recipe_builder: RecipeBuilder,
    id: String,
    function_name: String,
    arguments: Vec<Value>,
    next_ids: Vec<String>,
}

impl NodeBuilder {
    pub fn arg(mut self, v: impl Into<Value>) -> Self {
        self.arguments.push(v.into());
        self
    }

    /// Amounts are encoded as base-10 strings; wei-scale values overflow
    /// JSON numbers.
    pub fn amount(mut self, amount: u128) -> Self {
        self.arguments.push(amount_value(amount));
        self
    }

    pub fn amounts(mut self, amounts: &[u128]) -> Self {
        self.arguments
            .push(Value::Array(amounts.iter().map(|a| amount_value(*a)).collect()));
        self
    }

    pub fn path(mut self, assets: &[&str]) -> Self {
        self.arguments.push(json!(assets));
        self
    }

    pub fn then(mut self, next_ids: &[&str]) -> Self {
        self.next_ids = next_ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn build(mut self) -> RecipeBuilder {
        let has_next = !self.next_ids.is_empty();
        let node = RecipeNode {
            id: self.id,
            function_name: self.function_name,
            user: self.recipe_builder.owner.clone(),
            arguments: self.arguments,
            has_next,
            next_ids: self.next_ids,
        };
        self.recipe_builder.nodes.push(node);
        self.recipe_builder
    }
}
