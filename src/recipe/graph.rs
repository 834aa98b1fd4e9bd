use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, InvalidRecipeKind, Result};
use crate::ledger::Asset;
use crate::ops::{OperationRegistry, check_schema};
use crate::recipe::{Recipe, RecipeNode};
use crate::runtime::balance::BalanceView;

/// Validated DAG view over a recipe.
///
/// Construction performs every pre-execution check and is free of side
/// effects: it reads the balance view but touches neither balances,
/// records nor the ledger.
#[derive(Debug)]
pub struct RecipeGraph<'a> {
    recipe: &'a Recipe,
    order: Vec<usize>,
}

impl<'a> RecipeGraph<'a> {
    pub fn build(
        recipe: &'a Recipe,
        registry: &OperationRegistry,
        balances: &BalanceView<'_>,
    ) -> Result<Self> {
        let invalid = |kind: InvalidRecipeKind| EngineError::InvalidRecipe {
            recipe_id: recipe.recipe_id.clone(),
            kind,
        };

        if recipe.nodes.is_empty() {
            return Err(invalid(InvalidRecipeKind::Empty));
        }

        // Pass 1: index ids.
        let mut id_map: HashMap<&str, usize> = HashMap::new();
        for (idx, node) in recipe.nodes.iter().enumerate() {
            if id_map.insert(node.id.as_str(), idx).is_some() {
                return Err(invalid(InvalidRecipeKind::DuplicateNodeId(node.id.clone())));
            }
        }

        // Pass 2: resolve edges, check chaining flags.
        let n = recipe.nodes.len();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (idx, node) in recipe.nodes.iter().enumerate() {
            if node.has_next != !node.next_ids.is_empty() {
                return Err(invalid(InvalidRecipeKind::InconsistentChaining(
                    node.id.clone(),
                )));
            }
            for next_id in &node.next_ids {
                let target = *id_map.get(next_id.as_str()).ok_or_else(|| {
                    invalid(InvalidRecipeKind::DanglingReference {
                        node: node.id.clone(),
                        missing: next_id.clone(),
                    })
                })?;
                children[idx].push(target);
                parents[target].push(idx);
            }
        }

        // Pass 3: stable topological order. Among nodes with no remaining
        // dependency, the first in original list order runs next, keeping
        // split fan-out deterministic. Leftover nodes mean a cycle.
        let mut indegree: Vec<usize> = parents.iter().map(|p| p.len()).collect();
        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);
        while order.len() < n {
            let ready = (0..n).find(|&i| !placed[i] && indegree[i] == 0);
            match ready {
                Some(i) => {
                    placed[i] = true;
                    order.push(i);
                    for &child in &children[i] {
                        indegree[child] -= 1;
                    }
                }
                None => {
                    let stuck = (0..n).find(|&i| !placed[i]).unwrap();
                    return Err(invalid(InvalidRecipeKind::Cycle(
                        recipe.nodes[stuck].id.clone(),
                    )));
                }
            }
        }

        // Pass 4: operations, schemas and asset satisfiability. A consumed
        // asset must be produced by an ancestor or already held by the
        // node's user; there is no other way an input can reach the
        // internal balance store.
        let mut available: Vec<HashSet<Asset>> = vec![HashSet::new(); n];
        for &idx in &order {
            let node = &recipe.nodes[idx];
            let op = registry.get(&node.function_name).ok_or_else(|| {
                invalid(InvalidRecipeKind::UnknownOperation {
                    node: node.id.clone(),
                    op: node.function_name.clone(),
                })
            })?;
            check_schema(&*op, &node.arguments)?;
            let contract = op.contract(&node.arguments)?;

            for asset in &contract.consumes {
                if !available[idx].contains(asset)
                    && balances.balance_of(&node.user, asset) == 0
                {
                    return Err(invalid(InvalidRecipeKind::UnsatisfiableAsset {
                        node: node.id.clone(),
                        asset: asset.clone(),
                    }));
                }
            }

            let mut downstream: HashSet<Asset> = available[idx].clone();
            downstream.extend(contract.produces.iter().cloned());
            for &child in &children[idx] {
                available[child].extend(downstream.iter().cloned());
            }
        }

        Ok(Self { recipe, order })
    }

    /// Nodes in execution order.
    pub fn ordered_nodes(&self) -> impl Iterator<Item = &RecipeNode> {
        self.order.iter().map(|&i| &self.recipe.nodes[i])
    }

    pub fn ordered_ids(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.recipe.nodes[i].id.as_str())
            .collect()
    }

    pub fn recipe(&self) -> &Recipe {
        self.recipe
    }
}
