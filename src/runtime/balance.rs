use dashmap::DashMap;
use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::ledger::{Address, Asset, AssetAmount};

/// Per-user, per-asset book bridging one node's outputs to the next
/// node's inputs. The only data channel between nodes.
///
/// Mutation for a given user is linearized by the map's exclusive entry
/// guard, held only for the duration of the mutation itself, never across
/// a ledger wait. Concurrent batches for different users do not interact.
#[derive(Debug, Default)]
pub struct InternalBalanceStore {
    accounts: DashMap<Address, HashMap<Asset, u128>>,
}

impl InternalBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&self, user: &Address, asset: &Asset, amount: u128) {
        if amount == 0 {
            return;
        }
        let mut account = self.accounts.entry(user.clone()).or_default();
        *account.entry(asset.clone()).or_insert(0) += amount;
    }

    pub fn debit(&self, user: &Address, asset: &Asset, amount: u128) -> Result<()> {
        self.debit_many(
            user,
            &[AssetAmount {
                asset: asset.clone(),
                amount,
            }],
        )
    }

    /// Atomic multi-asset debit: every entry is checked before any is
    /// applied, so a refused debit leaves every balance unchanged.
    pub fn debit_many(&self, user: &Address, debits: &[AssetAmount]) -> Result<()> {
        if debits.is_empty() {
            return Ok(());
        }
        let mut account = self.accounts.entry(user.clone()).or_default();

        // Sum per asset first; one node may debit the same asset twice.
        let mut needed: HashMap<&Asset, u128> = HashMap::new();
        for debit in debits {
            *needed.entry(&debit.asset).or_insert(0) += debit.amount;
        }

        for (asset, requested) in &needed {
            let available = account.get(*asset).copied().unwrap_or(0);
            if available < *requested {
                return Err(EngineError::InsufficientBalance {
                    user: user.clone(),
                    asset: (*asset).clone(),
                    available,
                    requested: *requested,
                });
            }
        }

        for (asset, requested) in needed {
            let entry = account.get_mut(asset).unwrap();
            *entry -= requested;
            if *entry == 0 {
                account.remove(asset);
            }
        }
        Ok(())
    }

    pub fn balance_of(&self, user: &Address, asset: &Asset) -> u128 {
        self.accounts
            .get(user)
            .and_then(|account| account.get(asset).copied())
            .unwrap_or(0)
    }

    /// Every non-zero balance of `user`.
    pub fn balances_of(&self, user: &Address) -> Vec<AssetAmount> {
        self.accounts
            .get(user)
            .map(|account| {
                account
                    .iter()
                    .map(|(asset, amount)| AssetAmount {
                        asset: asset.clone(),
                        amount: *amount,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn view(&self) -> BalanceView<'_> {
        BalanceView { store: self }
    }
}

/// Read-only view handed to operation planning; handlers may consult
/// balances but never mutate them.
#[derive(Debug, Clone, Copy)]
pub struct BalanceView<'a> {
    store: &'a InternalBalanceStore,
}

impl BalanceView<'_> {
    pub fn balance_of(&self, user: &Address, asset: &Asset) -> u128 {
        self.store.balance_of(user, asset)
    }
}
