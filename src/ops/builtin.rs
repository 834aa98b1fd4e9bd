use serde_json::{Value, json};
use std::sync::Arc;

use crate::config::AddressBook;
use crate::error::Result;
use crate::ledger::{Address, AssetAmount, LedgerCall, amount_value};
use crate::ops::{
    ArgSpec, AssetContract, OpPlan, Operation, OperationRegistry, OutputAmount, PlannedOutput,
    addr_arg, amount_arg, amounts_arg, bool_arg, label_arg, mismatch, path_arg,
};
use crate::runtime::balance::BalanceView;

const BASIS_POINTS: u128 = 10_000;

/// Wires the full builtin operation set against a network address table.
pub fn register_builtin_operations(registry: &OperationRegistry, addresses: &AddressBook) {
    registry.register(Arc::new(AddFunds {
        engine: addresses.engine.clone(),
    }));
    registry.register(Arc::new(Swap {
        router: addresses.router.clone(),
    }));
    registry.register(Arc::new(Split {
        router: addresses.router.clone(),
    }));
    registry.register(Arc::new(DepositToFarm));
    registry.register(Arc::new(WithdrawFromFarm));
    registry.register(Arc::new(OpenLeveragedPosition {
        perp_router: addresses.perp_router.clone(),
    }));
    registry.register(Arc::new(SendToWallet {
        engine: addresses.engine.clone(),
    }));
}

/// Entry point: moves funds from the user's wallet into the engine's books.
/// Arguments: `[asset, amount]`.
#[derive(Debug)]
pub struct AddFunds {
    engine: Address,
}

impl Operation for AddFunds {
    fn name(&self) -> &str {
        "add_funds"
    }

    fn schema(&self) -> &'static [ArgSpec] {
        &[ArgSpec::Address, ArgSpec::Amount]
    }

    fn contract(&self, args: &[Value]) -> Result<AssetContract> {
        let asset = addr_arg(self.name(), args, 0)?;
        Ok(AssetContract {
            consumes: Vec::new(),
            produces: vec![asset],
        })
    }

    fn plan(&self, user: &Address, args: &[Value], _view: &BalanceView<'_>) -> Result<OpPlan> {
        let asset = addr_arg(self.name(), args, 0)?;
        let amount = amount_arg(self.name(), args, 1)?;
        Ok(OpPlan {
            debits: Vec::new(),
            outputs: vec![PlannedOutput {
                asset: asset.clone(),
                amount: OutputAmount::Exact(amount),
            }],
            ledger_calls: vec![LedgerCall {
                target: self.engine.clone(),
                function: "addFunds".into(),
                args: vec![json!(user), json!(asset), amount_value(amount)],
                value_attached: 0,
            }],
        })
    }
}

/// Arguments: `[path, amount_in, amount_out_min]`. Consumes `path[0]`,
/// produces `path[last]` from the router's Swap event. The slippage guard
/// is the router's job; a guard violation comes back as a normal revert.
#[derive(Debug)]
pub struct Swap {
    router: Address,
}

impl Operation for Swap {
    fn name(&self) -> &str {
        "swap"
    }

    fn schema(&self) -> &'static [ArgSpec] {
        &[ArgSpec::Path, ArgSpec::Amount, ArgSpec::Amount]
    }

    fn contract(&self, args: &[Value]) -> Result<AssetContract> {
        let path = swap_path(self.name(), args, 0)?;
        Ok(AssetContract {
            consumes: vec![path[0].clone()],
            produces: vec![path[path.len() - 1].clone()],
        })
    }

    fn plan(&self, user: &Address, args: &[Value], _view: &BalanceView<'_>) -> Result<OpPlan> {
        let path = swap_path(self.name(), args, 0)?;
        let amount_in = amount_arg(self.name(), args, 1)?;
        let amount_out_min = amount_arg(self.name(), args, 2)?;
        Ok(OpPlan {
            debits: vec![AssetAmount {
                asset: path[0].clone(),
                amount: amount_in,
            }],
            outputs: vec![PlannedOutput {
                asset: path[path.len() - 1].clone(),
                amount: OutputAmount::FromEvent {
                    call: 0,
                    event: "Swap".into(),
                    field: "amount_out".into(),
                },
            }],
            ledger_calls: vec![LedgerCall {
                target: self.router.clone(),
                function: "swapTokens".into(),
                args: vec![
                    json!(user),
                    json!(path),
                    amount_value(amount_in),
                    amount_value(amount_out_min),
                ],
                value_attached: 0,
            }],
        })
    }
}

fn swap_path(op: &str, args: &[Value], i: usize) -> Result<Vec<Address>> {
    let path = path_arg(op, args, i)?;
    if path.len() < 2 {
        return Err(mismatch(op, "swap path needs at least two assets"));
    }
    Ok(path)
}

/// Divides one input amount along two weighted branches.
///
/// Arguments: `[path1, path2, amount_in, weights, remainder]`. Both paths
/// start at the same input asset; weights are basis points out of 10000
/// and may not sum past it, so the allocations can never exceed the input.
/// A one-asset path keeps the input asset (its allocation is exact); a
/// longer path swaps, and the realized amount only exists in the Split
/// event. The remainder policy is explicit, never inferred: "refund"
/// credits unallocated input back, "forfeit" leaves it with the router.
#[derive(Debug)]
pub struct Split {
    router: Address,
}

impl Operation for Split {
    fn name(&self) -> &str {
        "split"
    }

    fn schema(&self) -> &'static [ArgSpec] {
        &[
            ArgSpec::Path,
            ArgSpec::Path,
            ArgSpec::Amount,
            ArgSpec::AmountList,
            ArgSpec::Label,
        ]
    }

    fn contract(&self, args: &[Value]) -> Result<AssetContract> {
        let (path1, path2, _, _, remainder) = self.decode(args)?;
        let mut produces = vec![
            path1[path1.len() - 1].clone(),
            path2[path2.len() - 1].clone(),
        ];
        if remainder == "refund" {
            produces.push(path1[0].clone());
        }
        Ok(AssetContract {
            consumes: vec![path1[0].clone()],
            produces,
        })
    }

    fn plan(&self, user: &Address, args: &[Value], _view: &BalanceView<'_>) -> Result<OpPlan> {
        let (path1, path2, amount_in, weights, remainder) = self.decode(args)?;
        let allocation1 = amount_in * weights[0] / BASIS_POINTS;
        let allocation2 = amount_in * weights[1] / BASIS_POINTS;
        let leftover = amount_in - allocation1 - allocation2;

        let mut outputs = vec![
            split_leg(&path1, allocation1, "amount_out1"),
            split_leg(&path2, allocation2, "amount_out2"),
        ];
        if remainder == "refund" && leftover > 0 {
            outputs.push(PlannedOutput {
                asset: path1[0].clone(),
                amount: OutputAmount::Exact(leftover),
            });
        }

        Ok(OpPlan {
            debits: vec![AssetAmount {
                asset: path1[0].clone(),
                amount: amount_in,
            }],
            outputs,
            ledger_calls: vec![LedgerCall {
                target: self.router.clone(),
                function: "split".into(),
                args: vec![
                    json!(user),
                    json!(path1),
                    json!(path2),
                    amount_value(amount_in),
                    Value::Array(weights.iter().map(|w| amount_value(*w)).collect()),
                    json!(remainder),
                ],
                value_attached: 0,
            }],
        })
    }
}

impl Split {
    fn decode(&self, args: &[Value]) -> Result<(Vec<Address>, Vec<Address>, u128, Vec<u128>, String)> {
        let path1 = path_arg(self.name(), args, 0)?;
        let path2 = path_arg(self.name(), args, 1)?;
        let amount_in = amount_arg(self.name(), args, 2)?;
        let weights = amounts_arg(self.name(), args, 3)?;
        let remainder = label_arg(self.name(), args, 4)?;

        if path1[0] != path2[0] {
            return Err(mismatch(self.name(), "both paths must start at the input asset"));
        }
        if weights.len() != 2 {
            return Err(mismatch(self.name(), "exactly two weights required"));
        }
        if weights[0] + weights[1] > BASIS_POINTS {
            return Err(mismatch(self.name(), "weights exceed 10000 basis points"));
        }
        if remainder != "refund" && remainder != "forfeit" {
            return Err(mismatch(
                self.name(),
                "remainder policy must be 'refund' or 'forfeit'",
            ));
        }
        Ok((path1, path2, amount_in, weights, remainder))
    }
}

fn split_leg(path: &[Address], allocation: u128, event_field: &str) -> PlannedOutput {
    if path.len() == 1 {
        PlannedOutput {
            asset: path[0].clone(),
            amount: OutputAmount::Exact(allocation),
        }
    } else {
        PlannedOutput {
            asset: path[path.len() - 1].clone(),
            amount: OutputAmount::FromEvent {
                call: 0,
                event: "Split".into(),
                field: event_field.into(),
            },
        }
    }
}

/// Arguments: `[vault, lp_token, amount]`. Consumes the LP token, produces
/// vault shares; the share asset is keyed by the vault address.
#[derive(Debug)]
pub struct DepositToFarm;

impl Operation for DepositToFarm {
    fn name(&self) -> &str {
        "deposit_to_farm"
    }

    fn schema(&self) -> &'static [ArgSpec] {
        &[ArgSpec::Address, ArgSpec::Address, ArgSpec::Amount]
    }

    fn contract(&self, args: &[Value]) -> Result<AssetContract> {
        let vault = addr_arg(self.name(), args, 0)?;
        let lp_token = addr_arg(self.name(), args, 1)?;
        Ok(AssetContract {
            consumes: vec![lp_token],
            produces: vec![vault],
        })
    }

    fn plan(&self, user: &Address, args: &[Value], _view: &BalanceView<'_>) -> Result<OpPlan> {
        let vault = addr_arg(self.name(), args, 0)?;
        let lp_token = addr_arg(self.name(), args, 1)?;
        let amount = amount_arg(self.name(), args, 2)?;
        Ok(OpPlan {
            debits: vec![AssetAmount {
                asset: lp_token.clone(),
                amount,
            }],
            outputs: vec![PlannedOutput {
                asset: vault.clone(),
                amount: OutputAmount::FromEvent {
                    call: 0,
                    event: "Deposit".into(),
                    field: "shares".into(),
                },
            }],
            ledger_calls: vec![LedgerCall {
                target: vault,
                function: "deposit".into(),
                args: vec![json!(user), json!(lp_token), amount_value(amount)],
                value_attached: 0,
            }],
        })
    }
}

/// Arguments: `[vault, lp_token, shares]`. The single authoritative shape:
/// plain positional arguments, no recipe-id tuple.
#[derive(Debug)]
pub struct WithdrawFromFarm;

impl Operation for WithdrawFromFarm {
    fn name(&self) -> &str {
        "withdraw_from_farm"
    }

    fn schema(&self) -> &'static [ArgSpec] {
        &[ArgSpec::Address, ArgSpec::Address, ArgSpec::Amount]
    }

    fn contract(&self, args: &[Value]) -> Result<AssetContract> {
        let vault = addr_arg(self.name(), args, 0)?;
        let lp_token = addr_arg(self.name(), args, 1)?;
        Ok(AssetContract {
            consumes: vec![vault],
            produces: vec![lp_token],
        })
    }

    fn plan(&self, user: &Address, args: &[Value], _view: &BalanceView<'_>) -> Result<OpPlan> {
        let vault = addr_arg(self.name(), args, 0)?;
        let lp_token = addr_arg(self.name(), args, 1)?;
        let shares = amount_arg(self.name(), args, 2)?;
        Ok(OpPlan {
            debits: vec![AssetAmount {
                asset: vault.clone(),
                amount: shares,
            }],
            outputs: vec![PlannedOutput {
                asset: lp_token,
                amount: OutputAmount::FromEvent {
                    call: 0,
                    event: "Withdraw".into(),
                    field: "amount".into(),
                },
            }],
            ledger_calls: vec![LedgerCall {
                target: vault,
                function: "withdraw".into(),
                args: vec![json!(user), amount_value(shares)],
                value_attached: 0,
            }],
        })
    }
}

/// Arguments: `[path, index_token, long, amount, index_price,
/// amount_out_min, provider]`. The position is custody of the external
/// perp provider, so nothing is credited back; the engine's books only
/// record the debit.
#[derive(Debug)]
pub struct OpenLeveragedPosition {
    perp_router: Address,
}

impl Operation for OpenLeveragedPosition {
    fn name(&self) -> &str {
        "open_leveraged_position"
    }

    fn schema(&self) -> &'static [ArgSpec] {
        &[
            ArgSpec::Path,
            ArgSpec::Address,
            ArgSpec::Bool,
            ArgSpec::Amount,
            ArgSpec::Amount,
            ArgSpec::Amount,
            ArgSpec::Amount,
        ]
    }

    fn contract(&self, args: &[Value]) -> Result<AssetContract> {
        let path = path_arg(self.name(), args, 0)?;
        Ok(AssetContract {
            consumes: vec![path[0].clone()],
            produces: Vec::new(),
        })
    }

    fn plan(&self, user: &Address, args: &[Value], _view: &BalanceView<'_>) -> Result<OpPlan> {
        let path = path_arg(self.name(), args, 0)?;
        let index_token = addr_arg(self.name(), args, 1)?;
        let long = bool_arg(self.name(), args, 2)?;
        let amount = amount_arg(self.name(), args, 3)?;
        let index_price = amount_arg(self.name(), args, 4)?;
        let amount_out_min = amount_arg(self.name(), args, 5)?;
        let provider = amount_arg(self.name(), args, 6)?;
        Ok(OpPlan {
            debits: vec![AssetAmount {
                asset: path[0].clone(),
                amount,
            }],
            outputs: Vec::new(),
            ledger_calls: vec![LedgerCall {
                target: self.perp_router.clone(),
                function: "openPosition".into(),
                args: vec![
                    json!(user),
                    json!(path),
                    json!(index_token),
                    json!(long),
                    amount_value(amount),
                    amount_value(index_price),
                    amount_value(amount_out_min),
                    amount_value(provider),
                ],
                value_attached: 0,
            }],
        })
    }
}

/// Terminal operation: consumes the asset and exits the engine's books.
/// Arguments: `[asset, amount]`.
#[derive(Debug)]
pub struct SendToWallet {
    engine: Address,
}

impl Operation for SendToWallet {
    fn name(&self) -> &str {
        "send_to_wallet"
    }

    fn schema(&self) -> &'static [ArgSpec] {
        &[ArgSpec::Address, ArgSpec::Amount]
    }

    fn contract(&self, args: &[Value]) -> Result<AssetContract> {
        let asset = addr_arg(self.name(), args, 0)?;
        Ok(AssetContract {
            consumes: vec![asset],
            produces: Vec::new(),
        })
    }

    fn plan(&self, user: &Address, args: &[Value], _view: &BalanceView<'_>) -> Result<OpPlan> {
        let asset = addr_arg(self.name(), args, 0)?;
        let amount = amount_arg(self.name(), args, 1)?;
        Ok(OpPlan {
            debits: vec![AssetAmount {
                asset: asset.clone(),
                amount,
            }],
            outputs: Vec::new(),
            ledger_calls: vec![LedgerCall {
                target: self.engine.clone(),
                function: "sendToWallet".into(),
                args: vec![json!(user), json!(asset), amount_value(amount)],
                value_attached: 0,
            }],
        })
    }
}
