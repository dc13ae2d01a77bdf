//! Trade execution seam
//!
//! The engine hands a sized loop to a [`TradeExecutor`] and only cares whether
//! it landed. Signing and broadcast live behind this trait; the bundled
//! [`DryRunExecutor`] runs the last-moment profitability check and logs.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::arbitrage::suppressor::loop_key;
use crate::config::thresholds::FINAL_CHECK_FEE_MULTIPLE_PCT;
use crate::config::wei_to_eth;
use crate::dex::{get_amounts_out, Pair};
use crate::error::ExecutionError;
use crate::gas::GasSnapshot;
use crate::store::PairStore;

/// A sized trade ready to be sent
#[derive(Debug, Clone)]
pub struct TradeIntent {
    pub base: Address,
    pub amount_in: U256,
    pub expected_out: U256,
    /// Pairs in trade order; the first one receives the base token
    pub path: Vec<Arc<Pair>>,
}

impl TradeIntent {
    pub fn pair_addresses(&self) -> Vec<Address> {
        self.path.iter().map(|p| p.address).collect()
    }

    /// Duplicate-suppression key for this path
    pub fn key(&self) -> String {
        loop_key(&self.pair_addresses())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub amount_in: U256,
    pub amount_out: U256,
    pub gas_price: u128,
    pub simulated: bool,
}

#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(
        &self,
        intent: &TradeIntent,
        gas: GasSnapshot,
    ) -> Result<ExecutionReport, ExecutionError>;
}

/// Recompute the loop output and require profit of at least 1.2x the gas fee
pub fn final_check(
    base: Address,
    amount_in: U256,
    path: &[Arc<Pair>],
    gas: &GasSnapshot,
) -> Result<U256, ExecutionError> {
    let amount_out = get_amounts_out(base, amount_in, path);
    if amount_out.is_zero() {
        return Err(ExecutionError::InvalidPath);
    }

    let estimated_fee = gas.estimate_cost(path.len());
    let profit = amount_out.saturating_sub(amount_in);
    let required = estimated_fee.saturating_mul(U256::from(FINAL_CHECK_FEE_MULTIPLE_PCT));
    if profit.saturating_mul(U256::from(100u64)) < required {
        return Err(ExecutionError::FinalCheck {
            amount_in,
            amount_out,
            estimated_fee,
        });
    }
    Ok(amount_out)
}

/// Executor that never signs anything. With a store attached, the final
/// check runs on the latest pair states instead of the ones the loop was
/// sized on.
#[derive(Default)]
pub struct DryRunExecutor {
    store: Option<Arc<PairStore>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<PairStore>) -> Self {
        Self { store: Some(store) }
    }

    fn latest_path(&self, path: &[Arc<Pair>]) -> Vec<Arc<Pair>> {
        match &self.store {
            Some(store) => path
                .iter()
                .map(|p| store.get(&p.address).unwrap_or_else(|| Arc::clone(p)))
                .collect(),
            None => path.to_vec(),
        }
    }
}

#[async_trait]
impl TradeExecutor for DryRunExecutor {
    async fn execute(
        &self,
        intent: &TradeIntent,
        gas: GasSnapshot,
    ) -> Result<ExecutionReport, ExecutionError> {
        let path = self.latest_path(&intent.path);
        let amount_out = final_check(intent.base, intent.amount_in, &path, &gas)?;

        info!(
            "[DRY RUN] would trade {} ETH -> {} ETH over {} pairs at {} wei gas",
            wei_to_eth(intent.amount_in),
            wei_to_eth(amount_out),
            path.len(),
            gas.preferred_gas_price()
        );

        Ok(ExecutionReport {
            amount_in: intent.amount_in,
            amount_out,
            gas_price: gas.preferred_gas_price(),
            simulated: true,
        })
    }
}
