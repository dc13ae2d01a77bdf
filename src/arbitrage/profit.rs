//! Trade sizing for a detected loop
//!
//! Feasibility, not optimisation: start from a slice of the entry pair's
//! liquidity and shrink until the loop clears the margin or the trial drops
//! below it.

use alloy::primitives::{Address, U256};
use std::sync::Arc;

use crate::config::thresholds::{SHRINK_DEN, SHRINK_NUM, START_FRACTION_PCT};
use crate::dex::{get_amounts_out, Pair};
use crate::gas::GasSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeSize {
    pub amount_in: U256,
    pub amount_out: U256,
    /// Profit floor the trade cleared
    pub margin: U256,
    pub iterations: u32,
}

impl TradeSize {
    pub fn profit(&self) -> U256 {
        self.amount_out.saturating_sub(self.amount_in)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Profitable(TradeSize),
    /// Every trial size fell short of input plus margin
    NoProfitableSize { iterations: u32 },
    /// The pairs do not chain from the base back to the base
    InvalidPath,
}

#[derive(Debug, Clone)]
pub struct ProfitabilitySearch {
    base: Address,
    min_receive: U256,
}

impl ProfitabilitySearch {
    pub fn new(base: Address, min_receive: U256) -> Self {
        Self { base, min_receive }
    }

    /// Minimum profit for a loop of `hops` pairs under current gas
    pub fn margin(&self, hops: usize, gas: &GasSnapshot) -> U256 {
        self.min_receive
            .saturating_mul(U256::from(gas.margin_multiplier()))
            .saturating_add(gas.estimate_cost(hops))
    }

    /// `path` is in trade order: the first pair receives the base token
    pub fn try_size(&self, path: &[Arc<Pair>], gas: &GasSnapshot) -> SearchOutcome {
        if !chains_back_to(self.base, path) {
            return SearchOutcome::InvalidPath;
        }
        let Some(entry_reserve) = path.first().and_then(|p| p.reserve_of(self.base)) else {
            return SearchOutcome::InvalidPath;
        };

        let margin = self.margin(path.len(), gas);
        let mut amount_in = entry_reserve * U256::from(START_FRACTION_PCT) / U256::from(100u64);
        let mut iterations = 0u32;

        loop {
            iterations += 1;
            let amount_out = get_amounts_out(self.base, amount_in, path);

            if amount_out > amount_in.saturating_add(margin) {
                tracing::trace!(
                    "Sized loop after {} trials: {} -> {}",
                    iterations,
                    amount_in,
                    amount_out
                );
                return SearchOutcome::Profitable(TradeSize {
                    amount_in,
                    amount_out,
                    margin,
                    iterations,
                });
            }
            if amount_in < margin || amount_in.is_zero() {
                return SearchOutcome::NoProfitableSize { iterations };
            }
            amount_in = amount_in * U256::from(SHRINK_NUM) / U256::from(SHRINK_DEN);
        }
    }
}

/// Whether `path` carries `base` through every hop and returns it
fn chains_back_to(base: Address, path: &[Arc<Pair>]) -> bool {
    if path.is_empty() {
        return false;
    }
    let mut token = base;
    for pair in path {
        token = if pair.token0 == token {
            pair.token1
        } else if pair.token1 == token {
            pair.token0
        } else {
            return false;
        };
    }
    token == base
}
