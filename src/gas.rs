//! Gas price state shared between the watcher and the sizing tasks
//!
//! Two feeds are tracked: the local chain where trades land, and a reference
//! chain (L1) whose congestion is used as a risk signal. Both scale the
//! minimum profit margin in steps rather than continuously.

use alloy::primitives::U256;
use alloy::providers::Provider;
use async_trait::async_trait;
use eyre::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::thresholds::{
    DEFAULT_LOCAL_GAS_PRICE, DEFAULT_REFERENCE_GAS_PRICE, LOCAL_GAS_STEPS, REFERENCE_GAS_STEPS,
};

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Gas units a swap through `hops` pairs is expected to burn
pub fn swap_gas(hops: usize) -> u64 {
    match hops {
        2 => 210_000,
        3 => 250_000,
        4 => 320_000,
        5 => 360_000,
        n => 80_000 + 60_000 * n as u64,
    }
}

/// Point-in-time view of both gas feeds, in wei
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasSnapshot {
    pub local_wei: u128,
    pub reference_wei: u128,
}

impl Default for GasSnapshot {
    fn default() -> Self {
        Self {
            local_wei: DEFAULT_LOCAL_GAS_PRICE,
            reference_wei: DEFAULT_REFERENCE_GAS_PRICE,
        }
    }
}

impl GasSnapshot {
    /// Price the executor bids; L2 sequencers order by priority so a tenth
    /// of the quoted price is enough.
    pub fn preferred_gas_price(&self) -> u128 {
        (self.local_wei / 10).max(1)
    }

    /// Factor applied to the minimum-receive floor
    pub fn margin_multiplier(&self) -> u64 {
        step(self.local_wei, &LOCAL_GAS_STEPS).max(step(self.reference_wei, &REFERENCE_GAS_STEPS))
    }

    /// Worst-case fee for a loop of `hops` swaps at the quoted local price
    pub fn estimate_cost(&self, hops: usize) -> U256 {
        U256::from(swap_gas(hops)) * U256::from(self.local_wei)
    }
}

fn step(price: u128, steps: &[(u128, u64)]) -> u64 {
    steps
        .iter()
        .filter(|(threshold, _)| price > *threshold)
        .map(|(_, multiplier)| *multiplier)
        .max()
        .unwrap_or(1)
}

/// Latest gas prices, written by the refresh task and read by sizing
#[derive(Debug, Default)]
pub struct GasOracle {
    snapshot: RwLock<GasSnapshot>,
}

impl GasOracle {
    pub fn new(initial: GasSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(initial),
        }
    }

    pub fn snapshot(&self) -> GasSnapshot {
        *self.snapshot.read()
    }

    /// A zero reading is a broken feed, not free gas
    pub fn set_local(&self, wei: u128) {
        if wei > 0 {
            self.snapshot.write().local_wei = wei;
        }
    }

    pub fn set_reference(&self, wei: u128) {
        if wei > 0 {
            self.snapshot.write().reference_wei = wei;
        }
    }
}

#[async_trait]
pub trait GasPriceSource: Send + Sync {
    fn name(&self) -> &str;
    async fn gas_price(&self) -> Result<u128>;
}

/// `eth_gasPrice` over any alloy provider
pub struct RpcGasSource<P> {
    name: String,
    provider: P,
}

impl<P> RpcGasSource<P> {
    pub fn new(name: impl Into<String>, provider: P) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }
}

#[async_trait]
impl<P> GasPriceSource for RpcGasSource<P>
where
    P: Provider + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(self.provider.get_gas_price().await?)
    }
}

async fn fetch(source: &dyn GasPriceSource) -> Option<u128> {
    match tokio::time::timeout(FETCH_TIMEOUT, source.gas_price()).await {
        Ok(Ok(price)) => Some(price),
        Ok(Err(e)) => {
            warn!("Gas price fetch from {} failed: {}", source.name(), e);
            None
        }
        Err(_) => {
            warn!("Gas price fetch from {} timed out", source.name());
            None
        }
    }
}

/// Poll both feeds once. A failed feed keeps its previous value.
pub async fn refresh_once(
    oracle: &GasOracle,
    local: &dyn GasPriceSource,
    reference: Option<&dyn GasPriceSource>,
) {
    if let Some(price) = fetch(local).await {
        oracle.set_local(price);
    }
    if let Some(source) = reference {
        if let Some(price) = fetch(source).await {
            oracle.set_reference(price);
        }
    }
    let snapshot = oracle.snapshot();
    debug!(
        "Gas: local {} wei, reference {} wei, margin x{}",
        snapshot.local_wei,
        snapshot.reference_wei,
        snapshot.margin_multiplier()
    );
}

pub async fn run_gas_refresh(
    oracle: Arc<GasOracle>,
    local: Arc<dyn GasPriceSource>,
    reference: Option<Arc<dyn GasPriceSource>>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                refresh_once(&oracle, local.as_ref(), reference.as_deref()).await;
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("Gas refresh stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u128);

    #[async_trait]
    impl GasPriceSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn gas_price(&self) -> Result<u128> {
            Ok(self.0)
        }
    }

    struct Broken;

    #[async_trait]
    impl GasPriceSource for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        async fn gas_price(&self) -> Result<u128> {
            Err(eyre::eyre!("connection refused"))
        }
    }

    #[test]
    fn test_swap_gas_table() {
        assert_eq!(swap_gas(2), 210_000);
        assert_eq!(swap_gas(3), 250_000);
        assert_eq!(swap_gas(4), 320_000);
        assert_eq!(swap_gas(5), 360_000);
        assert_eq!(swap_gas(6), 440_000);
        assert_eq!(swap_gas(1), 140_000);
    }

    #[test]
    fn test_margin_multiplier_steps() {
        let calm = GasSnapshot::default();
        assert_eq!(calm.margin_multiplier(), 1);

        let busy_local = GasSnapshot {
            local_wei: 2_000_000_000,
            ..calm
        };
        assert_eq!(busy_local.margin_multiplier(), 2);

        let busy_reference = GasSnapshot {
            reference_wei: 200_000_000_000,
            ..calm
        };
        assert_eq!(busy_reference.margin_multiplier(), 4);

        // exactly at a threshold does not trigger it
        let edge = GasSnapshot {
            local_wei: 1_000_000_000,
            ..calm
        };
        assert_eq!(edge.margin_multiplier(), 1);
    }

    #[test]
    fn test_cost_and_preferred_price() {
        let gas = GasSnapshot::default();
        assert_eq!(gas.estimate_cost(3), U256::from(250_000u64 * 120_000_000));
        assert_eq!(gas.preferred_gas_price(), 12_000_000);
        let tiny = GasSnapshot {
            local_wei: 5,
            reference_wei: 1,
        };
        assert_eq!(tiny.preferred_gas_price(), 1);
    }

    #[test]
    fn test_oracle_ignores_zero() {
        let oracle = GasOracle::default();
        oracle.set_local(0);
        oracle.set_reference(0);
        assert_eq!(oracle.snapshot(), GasSnapshot::default());
        oracle.set_local(7);
        assert_eq!(oracle.snapshot().local_wei, 7);
    }

    #[tokio::test]
    async fn test_refresh_keeps_last_value_on_failure() {
        let oracle = GasOracle::default();
        refresh_once(&oracle, &Fixed(3_000_000_000), Some(&Broken)).await;
        let snapshot = oracle.snapshot();
        assert_eq!(snapshot.local_wei, 3_000_000_000);
        assert_eq!(snapshot.reference_wei, DEFAULT_REFERENCE_GAS_PRICE);

        refresh_once(&oracle, &Broken, Some(&Fixed(60_000_000_000))).await;
        let snapshot = oracle.snapshot();
        assert_eq!(snapshot.local_wei, 3_000_000_000);
        assert_eq!(snapshot.reference_wei, 60_000_000_000);
    }
}
