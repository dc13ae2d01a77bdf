//! Detection loop
//!
//! Each tick reads a snapshot, looks for a loop and hands it to a spawned
//! task. Sizing and execution run in that task, so a slow executor never
//! delays the next tick.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::finder::{ArbLoop, ArbitrageLoopFinder};
use super::profit::{ProfitabilitySearch, SearchOutcome};
use super::suppressor::DuplicateSuppressor;
use crate::config::{wei_to_eth, Config};
use crate::error::ExecutionError;
use crate::execution::{ExecutionReport, TradeExecutor, TradeIntent};
use crate::gas::GasOracle;
use crate::store::PairStore;

const EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);
const PURGE_EVERY_TICKS: u64 = 1_000;

/// What happened to one detected loop
#[derive(Debug)]
pub enum AttemptOutcome {
    Executed(ExecutionReport),
    Suppressed,
    NoProfitableSize,
    InvalidPath,
    Failed { error: ExecutionError, failures: u32 },
}

pub struct ArbitrageEngine {
    store: Arc<PairStore>,
    finder: ArbitrageLoopFinder,
    search: ProfitabilitySearch,
    suppressor: DuplicateSuppressor,
    gas: Arc<GasOracle>,
    executor: Arc<dyn TradeExecutor>,
    tick_interval: Duration,
}

impl ArbitrageEngine {
    pub fn new(
        config: &Config,
        store: Arc<PairStore>,
        gas: Arc<GasOracle>,
        executor: Arc<dyn TradeExecutor>,
    ) -> Self {
        Self {
            store,
            finder: ArbitrageLoopFinder::new(config.base_token, config.max_relax_passes),
            search: ProfitabilitySearch::new(config.base_token, config.min_receive),
            suppressor: DuplicateSuppressor::default(),
            gas,
            executor,
            tick_interval: config.tick_interval,
        }
    }

    pub fn suppressor(&self) -> &DuplicateSuppressor {
        &self.suppressor
    }

    /// One detection pass. Never awaits; a found loop is evaluated on its own task.
    pub fn tick(self: &Arc<Self>) -> Option<JoinHandle<AttemptOutcome>> {
        let found = self.finder.find(&self.store)?;
        debug!(
            "Loop {} hops, expected return {:.4}%",
            found.hop_count(),
            (found.expected_return - 1.0) * 100.0
        );
        let engine = Arc::clone(self);
        Some(tokio::spawn(async move { engine.evaluate(found).await }))
    }

    /// Size the loop, gate duplicates, execute and record failures
    pub async fn evaluate(&self, found: ArbLoop) -> AttemptOutcome {
        let gas = self.gas.snapshot();

        let size = match self.search.try_size(&found.pairs, &gas) {
            SearchOutcome::Profitable(size) => size,
            SearchOutcome::NoProfitableSize { iterations } => {
                debug!("No profitable size after {} trials", iterations);
                return AttemptOutcome::NoProfitableSize;
            }
            SearchOutcome::InvalidPath => {
                warn!("Loop {:?} does not chain through the base token", found.pair_addresses());
                return AttemptOutcome::InvalidPath;
            }
        };

        let key = found.key();
        if !self.suppressor.admit(&key) {
            debug!("Suppressed repeat of loop {}", key);
            return AttemptOutcome::Suppressed;
        }

        info!(
            "Arbitrage: {} hops, in {} ETH, out {} ETH, margin {} ETH",
            found.hop_count(),
            wei_to_eth(size.amount_in),
            wei_to_eth(size.amount_out),
            wei_to_eth(size.margin)
        );
        let intent = TradeIntent {
            base: self.finder.base(),
            amount_in: size.amount_in,
            expected_out: size.amount_out,
            path: found.pairs,
        };

        let execution = self.executor.execute(&intent, gas);
        let result = match tokio::time::timeout(EXECUTION_TIMEOUT, execution).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout),
        };

        match result {
            Ok(report) => AttemptOutcome::Executed(report),
            Err(error) => {
                let failures = self.suppressor.report_failure(&key);
                warn!("Execution failed ({} so far): {}", failures, error);
                AttemptOutcome::Failed { error, failures }
            }
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        info!("Detection loop started ({:?} tick)", self.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ticks += 1;
                    let _ = self.tick();
                    if ticks % PURGE_EVERY_TICKS == 0 {
                        let purged = self.suppressor.purge_expired(Instant::now());
                        if purged > 0 {
                            debug!("Purged {} expired loop keys", purged);
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Detection loop stopped after {} ticks", ticks);
    }
}
