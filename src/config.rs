//! Runtime configuration for the cycle arbitrage monitor

use alloy::primitives::{Address, U256};
use eyre::{Result, WrapErr};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration, assembled from the environment (and `.env` if present)
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub reference_rpc_url: Option<String>,
    pub base_token: Address,
    pub snapshot_path: PathBuf,
    pub tick_interval: Duration,
    pub gas_refresh_interval: Duration,
    pub snapshot_interval: Duration,
    pub min_receive: U256, // wei
    pub max_relax_passes: usize, // 0 = textbook |V|-1
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            reference_rpc_url: None,
            base_token: tokens::WETH,
            snapshot_path: PathBuf::from("./data/pairs.jsonl"),
            tick_interval: Duration::from_millis(100),
            gas_refresh_interval: Duration::from_millis(2_000),
            snapshot_interval: Duration::from_secs(60),
            min_receive: eth_to_wei(dec!(0.0001)).unwrap_or(U256::ZERO),
            max_relax_passes: thresholds::DEFAULT_RELAX_PASSES,
            dry_run: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(url) = env::var("RPC_URL") {
            config.rpc_url = url;
        }
        config.reference_rpc_url = env::var("REFERENCE_RPC_URL").ok().filter(|s| !s.is_empty());

        if let Ok(token) = env::var("BASE_TOKEN") {
            config.base_token = Address::from_str(token.trim())
                .wrap_err_with(|| format!("BASE_TOKEN is not an address: {token}"))?;
        }
        if let Ok(path) = env::var("SNAPSHOT_PATH") {
            config.snapshot_path = PathBuf::from(path);
        }
        if let Some(ms) = parse_var::<u64>("TICK_INTERVAL_MS")? {
            config.tick_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = parse_var::<u64>("GAS_REFRESH_MS")? {
            config.gas_refresh_interval = Duration::from_millis(ms.max(100));
        }
        if let Some(secs) = parse_var::<u64>("SNAPSHOT_INTERVAL_SECS")? {
            config.snapshot_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(amount) = parse_var::<Decimal>("MIN_RECEIVE_ETH")? {
            config.min_receive = eth_to_wei(amount)
                .ok_or_else(|| eyre::eyre!("MIN_RECEIVE_ETH out of range: {amount}"))?;
        }
        if let Some(passes) = parse_var::<usize>("MAX_RELAX_PASSES")? {
            config.max_relax_passes = passes;
        }
        if let Some(dry_run) = parse_var::<bool>("DRY_RUN")? {
            config.dry_run = dry_run;
        }

        Ok(config)
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| eyre::eyre!("invalid {name}={raw}: {e}")),
        _ => Ok(None),
    }
}

/// Convert a decimal ETH amount into wei. Negative amounts are rejected.
pub fn eth_to_wei(amount: Decimal) -> Option<U256> {
    if amount.is_sign_negative() {
        return None;
    }
    let wei = amount.checked_mul(dec!(1000000000000000000))?.trunc();
    wei.to_u128().map(U256::from)
}

/// Convert wei into a decimal ETH amount for display
pub fn wei_to_eth(wei: U256) -> Decimal {
    let raw = u128::try_from(wei).unwrap_or(u128::MAX);
    i128::try_from(raw)
        .ok()
        .and_then(|v| Decimal::try_from_i128_with_scale(v, 18).ok())
        .unwrap_or(Decimal::MAX)
}

/// Well-known token addresses
pub mod tokens {
    use alloy::primitives::{address, Address};

    /// Wrapped ether on OP-stack chains
    pub const WETH: Address = address!("4200000000000000000000000000000000000006");
}

/// Tunables for pricing, detection and sizing
pub mod thresholds {
    use std::time::Duration;

    /// Fees are expressed in 1/FEE_BASE units (basis points)
    pub const FEE_BASE: u32 = 10_000;
    /// Fee assumed when none was reported or inference failed (0.30%)
    pub const DEFAULT_FEE: u32 = 30;

    /// Pairs not refreshed for a day are dropped from snapshots
    pub const PAIR_TTL_SECS: i64 = 86_400;

    /// Relaxation passes for the bounded Bellman-Ford
    pub const DEFAULT_RELAX_PASSES: usize = 5;
    /// Longest loop we will walk back through predecessor edges
    pub const MAX_LOOP_HOPS: usize = 10;
    /// Distance improvements smaller than this are float noise
    pub const CYCLE_EPSILON: f64 = 1e-9;

    /// First trial amount is START_FRACTION_PCT% of the entry pair's base reserve
    pub const START_FRACTION_PCT: u64 = 10;
    /// Each failed trial shrinks the amount by SHRINK_NUM / SHRINK_DEN
    pub const SHRINK_NUM: u64 = 4;
    pub const SHRINK_DEN: u64 = 5;

    /// Local gas price steps (wei) and the margin multiplier they trigger
    pub const LOCAL_GAS_STEPS: [(u128, u64); 2] = [(1_000_000_000, 2), (5_000_000_000, 4)];
    /// Reference chain gas price steps (wei)
    pub const REFERENCE_GAS_STEPS: [(u128, u64); 2] = [(50_000_000_000, 2), (150_000_000_000, 4)];

    /// Gas prices assumed until the watcher reports
    pub const DEFAULT_LOCAL_GAS_PRICE: u128 = 120_000_000;
    pub const DEFAULT_REFERENCE_GAS_PRICE: u128 = 20_000_000_000;

    /// Identical loops are attempted at most once per window
    pub const DUPLICATE_TTL: Duration = Duration::from_secs(60 * 60);
    /// Back-off per recorded execution failure
    pub const FAILURE_BACKOFF: Duration = Duration::from_secs(10 * 60);

    /// Executor refuses trades whose profit is under this multiple of the gas fee
    pub const FINAL_CHECK_FEE_MULTIPLE_PCT: u64 = 120;
}
