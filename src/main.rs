use alloy::primitives::U256;
use alloy::providers::ProviderBuilder;
use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cycle_arb::arbitrage::{
    ArbitrageEngine, ArbitrageLoopFinder, ProfitabilitySearch, SearchOutcome,
};
use cycle_arb::config::{eth_to_wei, wei_to_eth, Config};
use cycle_arb::dex::fee::calculate_pair_fee;
use cycle_arb::dex::update::{ingest, PairUpdate};
use cycle_arb::execution::DryRunExecutor;
use cycle_arb::gas::{self, GasOracle, GasPriceSource, GasSnapshot, RpcGasSource};
use cycle_arb::snapshot::{self, SnapshotFile};
use cycle_arb::store::PairStore;

#[derive(Parser)]
#[command(name = "cycle-arb")]
#[command(about = "Cross-pair AMM arbitrage monitor", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detection engine (default)
    Run {
        /// Replay pair records from a JSON-lines file as a live update feed
        #[arg(long)]
        replay: Option<PathBuf>,
    },

    /// Detect and size one loop from a snapshot file, then exit
    Scan {
        /// Snapshot file (defaults to SNAPSHOT_PATH)
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Override the minimum profit floor, in ETH
        #[arg(long)]
        min_receive_eth: Option<rust_decimal::Decimal>,
    },

    /// Infer a pair fee from one swap and the reserves after it
    Fee {
        amount0_in: U256,
        amount1_in: U256,
        amount0_out: U256,
        amount1_out: U256,
        reserve0: U256,
        reserve1: U256,
    },
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::TRACE)
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::TRACE)
            .with_env_filter(filter)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

async fn run_engine(config: Config, replay: Option<PathBuf>) -> Result<()> {
    if !config.dry_run {
        eyre::bail!("no signing executor is configured; set DRY_RUN=true");
    }

    let store = Arc::new(PairStore::new());
    let snapshot_file = SnapshotFile::new(&config.snapshot_path);
    snapshot_file.restore_into(&store)?;

    let local_url: reqwest::Url = config.rpc_url.parse().wrap_err("invalid RPC_URL")?;
    let local: Arc<dyn GasPriceSource> =
        Arc::new(RpcGasSource::new("local", ProviderBuilder::new().connect_http(local_url)));
    let reference: Option<Arc<dyn GasPriceSource>> = match &config.reference_rpc_url {
        Some(url) => {
            let url: reqwest::Url = url.parse().wrap_err("invalid REFERENCE_RPC_URL")?;
            let source: Arc<dyn GasPriceSource> =
                Arc::new(RpcGasSource::new("reference", ProviderBuilder::new().connect_http(url)));
            Some(source)
        }
        None => {
            warn!("REFERENCE_RPC_URL not set, reference gas stays at its default");
            None
        }
    };

    let oracle = Arc::new(GasOracle::new(GasSnapshot::default()));
    let executor = Arc::new(DryRunExecutor::with_store(Arc::clone(&store)));
    let engine = Arc::new(ArbitrageEngine::new(
        &config,
        Arc::clone(&store),
        Arc::clone(&oracle),
        executor,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = vec![
        tokio::spawn(gas::run_gas_refresh(
            Arc::clone(&oracle),
            local,
            reference,
            config.gas_refresh_interval,
            shutdown_rx.clone(),
        )),
        tokio::spawn(snapshot::run_periodic_writer(
            snapshot_file,
            Arc::clone(&store),
            config.snapshot_interval,
            shutdown_rx.clone(),
        )),
        tokio::spawn(Arc::clone(&engine).run(shutdown_rx.clone())),
    ];

    if let Some(path) = replay {
        let (feed_tx, feed_rx) = mpsc::channel(64);
        tasks.push(tokio::spawn(ingest(Arc::clone(&store), feed_rx, shutdown_rx.clone())));
        tasks.push(tokio::spawn(async move {
            if let Err(e) = replay_file(path, feed_tx).await {
                warn!("Replay feed failed: {:#}", e);
            }
        }));
    }

    info!("Base token {}, min receive {} ETH", config.base_token, wei_to_eth(config.min_receive));
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown_tx.send(true).ok();

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            warn!("Task ended abnormally: {}", e);
        }
    }
    Ok(())
}

/// Stream a snapshot-format file into the update feed in small batches
async fn replay_file(path: PathBuf, feed: mpsc::Sender<Vec<PairUpdate>>) -> Result<()> {
    let pairs = tokio::task::spawn_blocking(move || SnapshotFile::new(path).load()).await??;
    info!("Replaying {} pair records", pairs.len());
    for chunk in pairs.chunks(100) {
        let batch = chunk.iter().cloned().map(PairUpdate::Restored).collect();
        if feed.send(batch).await.is_err() {
            break;
        }
    }
    Ok(())
}

fn run_scan(
    mut config: Config,
    snapshot: Option<PathBuf>,
    min_receive_eth: Option<rust_decimal::Decimal>,
) -> Result<()> {
    if let Some(amount) = min_receive_eth {
        config.min_receive =
            eth_to_wei(amount).ok_or_else(|| eyre::eyre!("min receive out of range: {amount}"))?;
    }
    let path = snapshot.unwrap_or_else(|| config.snapshot_path.clone());

    let store = PairStore::new();
    SnapshotFile::new(&path).restore_into(&store)?;

    let finder = ArbitrageLoopFinder::new(config.base_token, config.max_relax_passes);
    let Some(found) = finder.find(&store) else {
        println!("No loop through {} in {} pairs", config.base_token, store.len());
        return Ok(());
    };

    println!("Loop ({} hops, expected return {:.6}):", found.hop_count(), found.expected_return);
    for (pair, token) in found.pairs.iter().zip(&found.tokens) {
        println!(
            "  {} via {} {} (fee {})",
            token,
            pair.protocol,
            pair.address,
            pair.effective_fee()
        );
    }

    let search = ProfitabilitySearch::new(config.base_token, config.min_receive);
    match search.try_size(&found.pairs, &GasSnapshot::default()) {
        SearchOutcome::Profitable(size) => println!(
            "Profitable: in {} ETH, out {} ETH, profit {} ETH ({} trials)",
            wei_to_eth(size.amount_in),
            wei_to_eth(size.amount_out),
            wei_to_eth(size.profit()),
            size.iterations
        ),
        SearchOutcome::NoProfitableSize { iterations } => {
            println!("No profitable size after {iterations} trials")
        }
        SearchOutcome::InvalidPath => println!("Loop does not chain through the base token"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    match cli.command {
        Some(Commands::Run { replay }) => run_engine(Config::from_env()?, replay).await,
        None => run_engine(Config::from_env()?, None).await,
        Some(Commands::Scan { snapshot, min_receive_eth }) => {
            run_scan(Config::from_env()?, snapshot, min_receive_eth)
        }
        Some(Commands::Fee {
            amount0_in,
            amount1_in,
            amount0_out,
            amount1_out,
            reserve0,
            reserve1,
        }) => {
            let fee = calculate_pair_fee(
                amount0_in,
                amount1_in,
                amount0_out,
                amount1_out,
                reserve0,
                reserve1,
            );
            println!("{fee}");
            Ok(())
        }
    }
}
