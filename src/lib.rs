//! Cross-pair arbitrage detection for constant-product AMMs
//!
//! Pair state flows in through [`dex::update`] into a [`store::PairStore`];
//! the [`arbitrage::ArbitrageEngine`] periodically turns a snapshot of that
//! store into a rate graph, looks for a negative cycle through the base token,
//! sizes it and hands it to an [`execution::TradeExecutor`].

pub mod arbitrage;
pub mod config;
pub mod dex;
pub mod error;
pub mod execution;
pub mod gas;
pub mod graph;
pub mod snapshot;
pub mod store;
