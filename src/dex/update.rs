//! Typed pair updates as produced by the event and read feeds

use alloy::primitives::{Address, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::fee::SyncEvent;
use super::{Inherited, Pair, Protocol, Provenance};
use crate::store::PairStore;

/// One decoded change to a pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairUpdate {
    /// `Sync` log: reserves only, token identity comes from the store
    Sync {
        pair: Address,
        reserve0: U256,
        reserve1: U256,
        fee: Option<u32>,
        provenance: Provenance,
    },
    /// Full on-chain read of the pair contract
    Snapshot {
        pair: Address,
        token0: Address,
        token1: Address,
        reserve0: U256,
        reserve1: U256,
        fee: Option<u32>,
        provenance: Provenance,
    },
    /// A read for this pair failed; it stays out of pricing until refreshed
    ReadFailed { pair: Address, provenance: Provenance },
    /// Previously persisted state, error flag included
    Restored(Pair),
}

impl PairUpdate {
    pub fn address(&self) -> Address {
        match self {
            PairUpdate::Sync { pair, .. }
            | PairUpdate::Snapshot { pair, .. }
            | PairUpdate::ReadFailed { pair, .. } => *pair,
            PairUpdate::Restored(pair) => pair.address,
        }
    }

    /// Build the pair value this update proposes. Missing fields are filled
    /// from the stored value when the store accepts it.
    pub fn into_pair(self) -> Pair {
        match self {
            PairUpdate::Sync {
                pair,
                reserve0,
                reserve1,
                fee,
                provenance,
            } => Pair {
                protocol: Protocol::UniswapV2,
                address: pair,
                token0: Address::ZERO,
                token1: Address::ZERO,
                reserve0,
                reserve1,
                fee,
                error: false,
                provenance,
                inherited: Inherited::default(),
            },
            PairUpdate::Snapshot {
                pair,
                token0,
                token1,
                reserve0,
                reserve1,
                fee,
                provenance,
            } => Pair {
                protocol: Protocol::UniswapV2,
                address: pair,
                token0,
                token1,
                reserve0,
                reserve1,
                fee,
                error: false,
                provenance,
                inherited: Inherited::default(),
            },
            PairUpdate::ReadFailed { pair, provenance } => Pair {
                protocol: Protocol::UniswapV2,
                address: pair,
                token0: Address::ZERO,
                token1: Address::ZERO,
                reserve0: U256::ZERO,
                reserve1: U256::ZERO,
                fee: None,
                error: true,
                provenance,
                inherited: Inherited::default(),
            },
            PairUpdate::Restored(pair) => pair,
        }
    }
}

impl From<SyncEvent> for PairUpdate {
    fn from(event: SyncEvent) -> Self {
        PairUpdate::Sync {
            pair: event.pair,
            reserve0: event.reserve0,
            reserve1: event.reserve1,
            fee: None,
            provenance: event.provenance,
        }
    }
}

/// Attach inferred fees to every update of the matching pairs that has none
pub fn attach_fees(updates: &mut [PairUpdate], fees: &HashMap<Address, u32>) {
    for update in updates.iter_mut() {
        match update {
            PairUpdate::Sync { pair, fee, .. } | PairUpdate::Snapshot { pair, fee, .. } => {
                if fee.is_none() {
                    *fee = fees.get(&*pair).copied();
                }
            }
            PairUpdate::ReadFailed { .. } | PairUpdate::Restored(_) => {}
        }
    }
}

/// Apply one batch of updates to the store
pub fn apply_batch(store: &PairStore, batch: Vec<PairUpdate>) -> usize {
    store.store_pairs(batch.into_iter().map(PairUpdate::into_pair))
}

/// Drain an update feed into the store until the feed closes or shutdown fires.
///
/// Several of these may run at once, one per feed.
pub async fn ingest(
    store: Arc<PairStore>,
    mut feed: mpsc::Receiver<Vec<PairUpdate>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut applied = 0usize;
    loop {
        tokio::select! {
            batch = feed.recv() => {
                let Some(batch) = batch else {
                    debug!("Update feed closed");
                    break;
                };
                let received = batch.len();
                let changed = apply_batch(&store, batch);
                applied += changed;
                debug!("Applied {}/{} pair updates", changed, received);
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("Update feed stopped after {} applied updates", applied);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::test_helpers::*;

    fn snapshot_update(block: u64, reserve: u128) -> PairUpdate {
        PairUpdate::Snapshot {
            pair: addr(1),
            token0: token(1),
            token1: token(2),
            reserve0: U256::from(reserve),
            reserve1: U256::from(reserve),
            fee: Some(25),
            provenance: Provenance::end_of_block(block, 0),
        }
    }

    fn sync_update(block: u64, log: u64, reserve: u128) -> PairUpdate {
        PairUpdate::Sync {
            pair: addr(1),
            reserve0: U256::from(reserve),
            reserve1: U256::from(reserve * 2),
            fee: None,
            provenance: Provenance::new(block, 0, log, 0),
        }
    }

    #[test]
    fn test_sync_inherits_identity_and_fee() {
        let store = PairStore::new();
        apply_batch(&store, vec![snapshot_update(10, 1_000)]);
        apply_batch(&store, vec![sync_update(11, 3, 500)]);

        let p = store.get_at(&addr(1), 0).expect("stored");
        assert_eq!(p.token0, token(1));
        assert_eq!(p.fee, Some(25));
        assert_eq!(p.reserve1, U256::from(1_000u64));
        assert!(p.is_priceable());
    }

    #[test]
    fn test_sync_before_identity_is_not_priceable() {
        let store = PairStore::new();
        apply_batch(&store, vec![sync_update(11, 3, 500)]);
        let p = store.get_at(&addr(1), 0).expect("stored");
        assert!(!p.is_priceable());

        // identity read lands later but from an older block
        apply_batch(&store, vec![snapshot_update(10, 1_000)]);
        let p = store.get_at(&addr(1), 0).expect("stored");
        assert!(p.is_priceable());
        assert_eq!(p.reserve0, U256::from(500u64));
    }

    #[test]
    fn test_failed_read_flags_until_full_refresh() {
        let store = PairStore::new();
        apply_batch(&store, vec![snapshot_update(10, 1_000)]);
        apply_batch(
            &store,
            vec![PairUpdate::ReadFailed {
                pair: addr(1),
                provenance: Provenance::end_of_block(11, 0),
            }],
        );
        let p = store.get_at(&addr(1), 0).expect("stored");
        assert!(p.error);
        assert_eq!(p.reserve0, U256::from(1_000u64));
        assert!(!p.is_priceable());

        apply_batch(&store, vec![sync_update(12, 0, 800)]);
        assert!(store.get_at(&addr(1), 0).expect("stored").error);

        apply_batch(&store, vec![snapshot_update(12, 900)]);
        let p = store.get_at(&addr(1), 0).expect("stored");
        assert!(!p.error);
        assert!(p.is_priceable());
    }

    #[test]
    fn test_attach_fees_keeps_reported_fee() {
        let mut updates = vec![sync_update(1, 0, 10), snapshot_update(1, 10)];
        let fees = HashMap::from([(addr(1), 30u32)]);
        attach_fees(&mut updates, &fees);
        assert!(matches!(updates[0], PairUpdate::Sync { fee: Some(30), .. }));
        assert!(matches!(updates[1], PairUpdate::Snapshot { fee: Some(25), .. }));
    }

    #[test]
    fn test_sync_logs_carry_inferred_fee_into_store() {
        use crate::dex::fee::{infer_fees, SwapEvent};
        use crate::dex::get_amount_out;

        let pre0 = U256::from(1_000 * E18);
        let pre1 = U256::from(2_000 * E18);
        let amount_in = U256::from(E18);
        let amount_out = get_amount_out(amount_in, pre0, pre1, 25);
        let sync = SyncEvent {
            pair: addr(1),
            reserve0: pre0 + amount_in,
            reserve1: pre1 - amount_out,
            provenance: Provenance::new(50, 1, 4, 0),
        };
        let swap = SwapEvent {
            pair: addr(1),
            amount0_in: amount_in,
            amount1_in: U256::ZERO,
            amount0_out: U256::ZERO,
            amount1_out: amount_out,
            provenance: Provenance::new(50, 1, 5, 0),
        };

        let fees = infer_fees(&[swap], std::slice::from_ref(&sync));
        let mut updates: Vec<PairUpdate> = vec![sync.into()];
        attach_fees(&mut updates, &fees);
        assert_eq!(updates[0].address(), addr(1));

        let store = PairStore::new();
        apply_batch(&store, updates);
        assert_eq!(store.get_at(&addr(1), 0).and_then(|p| p.fee), Some(25));
    }

    #[test]
    fn test_restored_pair_keeps_error_flag() {
        let mut errored = pair(1, token(1), token(2), 1_000, 1_000);
        errored.error = true;
        let store = PairStore::new();
        apply_batch(&store, vec![PairUpdate::Restored(errored)]);

        let p = store.get_at(&addr(1), 0).expect("stored");
        assert!(p.error);
        assert_eq!(p.reserve0, U256::from(1_000u64));
        assert!(!p.is_priceable());
    }

    #[tokio::test]
    async fn test_ingest_drains_multiple_feeds() {
        let store = Arc::new(PairStore::new());
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (tx_a, rx_a) = mpsc::channel(8);
        let (tx_b, rx_b) = mpsc::channel(8);

        let a = tokio::spawn(ingest(Arc::clone(&store), rx_a, stop_rx.clone()));
        let b = tokio::spawn(ingest(Arc::clone(&store), rx_b, stop_rx));

        // feed b delivers the newer state first
        tx_b.send(vec![snapshot_update(20, 7)]).await.expect("send");
        tx_a.send(vec![snapshot_update(5, 3)]).await.expect("send");
        drop(tx_a);
        drop(tx_b);
        a.await.expect("task");
        b.await.expect("task");

        let p = store.get_at(&addr(1), 0).expect("stored");
        assert_eq!(p.reserve0, U256::from(7u64));
    }
}
