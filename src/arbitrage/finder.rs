use alloy::primitives::Address;
use std::sync::Arc;

use super::suppressor::loop_key;
use crate::config::thresholds::MAX_LOOP_HOPS;
use crate::dex::Pair;
use crate::graph::{BoundedBellmanFord, RateGraph};
use crate::store::PairStore;

/// A loop found in one snapshot, with the pair states it was priced on
#[derive(Debug, Clone)]
pub struct ArbLoop {
    /// Trade order: the first pair receives the base token
    pub pairs: Vec<Arc<Pair>>,
    /// Token path, base first and last
    pub tokens: Vec<Address>,
    pub expected_return: f64,
}

impl ArbLoop {
    pub fn pair_addresses(&self) -> Vec<Address> {
        self.pairs.iter().map(|p| p.address).collect()
    }

    pub fn key(&self) -> String {
        loop_key(&self.pair_addresses())
    }

    pub fn hop_count(&self) -> usize {
        self.pairs.len()
    }
}

/// Snapshot -> rate graph -> strongest loop through the base token
#[derive(Debug, Clone)]
pub struct ArbitrageLoopFinder {
    base: Address,
    max_passes: usize,
    max_hops: usize,
}

impl ArbitrageLoopFinder {
    pub fn new(base: Address, max_passes: usize) -> Self {
        Self {
            base,
            max_passes,
            max_hops: MAX_LOOP_HOPS,
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn find(&self, store: &PairStore) -> Option<ArbLoop> {
        self.find_in(&store.snapshot())
    }

    pub fn find_in(&self, pairs: &[Arc<Pair>]) -> Option<ArbLoop> {
        let graph = RateGraph::from_pairs(pairs);
        let found = BoundedBellmanFord::new(&graph, self.max_passes)
            .with_max_hops(self.max_hops)
            .find_loop(self.base)?;

        let loop_pairs = found
            .hops
            .iter()
            .map(|hop| pairs.get(hop.pair_index).cloned())
            .collect::<Option<Vec<_>>>()?;

        Some(ArbLoop {
            pairs: loop_pairs,
            tokens: found.tokens(),
            expected_return: found.expected_return(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::test_helpers::*;
    use crate::dex::Provenance;

    #[test]
    fn test_finds_loop_from_store() {
        let (w, a, b) = (token(1), token(2), token(3));
        let closing = (1.02 / 0.997f64.powi(3) * 1_000.0 * 1e18) as u128;
        let store = PairStore::new();
        store.store_pairs([
            pair(1, w, a, 1_000 * E18, 1_000 * E18),
            pair(2, a, b, 1_000 * E18, 1_000 * E18),
            pair(3, b, w, 1_000 * E18, closing),
            // unrelated liquidity
            pair(4, a, token(9), 5 * E18, 5 * E18),
        ]);

        let found = ArbitrageLoopFinder::new(w, 5).find(&store).expect("loop");
        assert_eq!(found.pair_addresses(), vec![addr(1), addr(2), addr(3)]);
        assert_eq!(found.tokens, vec![w, a, b, w]);
        assert_eq!(found.pairs[2].reserve1, alloy::primitives::U256::from(closing));
        assert!((found.expected_return - 1.02).abs() < 1e-6);
    }

    #[test]
    fn test_expired_pairs_do_not_form_loops() {
        let (w, a, b) = (token(1), token(2), token(3));
        let closing = (1.02 / 0.997f64.powi(3) * 1_000.0 * 1e18) as u128;
        let mut stale = pair(3, b, w, 1_000 * E18, closing);
        stale.provenance = Provenance::new(1, 0, 0, 0);

        let store = PairStore::new();
        store.store_pairs([
            pair(1, w, a, 1_000 * E18, 1_000 * E18),
            pair(2, a, b, 1_000 * E18, 1_000 * E18),
            stale,
        ]);
        assert!(ArbitrageLoopFinder::new(w, 5).find(&store).is_none());
    }
}
