use alloy::primitives::Address;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::sync::Arc;

use super::types::SwapEdge;
use crate::dex::Pair;

/// Directed token graph, two edges per priceable pair
pub struct RateGraph {
    pub graph: DiGraph<Address, SwapEdge>,
    token_to_node: HashMap<Address, NodeIndex>,
}

impl Default for RateGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RateGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            token_to_node: HashMap::new(),
        }
    }

    /// Build a graph over `pairs`. Edge `pair_index` values refer to this slice.
    pub fn from_pairs(pairs: &[Arc<Pair>]) -> Self {
        let mut graph = Self::new();
        for (index, pair) in pairs.iter().enumerate() {
            graph.add_pair(index, pair);
        }
        tracing::trace!(
            "Built rate graph: {} tokens, {} edges from {} pairs",
            graph.node_count(),
            graph.edge_count(),
            pairs.len()
        );
        graph
    }

    fn get_or_create_node(&mut self, token: Address) -> NodeIndex {
        if let Some(&node) = self.token_to_node.get(&token) {
            node
        } else {
            let node = self.graph.add_node(token);
            self.token_to_node.insert(token, node);
            node
        }
    }

    /// Add both directions of `pair`. Returns false if the pair was skipped.
    pub fn add_pair(&mut self, pair_index: usize, pair: &Pair) -> bool {
        if !pair.is_priceable() {
            tracing::trace!("Skipping pair {} - not priceable", pair.address);
            return false;
        }

        let (weight0, weight1) = pair.weights();
        if !weight0.is_finite() || !weight1.is_finite() {
            tracing::trace!("Skipping pair {} - weights {} / {}", pair.address, weight0, weight1);
            return false;
        }

        self.insert_edge(SwapEdge {
            pair_index,
            pair: pair.address,
            from: pair.token0,
            to: pair.token1,
            zero_for_one: true,
            weight: weight0,
        });
        self.insert_edge(SwapEdge {
            pair_index,
            pair: pair.address,
            from: pair.token1,
            to: pair.token0,
            zero_for_one: false,
            weight: weight1,
        });
        true
    }

    /// Add one directed edge, creating its token nodes as needed
    pub fn insert_edge(&mut self, edge: SwapEdge) {
        let from = self.get_or_create_node(edge.from);
        let to = self.get_or_create_node(edge.to);
        self.graph.add_edge(from, to, edge);
    }

    pub fn get_node(&self, token: Address) -> Option<NodeIndex> {
        self.token_to_node.get(&token).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::test_helpers::*;

    #[test]
    fn test_two_edges_per_pair() {
        let pairs = vec![
            arc_pair(1, token(1), token(2), 1_000 * E18, 2_000 * E18),
            arc_pair(2, token(2), token(3), 1_000 * E18, 1_000 * E18),
        ];
        let graph = RateGraph::from_pairs(&pairs);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 4);

        let edge = graph
            .graph
            .edge_weights()
            .find(|e| e.pair == addr(1) && e.zero_for_one)
            .expect("edge present");
        assert_eq!(edge.pair_index, 0);
        assert_eq!(edge.from, token(1));
        assert!((edge.rate() - 2.0 * 0.997).abs() < 1e-12);
    }

    #[test]
    fn test_unusable_pairs_are_skipped() {
        let mut errored = pair(1, token(1), token(2), E18, E18);
        errored.error = true;
        let empty = pair(2, token(1), token(3), 0, E18);
        let mut unknown = pair(3, token(1), token(4), E18, E18);
        unknown.token1 = Address::ZERO;
        let mut bad_fee = pair(4, token(1), token(5), E18, E18);
        bad_fee.fee = Some(10_000);

        let pairs: Vec<Arc<Pair>> = [errored, empty, unknown, bad_fee]
            .into_iter()
            .map(Arc::new)
            .collect();
        let graph = RateGraph::from_pairs(&pairs);
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
    }
}
