//! Bounded Bellman-Ford negative cycle search anchored at the base token
//!
//! Distances are relaxed from the base for a small number of passes, then
//! every edge back into the base is checked: `dist[u] + w(u -> base) < 0`
//! means a loop out of and back into the base has a net rate above 1. The
//! base itself is pinned at distance 0 so the closing edges are always
//! measured against a clean starting point.

use alloy::primitives::Address;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashSet;

use super::builder::RateGraph;
use super::types::SwapEdge;
use crate::config::thresholds::{CYCLE_EPSILON, MAX_LOOP_HOPS};

/// A negative cycle through the base token, hops in trade order
#[derive(Debug, Clone)]
pub struct DetectedLoop {
    /// First hop leaves the base, last hop returns to it
    pub hops: Vec<SwapEdge>,
    pub total_weight: f64,
}

impl DetectedLoop {
    /// Pair addresses in trade order
    pub fn pairs(&self) -> Vec<Address> {
        self.hops.iter().map(|h| h.pair).collect()
    }

    /// Tokens visited, starting and ending at the base
    pub fn tokens(&self) -> Vec<Address> {
        let mut tokens: Vec<Address> = self.hops.iter().map(|h| h.from).collect();
        if let Some(last) = self.hops.last() {
            tokens.push(last.to);
        }
        tokens
    }

    /// Product of the net rates around the loop
    pub fn expected_return(&self) -> f64 {
        (-self.total_weight).exp()
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }
}

pub struct BoundedBellmanFord<'a> {
    graph: &'a RateGraph,
    max_passes: usize,
    max_hops: usize,
    epsilon: f64,
}

impl<'a> BoundedBellmanFord<'a> {
    /// `max_passes == 0` runs the textbook |V|-1 passes
    pub fn new(graph: &'a RateGraph, max_passes: usize) -> Self {
        Self {
            graph,
            max_passes,
            max_hops: MAX_LOOP_HOPS,
            epsilon: CYCLE_EPSILON,
        }
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Find the strongest loop through `base`, if any
    pub fn find_loop(&self, base: Address) -> Option<DetectedLoop> {
        if self.graph.node_count() < 2 {
            return None;
        }
        let base_node = self.graph.get_node(base)?;
        let (distance, predecessor) = self.relax(base_node);

        let mut candidates: Vec<(f64, EdgeIndex)> = self
            .graph
            .graph
            .edges_directed(base_node, Direction::Incoming)
            .filter_map(|edge| {
                let from = distance[edge.source().index()]?;
                let closing = from + edge.weight().weight;
                (closing < -self.epsilon).then_some((closing, edge.id()))
            })
            .collect();
        // most negative first; stable sort keeps first-seen order on ties
        candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        for (closing, edge) in candidates {
            match self.walk_back(base_node, edge, &predecessor) {
                Some(found) => {
                    tracing::debug!(
                        "Loop through base: {} hops, closing distance {:.6}, return {:.6}",
                        found.hop_count(),
                        closing,
                        found.expected_return()
                    );
                    return Some(found);
                }
                None => tracing::trace!("Discarding closing edge {:?}", edge),
            }
        }
        None
    }

    fn relax(&self, base: NodeIndex) -> (Vec<Option<f64>>, Vec<Option<EdgeIndex>>) {
        let vertices = self.graph.node_count();
        let passes = if self.max_passes == 0 {
            vertices.saturating_sub(1)
        } else {
            self.max_passes
        };

        let mut distance: Vec<Option<f64>> = vec![None; vertices];
        let mut predecessor: Vec<Option<EdgeIndex>> = vec![None; vertices];
        distance[base.index()] = Some(0.0);

        for pass in 0..passes {
            let mut changed = 0usize;
            for edge in self.graph.graph.edge_references() {
                let target = edge.target();
                if target == base {
                    continue;
                }
                let Some(from) = distance[edge.source().index()] else {
                    continue;
                };
                let candidate = from + edge.weight().weight;
                let improves = match distance[target.index()] {
                    None => true,
                    Some(current) => candidate < current - self.epsilon,
                };
                if improves {
                    distance[target.index()] = Some(candidate);
                    predecessor[target.index()] = Some(edge.id());
                    changed += 1;
                }
            }
            tracing::trace!("Relaxation pass {}: {} updates", pass + 1, changed);
            if changed == 0 {
                break;
            }
        }

        (distance, predecessor)
    }

    /// Follow predecessor edges from `closing` back to the base. Gives up on
    /// a repeated pair or token, or after `max_hops` edges.
    fn walk_back(
        &self,
        base: NodeIndex,
        closing: EdgeIndex,
        predecessor: &[Option<EdgeIndex>],
    ) -> Option<DetectedLoop> {
        let mut hops: Vec<SwapEdge> = Vec::new();
        let mut seen_pairs = HashSet::new();
        let mut seen_tokens = HashSet::new();
        let mut current = closing;

        for _ in 0..self.max_hops {
            let (from, _) = self.graph.graph.edge_endpoints(current)?;
            let edge = self.graph.graph.edge_weight(current)?;
            // same pair twice is an out-and-back, never a real loop
            if !seen_pairs.insert(edge.pair) {
                return None;
            }
            hops.push(edge.clone());

            if from == base {
                hops.reverse();
                let total_weight = hops.iter().map(|h| h.weight).sum();
                return Some(DetectedLoop { hops, total_weight });
            }
            if !seen_tokens.insert(from) {
                return None;
            }
            current = predecessor[from.index()]?;
        }

        tracing::trace!("Hop guard hit after {} edges", self.max_hops);
        None
    }
}
