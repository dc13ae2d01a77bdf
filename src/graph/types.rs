use alloy::primitives::Address;

/// One direction of a pair, as a weighted graph edge
#[derive(Debug, Clone, PartialEq)]
pub struct SwapEdge {
    /// Index of the owning pair in the slice the graph was built from
    pub pair_index: usize,
    pub pair: Address,
    pub from: Address,
    pub to: Address,
    /// true when the edge swaps token0 into token1
    pub zero_for_one: bool,
    pub weight: f64, // -ln(net rate)
}

impl SwapEdge {
    /// Net-of-fee exchange rate this edge was weighted with
    pub fn rate(&self) -> f64 {
        (-self.weight).exp()
    }
}
