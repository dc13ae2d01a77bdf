pub mod bellman_ford;
pub mod builder;
pub mod types;

pub use bellman_ford::{BoundedBellmanFord, DetectedLoop};
pub use builder::RateGraph;
pub use types::SwapEdge;
