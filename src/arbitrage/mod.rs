pub mod engine;
pub mod finder;
pub mod profit;
pub mod suppressor;

pub use engine::{ArbitrageEngine, AttemptOutcome};
pub use finder::{ArbLoop, ArbitrageLoopFinder};
pub use profit::{ProfitabilitySearch, SearchOutcome, TradeSize};
pub use suppressor::{loop_key, DuplicateSuppressor};
