use alloy::primitives::U256;
use thiserror::Error;

/// A persisted or replayed pair record that could not be turned back into state
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid address in field {field}: {value}")]
    Address { field: &'static str, value: String },

    #[error("invalid integer in field {field}: {value}")]
    Integer { field: &'static str, value: String },

    #[error("record for {0} has a zero reserve")]
    ZeroReserve(String),
}

/// Why the executor did not land a trade
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(
        "final check failed: amount in {amount_in}, amount out {amount_out}, estimated fee {estimated_fee}"
    )]
    FinalCheck {
        amount_in: U256,
        amount_out: U256,
        estimated_fee: U256,
    },

    #[error("trade path does not start and end at the base token")]
    InvalidPath,

    #[error("trade rejected: {0}")]
    Rejected(String),

    #[error("executor timed out")]
    Timeout,
}
