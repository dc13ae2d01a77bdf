//! On-disk representation of pair state
//!
//! One JSON object per line, tagged by protocol. Integers that may exceed
//! 2^53 are written as decimal strings so any JSON reader keeps them exact.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{Inherited, Pair, Protocol, Provenance};
use crate::error::RecordError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum StorageRecord {
    UniswapV2(PairRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRecord {
    pub address: String,
    pub token0: String,
    pub token1: String,
    pub reserve0: String,
    pub reserve1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u32>,
    #[serde(default)]
    pub error: bool,
    pub block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
    pub observed_at: i64,
}

pub trait ToStorageRecord {
    fn to_storage_record(&self) -> StorageRecord;
}

pub trait FromStorageRecord: Sized {
    fn from_storage_record(record: StorageRecord) -> Result<Self, RecordError>;
}

impl ToStorageRecord for Pair {
    fn to_storage_record(&self) -> StorageRecord {
        let record = PairRecord {
            address: self.address.to_string(),
            token0: self.token0.to_string(),
            token1: self.token1.to_string(),
            reserve0: self.reserve0.to_string(),
            reserve1: self.reserve1.to_string(),
            fee: self.fee,
            error: self.error,
            block_number: self.provenance.block_number,
            tx_index: self.provenance.tx_index,
            log_index: self.provenance.log_index,
            observed_at: self.provenance.observed_at,
        };
        match self.protocol {
            Protocol::UniswapV2 => StorageRecord::UniswapV2(record),
        }
    }
}

impl FromStorageRecord for Pair {
    fn from_storage_record(record: StorageRecord) -> Result<Self, RecordError> {
        let (protocol, r) = match record {
            StorageRecord::UniswapV2(r) => (Protocol::UniswapV2, r),
        };

        let address = parse_address("address", &r.address)?;
        if address.is_zero() {
            return Err(RecordError::Address {
                field: "address",
                value: r.address,
            });
        }
        let reserve0 = parse_u256("reserve0", &r.reserve0)?;
        let reserve1 = parse_u256("reserve1", &r.reserve1)?;
        if reserve0.is_zero() || reserve1.is_zero() {
            return Err(RecordError::ZeroReserve(r.address));
        }

        Ok(Pair {
            protocol,
            address,
            token0: parse_address("token0", &r.token0)?,
            token1: parse_address("token1", &r.token1)?,
            reserve0,
            reserve1,
            fee: r.fee,
            error: r.error,
            provenance: Provenance::new(r.block_number, r.tx_index, r.log_index, r.observed_at),
            inherited: Inherited::default(),
        })
    }
}

impl StorageRecord {
    pub fn to_json_line(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_line(line: &str) -> Result<Self, RecordError> {
        Ok(serde_json::from_str(line)?)
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, RecordError> {
    Address::from_str(value.trim()).map_err(|_| RecordError::Address {
        field,
        value: value.to_string(),
    })
}

fn parse_u256(field: &'static str, value: &str) -> Result<U256, RecordError> {
    U256::from_str_radix(value.trim(), 10).map_err(|_| RecordError::Integer {
        field,
        value: value.to_string(),
    })
}
