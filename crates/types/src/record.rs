//! Raw records as delivered by a block feed, and their validation into the
//! data model.

use std::collections::HashSet;

use alloy::primitives::{Address, TxHash};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::models::{Block, Transaction};

/// A transaction exactly as a feed reports it. Nothing here is trusted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: String,
    pub sender: String,
    pub receiver: Option<String>,
    pub gas_price: f64,
    pub gas_used: f64,
    pub value: f64,
    pub block_number: u64,
    pub position_in_block: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: u64,
    pub timestamp: u64,
    pub transactions: Vec<TransactionRecord>,
}

/// A record that was dropped during ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedTransaction {
    pub position: u64,
    pub hash: String,
    pub error: ParseError,
}

impl TransactionRecord {
    pub fn validate(&self) -> Result<Transaction, ParseError> {
        let hash: TxHash = self
            .hash
            .parse()
            .map_err(|_| ParseError::InvalidHash(self.hash.clone()))?;
        let sender = parse_address("sender", &self.sender)?;
        let receiver = self
            .receiver
            .as_deref()
            .map(|r| parse_address("receiver", r))
            .transpose()?;

        Ok(Transaction {
            hash,
            sender,
            receiver,
            gas_price: checked_amount("gas_price", self.gas_price)?,
            gas_used: checked_amount("gas_used", self.gas_used)?,
            value: checked_amount("value", self.value)?,
            block_number: self.block_number,
            position: self.position_in_block,
        })
    }
}

impl BlockRecord {
    /// Validate every transaction and build the block from the survivors.
    ///
    /// Invalid records are returned alongside the block rather than failing
    /// it, so one bad transaction never costs the rest of its block.
    pub fn into_block(self) -> (Block, Vec<RejectedTransaction>) {
        let mut rejected = Vec::new();
        let mut accepted = Vec::with_capacity(self.transactions.len());
        let mut positions = HashSet::new();
        let mut hashes = HashSet::new();

        for record in &self.transactions {
            let outcome = record.validate().and_then(|tx| {
                if tx.block_number != self.number {
                    return Err(ParseError::BlockMismatch {
                        expected: self.number,
                        found: tx.block_number,
                    });
                }
                if !positions.insert(tx.position) {
                    return Err(ParseError::DuplicatePosition(tx.position));
                }
                if !hashes.insert(tx.hash) {
                    return Err(ParseError::DuplicateHash(tx.hash));
                }
                Ok(tx)
            });

            match outcome {
                Ok(tx) => accepted.push(tx),
                Err(error) => rejected.push(RejectedTransaction {
                    position: record.position_in_block,
                    hash: record.hash.clone(),
                    error,
                }),
            }
        }

        (Block::new(self.number, self.timestamp, accepted), rejected)
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

fn checked_amount(field: &'static str, value: f64) -> Result<f64, ParseError> {
    if !value.is_finite() {
        return Err(ParseError::NonFinite { field });
    }
    if value < 0.0 {
        return Err(ParseError::Negative { field, value });
    }
    Ok(value)
}
