//! Data model shared by every stage of a scan.

use alloy::primitives::{Address, TxHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type BlockNumber = u64;

/// Identifier of a materialized cluster inside one scan result.
pub type ClusterId = u64;

/// A validated transaction, owned by exactly one [`Block`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: TxHash,
    pub sender: Address,
    /// `None` for contract creations.
    pub receiver: Option<Address>,
    pub gas_price: f64,
    pub gas_used: f64,
    pub value: f64,
    pub block_number: BlockNumber,
    /// 0-based execution order inside the block.
    pub position: u64,
}

impl Transaction {
    /// Total amount paid for execution (`gas_price * gas_used`).
    pub fn gas_cost(&self) -> f64 {
        self.gas_price * self.gas_used
    }

    /// Sender followed by the receiver, when present.
    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        std::iter::once(self.sender).chain(self.receiver)
    }
}

/// A block with its transactions in execution order.
///
/// The transaction list is only reachable through a shared slice, so the
/// order established at construction never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub number: BlockNumber,
    /// Unix seconds.
    pub timestamp: u64,
    transactions: Vec<Transaction>,
}

impl Block {
    /// Build a block, ordering transactions by their position.
    pub fn new(number: BlockNumber, timestamp: u64, mut transactions: Vec<Transaction>) -> Self {
        transactions.sort_by_key(|tx| tx.position);
        Self {
            number,
            timestamp,
            transactions,
        }
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }
}

/// Side of a sandwich a transaction was placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandwichRole {
    Front,
    Back,
}

/// Kinds of flags the pipeline can raise on a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "role", rename_all = "snake_case")]
pub enum FlagKind {
    HighGas,
    SandwichLeg(SandwichRole),
    Anomalous,
}

impl FlagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagKind::HighGas => "high_gas",
            FlagKind::SandwichLeg(SandwichRole::Front) => "sandwich_front",
            FlagKind::SandwichLeg(SandwichRole::Back) => "sandwich_back",
            FlagKind::Anomalous => "anomalous",
        }
    }

    pub fn sandwich_role(&self) -> Option<SandwichRole> {
        match self {
            FlagKind::SandwichLeg(role) => Some(*role),
            _ => None,
        }
    }
}

/// A single finding attached to a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub tx_hash: TxHash,
    pub kind: FlagKind,
    pub score: f64,
    /// Filled in when the result is assembled and the transaction belongs
    /// to a materialized cluster.
    pub cluster_id: Option<ClusterId>,
}

impl Flag {
    pub fn new(tx_hash: TxHash, kind: FlagKind, score: f64) -> Self {
        Self {
            tx_hash,
            kind,
            score,
            cluster_id: None,
        }
    }
}

/// A transaction together with every flag raised on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedTransaction {
    pub transaction: Transaction,
    flags: Vec<Flag>,
}

impl FlaggedTransaction {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            flags: Vec::new(),
        }
    }

    pub fn hash(&self) -> TxHash {
        self.transaction.hash
    }

    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    /// Append a flag.
    ///
    /// Returns `false` and leaves the flags untouched when the flag is a
    /// second sandwich role or a repeat of an existing kind.
    pub fn push(&mut self, flag: Flag) -> bool {
        if flag.tx_hash != self.transaction.hash {
            return false;
        }
        if self.flags.iter().any(|f| f.kind == flag.kind) {
            return false;
        }
        if flag.kind.sandwich_role().is_some() && self.sandwich_role().is_some() {
            return false;
        }
        self.flags.push(flag);
        true
    }

    pub fn has_kind(&self, kind: FlagKind) -> bool {
        self.flags.iter().any(|f| f.kind == kind)
    }

    pub fn sandwich_role(&self) -> Option<SandwichRole> {
        self.flags.iter().find_map(|f| f.kind.sandwich_role())
    }

    pub fn assign_cluster(&mut self, cluster_id: Option<ClusterId>) {
        for flag in &mut self.flags {
            flag.cluster_id = cluster_id;
        }
    }
}

/// One victim bracketed by an attacker's front and back legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandwichIncident {
    pub block_number: BlockNumber,
    pub victim: TxHash,
    pub victim_position: u64,
    pub front: TxHash,
    pub back: TxHash,
    pub attacker: Address,
    pub target: Address,
    pub front_gas_price: f64,
    pub victim_gas_price: f64,
    pub back_gas_price: f64,
    /// A leg also tripped a per-transaction heuristic.
    pub corroborated: bool,
}

/// A materialized group of flagged transactions (two or more members).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub id: ClusterId,
    pub member_count: usize,
    pub members: Vec<TxHash>,
    pub addresses: Vec<Address>,
    pub first_block: BlockNumber,
    pub last_block: BlockNumber,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(n: u8, position: u64) -> Transaction {
        Transaction {
            hash: TxHash::with_last_byte(n),
            sender: Address::with_last_byte(n),
            receiver: None,
            gas_price: 1.0,
            gas_used: 21_000.0,
            value: 0.0,
            block_number: 1,
            position,
        }
    }

    #[test]
    fn test_block_orders_by_position() {
        let block = Block::new(1, 0, vec![tx(3, 2), tx(1, 0), tx(2, 1)]);
        let positions: Vec<u64> = block.transactions().iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_single_sandwich_role() {
        let t = tx(1, 0);
        let mut flagged = FlaggedTransaction::new(t.clone());
        assert!(flagged.push(Flag::new(t.hash, FlagKind::SandwichLeg(SandwichRole::Front), 1.0)));
        assert!(!flagged.push(Flag::new(t.hash, FlagKind::SandwichLeg(SandwichRole::Back), 1.0)));
        assert!(flagged.push(Flag::new(t.hash, FlagKind::HighGas, 2.0)));
        assert!(!flagged.push(Flag::new(t.hash, FlagKind::HighGas, 3.0)));
        assert_eq!(flagged.flags().len(), 2);
        assert_eq!(flagged.sandwich_role(), Some(SandwichRole::Front));
    }

    #[test]
    fn test_flag_kind_serialization() {
        let json = serde_json::to_string(&FlagKind::SandwichLeg(SandwichRole::Back)).unwrap();
        assert_eq!(json, r#"{"kind":"sandwich_leg","role":"back"}"#);
        assert_eq!(FlagKind::Anomalous.as_str(), "anomalous");
    }
}
