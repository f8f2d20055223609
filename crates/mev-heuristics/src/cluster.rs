//! Cross-block grouping of flagged transactions into actor clusters.
//!
//! Transactions are nodes of a disjoint-set forest. An address index remembers
//! the first node seen with each address; any later node carrying the same
//! address is unioned with it. Unions are commutative and transitive, so the
//! final partition only depends on the set of transactions assigned, not on
//! the order blocks arrived in.

use std::collections::HashMap;

use alloy::primitives::{Address, TxHash};
use chrono::{DateTime, Utc};
use mev_scan_types::config::ClusterPolicy;
use mev_scan_types::models::ClusterId;
use mev_scan_types::{ClusterSummary, FlaggedTransaction};
use tracing::debug;

/// Union-Find with path compression and union by size.
#[derive(Debug, Default)]
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn push(&mut self) -> usize {
        let idx = self.parent.len();
        self.parent.push(idx);
        self.size.push(1);
        idx
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Returns the surviving root, or `None` if both were already joined.
    fn union(&mut self, x: usize, y: usize) -> Option<usize> {
        let (rx, ry) = (self.find(x), self.find(y));
        if rx == ry {
            return None;
        }
        let (big, small) = if self.size[rx] >= self.size[ry] {
            (rx, ry)
        } else {
            (ry, rx)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        Some(big)
    }

    fn size_of(&mut self, x: usize) -> usize {
        let root = self.find(x);
        self.size[root]
    }
}

#[derive(Debug, Clone)]
struct Node {
    hash: TxHash,
    block_number: u64,
    position: u64,
    addresses: Vec<Address>,
}

/// Clusters as of one point in the scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterSnapshot {
    /// Ordered by earliest member; ids are 1-based in that order.
    pub clusters: Vec<ClusterSummary>,
    /// Flagged transactions that stayed alone, ordered by (block, position).
    pub unclustered: Vec<TxHash>,
    pub membership: HashMap<TxHash, ClusterId>,
}

/// Incrementally maintained actor clusters for one scan.
#[derive(Debug)]
pub struct ClusterEngine {
    policy: ClusterPolicy,
    sets: UnionFind,
    nodes: Vec<Node>,
    by_hash: HashMap<TxHash, usize>,
    by_address: HashMap<Address, usize>,
    /// Creation time per root of every set with two or more members.
    created_at: HashMap<usize, DateTime<Utc>>,
}

impl ClusterEngine {
    pub fn new(policy: ClusterPolicy) -> Self {
        Self {
            policy,
            sets: UnionFind::default(),
            nodes: Vec::new(),
            by_hash: HashMap::new(),
            by_address: HashMap::new(),
            created_at: HashMap::new(),
        }
    }

    /// Fold a batch of flagged transactions into the clusters.
    ///
    /// A transaction already known by hash is not added twice.
    pub fn assign(&mut self, flagged: &[FlaggedTransaction]) {
        for ft in flagged {
            let tx = &ft.transaction;
            if self.by_hash.contains_key(&tx.hash) {
                continue;
            }

            let node = self.sets.push();
            self.nodes.push(Node {
                hash: tx.hash,
                block_number: tx.block_number,
                position: tx.position,
                addresses: tx.addresses().collect(),
            });
            self.by_hash.insert(tx.hash, node);

            let receiver = tx.receiver.filter(|_| self.policy.link_receivers);
            for address in std::iter::once(tx.sender).chain(receiver) {
                match self.by_address.get(&address) {
                    Some(&existing) => self.join(node, existing),
                    None => {
                        self.by_address.insert(address, node);
                    }
                }
            }
        }
    }

    fn join(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.sets.find(a), self.sets.find(b));
        let earliest = [self.created_at.remove(&ra), self.created_at.remove(&rb)]
            .into_iter()
            .flatten()
            .min();
        if let Some(root) = self.sets.union(ra, rb) {
            self.created_at.insert(root, earliest.unwrap_or_else(Utc::now));
        } else if let Some(created) = earliest {
            self.created_at.insert(ra, created);
        }
    }

    /// Number of flagged transactions seen so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of clusters with two or more members.
    pub fn cluster_count(&self) -> usize {
        self.created_at.len()
    }

    /// Materialize the current clusters.
    pub fn snapshot(&mut self) -> ClusterSnapshot {
        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        for idx in 0..self.nodes.len() {
            let root = self.sets.find(idx);
            groups.entry(root).or_default().push(idx);
        }

        let mut unclustered = Vec::new();
        let mut clustered = Vec::new();
        for (root, mut members) in groups {
            members.sort_by_key(|&i| (self.nodes[i].block_number, self.nodes[i].position));
            if self.sets.size_of(root) < 2 {
                unclustered.extend(members);
            } else {
                clustered.push((root, members));
            }
        }

        clustered.sort_by_key(|(_, members)| {
            let first = &self.nodes[members[0]];
            (first.block_number, first.position)
        });
        unclustered.sort_by_key(|&i| (self.nodes[i].block_number, self.nodes[i].position));

        let mut membership = HashMap::new();
        let clusters = clustered
            .into_iter()
            .enumerate()
            .map(|(i, (root, members))| {
                let id = i as ClusterId + 1;
                let mut addresses: Vec<Address> = members
                    .iter()
                    .flat_map(|&m| self.nodes[m].addresses.iter().copied())
                    .collect();
                addresses.sort();
                addresses.dedup();

                let hashes: Vec<TxHash> = members.iter().map(|&m| self.nodes[m].hash).collect();
                for hash in &hashes {
                    membership.insert(*hash, id);
                }

                ClusterSummary {
                    id,
                    member_count: hashes.len(),
                    members: hashes,
                    addresses,
                    first_block: self.nodes[members[0]].block_number,
                    last_block: members
                        .iter()
                        .map(|&m| self.nodes[m].block_number)
                        .max()
                        .unwrap_or_default(),
                    created_at: self.created_at.get(&root).copied().unwrap_or_else(Utc::now),
                }
            })
            .collect::<Vec<_>>();

        debug!(
            clusters = clusters.len(),
            unclustered = unclustered.len(),
            "Snapshot of clusters"
        );

        ClusterSnapshot {
            clusters,
            unclustered: unclustered.into_iter().map(|i| self.nodes[i].hash).collect(),
            membership,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mev_scan_types::{Flag, FlagKind, Transaction};

    fn flagged(n: u8, sender: u8, receiver: Option<u8>, block: u64, position: u64) -> FlaggedTransaction {
        let tx = Transaction {
            hash: TxHash::with_last_byte(n),
            sender: Address::with_last_byte(sender),
            receiver: receiver.map(Address::with_last_byte),
            gas_price: 200.0,
            gas_used: 21_000.0,
            value: 1.0,
            block_number: block,
            position,
        };
        let mut ft = FlaggedTransaction::new(tx.clone());
        ft.push(Flag::new(tx.hash, FlagKind::HighGas, 2.0));
        ft
    }

    fn partition(snapshot: &ClusterSnapshot) -> Vec<Vec<TxHash>> {
        snapshot.clusters.iter().map(|c| c.members.clone()).collect()
    }

    #[test]
    fn test_shared_sender_across_blocks() {
        let mut engine = ClusterEngine::new(ClusterPolicy::default());
        engine.assign(&[flagged(1, 0x21, Some(0x31), 100, 0)]);
        assert_eq!(engine.cluster_count(), 0);
        engine.assign(&[flagged(2, 0x21, Some(0x32), 101, 4)]);
        assert_eq!(engine.cluster_count(), 1);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.clusters.len(), 1);
        assert_eq!(snapshot.clusters[0].member_count, 2);
        assert_eq!(
            snapshot.clusters[0].addresses,
            vec![
                Address::with_last_byte(0x21),
                Address::with_last_byte(0x31),
                Address::with_last_byte(0x32)
            ]
        );
        assert_eq!(snapshot.clusters[0].first_block, 100);
        assert_eq!(snapshot.clusters[0].last_block, 101);
        assert!(snapshot.unclustered.is_empty());
    }

    #[test]
    fn test_singletons_are_unclustered() {
        let mut engine = ClusterEngine::new(ClusterPolicy::default());
        engine.assign(&[
            flagged(1, 0x21, Some(0x31), 100, 0),
            flagged(2, 0x22, Some(0x32), 100, 1),
        ]);
        let snapshot = engine.snapshot();
        assert!(snapshot.clusters.is_empty());
        assert_eq!(
            snapshot.unclustered,
            vec![TxHash::with_last_byte(1), TxHash::with_last_byte(2)]
        );
    }

    #[test]
    fn test_transitive_merge() {
        let mut engine = ClusterEngine::new(ClusterPolicy::default());
        // a and c are unrelated until b bridges them through its receiver
        engine.assign(&[flagged(1, 0x21, Some(0x31), 100, 0)]);
        engine.assign(&[flagged(3, 0x23, Some(0x33), 102, 0)]);
        assert_eq!(engine.cluster_count(), 0);
        engine.assign(&[flagged(2, 0x21, Some(0x23), 101, 0)]);
        assert_eq!(engine.cluster_count(), 1);
        assert_eq!(engine.snapshot().clusters[0].member_count, 3);
    }

    #[test]
    fn test_receiver_linking_policy() {
        let batch = [
            flagged(1, 0x21, Some(0x99), 100, 0),
            flagged(2, 0x22, Some(0x99), 100, 1),
        ];

        let mut linked = ClusterEngine::new(ClusterPolicy::default());
        linked.assign(&batch);
        assert_eq!(linked.cluster_count(), 1);

        let mut senders_only = ClusterEngine::new(ClusterPolicy {
            link_receivers: false,
        });
        senders_only.assign(&batch);
        assert_eq!(senders_only.cluster_count(), 0);
    }

    #[test]
    fn test_partition_independent_of_order() {
        let blocks = vec![
            vec![flagged(1, 0x21, Some(0x31), 100, 0), flagged(2, 0x22, None, 100, 1)],
            vec![flagged(3, 0x23, Some(0x31), 101, 0)],
            vec![flagged(4, 0x22, Some(0x34), 102, 0), flagged(5, 0x25, Some(0x35), 102, 1)],
            vec![flagged(6, 0x26, Some(0x25), 103, 0)],
        ];

        let mut forward = ClusterEngine::new(ClusterPolicy::default());
        for block in &blocks {
            forward.assign(block);
        }
        let mut backward = ClusterEngine::new(ClusterPolicy::default());
        for block in blocks.iter().rev() {
            backward.assign(block);
        }
        let mut shuffled = ClusterEngine::new(ClusterPolicy::default());
        for i in [2, 0, 3, 1] {
            shuffled.assign(&blocks[i]);
        }

        let expected = partition(&forward.snapshot());
        assert_eq!(expected.len(), 3);
        assert_eq!(partition(&backward.snapshot()), expected);
        assert_eq!(partition(&shuffled.snapshot()), expected);
    }

    #[test]
    fn test_duplicate_assign_ignored() {
        let mut engine = ClusterEngine::new(ClusterPolicy::default());
        let tx = flagged(1, 0x21, Some(0x31), 100, 0);
        engine.assign(&[tx.clone()]);
        engine.assign(&[tx]);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.cluster_count(), 0);
    }

    #[test]
    fn test_membership_matches_clusters() {
        let mut engine = ClusterEngine::new(ClusterPolicy::default());
        engine.assign(&[
            flagged(1, 0x21, Some(0x31), 100, 0),
            flagged(2, 0x21, Some(0x32), 100, 2),
            flagged(3, 0x29, None, 100, 3),
        ]);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.membership.get(&TxHash::with_last_byte(1)), Some(&1));
        assert_eq!(snapshot.membership.get(&TxHash::with_last_byte(2)), Some(&1));
        assert_eq!(snapshot.membership.get(&TxHash::with_last_byte(3)), None);
    }
}
