//! Block-local sandwich detection.
//!
//! A sandwich is a victim V bracketed by two transactions from the same
//! attacker, one before and one after it, all three calling the same target.
//! Victims are visited in execution order; for each one the nearest valid
//! attacker pair wins.

use std::collections::{BTreeMap, HashMap};

use alloy::primitives::Address;
use mev_scan_types::config::{GasOrdering, SandwichPolicy};
use mev_scan_types::{Block, Flag, FlagKind, SandwichIncident, SandwichRole, Transaction};

const MIN_GAS_PRICE: f64 = 1e-9;

/// Output of sandwich detection for one block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SandwichDetection {
    /// One flag per leg, in execution order.
    pub flags: Vec<Flag>,
    /// One entry per victim.
    pub incidents: Vec<SandwichIncident>,
}

/// Find sandwich legs in a block.
///
/// # Arguments
/// * `block` - The block, transactions in execution order
/// * `classifier_flags` - Flags already raised on this block's transactions;
///   an incident whose legs carry any of them is marked corroborated
/// * `policy` - Gas ordering required between legs and victim
pub fn detect_sandwiches(
    block: &Block,
    classifier_flags: &[Flag],
    policy: &SandwichPolicy,
) -> SandwichDetection {
    let txs = block.transactions();
    if txs.len() < 3 {
        return SandwichDetection::default();
    }

    // target -> sender -> indices, ascending
    let mut by_target: HashMap<Address, BTreeMap<Address, Vec<usize>>> = HashMap::new();
    for (idx, tx) in txs.iter().enumerate() {
        if let Some(target) = tx.receiver {
            by_target
                .entry(target)
                .or_default()
                .entry(tx.sender)
                .or_default()
                .push(idx);
        }
    }

    let mut legs: BTreeMap<usize, (SandwichRole, f64)> = BTreeMap::new();
    let mut incidents = Vec::new();

    for (victim_idx, victim) in txs.iter().enumerate() {
        let Some(target) = victim.receiver else {
            continue;
        };
        let Some(senders) = by_target.get(&target) else {
            continue;
        };

        let mut best: Option<Candidate> = None;
        for (sender, indices) in senders {
            if *sender == victim.sender {
                continue;
            }
            let Some(candidate) = nearest_pair(txs, indices, victim_idx, &legs, policy) else {
                continue;
            };
            if best.as_ref().map_or(true, |b| candidate.key() < b.key()) {
                best = Some(candidate);
            }
        }

        let Some(pair) = best else {
            continue;
        };

        let front = &txs[pair.front];
        let back = &txs[pair.back];
        let victim_gas = victim.gas_price.max(MIN_GAS_PRICE);
        legs.entry(pair.front)
            .or_insert((SandwichRole::Front, front.gas_price / victim_gas));
        legs.entry(pair.back)
            .or_insert((SandwichRole::Back, back.gas_price / victim_gas));

        let corroborated = classifier_flags
            .iter()
            .any(|f| f.tx_hash == front.hash || f.tx_hash == back.hash);

        incidents.push(SandwichIncident {
            block_number: block.number,
            victim: victim.hash,
            victim_position: victim.position,
            front: front.hash,
            back: back.hash,
            attacker: front.sender,
            target,
            front_gas_price: front.gas_price,
            victim_gas_price: victim.gas_price,
            back_gas_price: back.gas_price,
            corroborated,
        });
    }

    let flags = legs
        .into_iter()
        .map(|(idx, (role, score))| Flag::new(txs[idx].hash, FlagKind::SandwichLeg(role), score))
        .collect();

    SandwichDetection { flags, incidents }
}

struct Candidate {
    front: usize,
    back: usize,
    span: u64,
    back_position: u64,
}

impl Candidate {
    /// Smallest total distance first, then the earliest back leg.
    fn key(&self) -> (u64, u64) {
        (self.span, self.back_position)
    }
}

/// Nearest usable front and back legs from one attacker around the victim.
fn nearest_pair(
    txs: &[Transaction],
    indices: &[usize],
    victim_idx: usize,
    legs: &BTreeMap<usize, (SandwichRole, f64)>,
    policy: &SandwichPolicy,
) -> Option<Candidate> {
    let victim = &txs[victim_idx];
    let split = indices.partition_point(|&i| i < victim_idx);

    let front = indices[..split].iter().rev().copied().find(|&i| {
        role_of(legs, i) != Some(SandwichRole::Back) && front_gas_ok(&txs[i], victim, policy)
    })?;
    let back = indices[split..].iter().copied().find(|&i| {
        role_of(legs, i) != Some(SandwichRole::Front) && back_gas_ok(&txs[i], victim, policy)
    })?;

    Some(Candidate {
        front,
        back,
        span: txs[back].position - txs[front].position,
        back_position: txs[back].position,
    })
}

fn role_of(legs: &BTreeMap<usize, (SandwichRole, f64)>, idx: usize) -> Option<SandwichRole> {
    legs.get(&idx).map(|(role, _)| *role)
}

fn front_gas_ok(front: &Transaction, victim: &Transaction, policy: &SandwichPolicy) -> bool {
    match policy.gas_ordering {
        GasOrdering::Any => true,
        GasOrdering::FrontNotBelowVictim => front.gas_price >= victim.gas_price,
        GasOrdering::StrictBracket => front.gas_price > victim.gas_price,
    }
}

fn back_gas_ok(back: &Transaction, victim: &Transaction, policy: &SandwichPolicy) -> bool {
    match policy.gas_ordering {
        GasOrdering::StrictBracket => back.gas_price > victim.gas_price,
        GasOrdering::Any | GasOrdering::FrontNotBelowVictim => true,
    }
}
