//! Core data records shared by the feed, the entity model and the HUD.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed transaction taxonomy. Declaration order is the canonical order used
/// by synthetic generation and tie-breaking tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionCategory {
    Transfer,
    Approve,
    Swap,
    Stake,
    Unstake,
    Claim,
    Contract,
}

impl TransactionCategory {
    pub const ALL: [TransactionCategory; 7] = [
        TransactionCategory::Transfer,
        TransactionCategory::Approve,
        TransactionCategory::Swap,
        TransactionCategory::Stake,
        TransactionCategory::Unstake,
        TransactionCategory::Claim,
        TransactionCategory::Contract,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionCategory::Transfer => "transfer",
            TransactionCategory::Approve => "approve",
            TransactionCategory::Swap => "swap",
            TransactionCategory::Stake => "stake",
            TransactionCategory::Unstake => "unstake",
            TransactionCategory::Claim => "claim",
            TransactionCategory::Contract => "contract",
        }
    }


    /// Representative 4-byte selector used when synthesizing transactions.
    /// Generic contract calls have no single selector.
    pub fn canonical_signature(&self) -> Option<&'static str> {
        match self {
            TransactionCategory::Transfer => Some("0xa9059cbb"),
            TransactionCategory::Approve => Some("0x095ea7b3"),
            TransactionCategory::Swap => Some("0x38ed1739"),
            TransactionCategory::Stake => Some("0xa694fc3a"),
            TransactionCategory::Unstake => Some("0x2e1a7d4d"),
            TransactionCategory::Claim => Some("0x4e71d92d"),
            TransactionCategory::Contract => None,
        }
    }

    pub fn from_index(i: usize) -> Self {
        Self::ALL[i % Self::ALL.len()]
    }
}

impl fmt::Display for TransactionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    /// None for contract creation.
    pub to: Option<String>,
    /// Native units (wei / 1e18).
    pub value: f64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub method_signature: String,
    pub block_height: Option<u64>,
    pub timestamp_ms: u64,
    pub confirmed: bool,
    pub category: TransactionCategory,
    pub index: u32,
}

impl Transaction {
    pub fn bind_to_block(&mut self, height: u64) {
        self.block_height = Some(height);
        self.confirmed = true;
    }

    /// Height this transaction is tied to, only once it is confirmed.
    pub fn bound_height(&self) -> Option<u64> {
        if self.confirmed {
            self.block_height
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockOrigin {
    Live,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub gas_price_gwei: f64,
    /// Seconds since epoch, as reported by the chain.
    pub timestamp: u64,
    pub transaction_count: usize,
    pub transactions: Vec<Transaction>,
    pub origin: BlockOrigin,
}

impl Block {
    pub fn confirmed_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|tx| tx.confirmed)
    }

    pub fn categories_present(&self) -> Vec<TransactionCategory> {
        let mut seen: Vec<TransactionCategory> = Vec::new();
        for tx in &self.transactions {
            if !seen.contains(&tx.category) {
                seen.push(tx.category);
            }
        }
        seen
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CarrierId(pub u64);

impl fmt::Display for CarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PassengerId(pub u64);

impl fmt::Display for PassengerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Vec2) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }

    pub fn manhattan(&self, other: Vec2) -> f64 {
        (other.x - self.x).abs() + (other.y - self.y).abs()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Move `speed` units toward `target`. Callers stop before overshooting
    /// by checking the remaining distance against their arrival radius.
    pub fn step_toward(&self, target: Vec2, speed: f64) -> Vec2 {
        let d = self.distance(target);
        if d <= f64::EPSILON {
            return *self;
        }
        Vec2 {
            x: self.x + (target.x - self.x) / d * speed,
            y: self.y + (target.y - self.y) / d * speed,
        }
    }
}

pub fn lerp(start: f64, end: f64, factor: f64) -> f64 {
    start + (end - start) * factor
}
