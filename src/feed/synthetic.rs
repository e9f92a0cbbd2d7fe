//! Deterministic stand-in data for when the chain is unreachable.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::model::{Block, BlockOrigin, Transaction, TransactionCategory};

pub const BASE_HEIGHT: u64 = 2_847_392;
pub const GENESIS_MS: u64 = 1_640_995_200_000;
pub const FALLBACK_MIN_TXS: usize = 15;
/// Exclusive.
pub const FALLBACK_MAX_TXS: usize = 50;

/// Stable placeholder selector for synthetic generic contract calls.
const CONTRACT_SIG: &str = "0x60806040";

pub fn fallback_height(now_ms: u64, block_time_ms: u64) -> u64 {
    BASE_HEIGHT + now_ms.saturating_sub(GENESIS_MS) / block_time_ms.max(1)
}

/// `0x`-prefixed hex of the first `bytes` bytes of SHA-256 over `parts`.
pub fn hex_digest(parts: &[&[u8]], bytes: usize) -> String {
    let mut out = String::with_capacity(2 + bytes * 2);
    out.push_str("0x");
    let mut round: u32 = 0;
    while out.len() < 2 + bytes * 2 {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.update(round.to_be_bytes());
        out.push_str(&hex::encode(hasher.finalize()));
        round += 1;
    }
    out.truncate(2 + bytes * 2);
    out
}

fn signature_for(category: TransactionCategory) -> &'static str {
    category.canonical_signature().unwrap_or(CONTRACT_SIG)
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticGenerator {
    counter: u64,
}

impl SyntheticGenerator {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    fn next_rng(&mut self, height: u64) -> StdRng {
        self.counter += 1;
        StdRng::seed_from_u64(height.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ self.counter)
    }

    /// Full synthetic block at `height`.
    pub fn block(&mut self, height: u64, now_ms: u64) -> Block {
        let counter = self.counter + 1;
        let mut rng = self.next_rng(height);
        let count = rng.gen_range(FALLBACK_MIN_TXS..FALLBACK_MAX_TXS);
        let timestamp = now_ms / 1000;
        let transactions = generate_transactions(&mut rng, height, counter, count, now_ms);
        Block {
            height,
            hash: hex_digest(
                &[&b"block"[..], &height.to_be_bytes()[..], &counter.to_be_bytes()[..]],
                32,
            ),
            gas_price_gwei: 1.5 + rng.gen::<f64>() * 3.5,
            timestamp,
            transaction_count: transactions.len(),
            transactions,
            origin: BlockOrigin::Synthetic,
        }
    }

    /// Populate a live block that came back without transactions. Height,
    /// hash and gas price stay as reported.
    pub fn fill_transactions(&mut self, block: &mut Block, now_ms: u64) {
        let counter = self.counter + 1;
        let mut rng = self.next_rng(block.height);
        let count = rng.gen_range(FALLBACK_MIN_TXS..FALLBACK_MAX_TXS);
        let ts_ms = if block.timestamp > 0 { block.timestamp * 1000 } else { now_ms };
        block.transactions = generate_transactions(&mut rng, block.height, counter, count, ts_ms);
        block.transaction_count = block.transactions.len();
    }
}

fn generate_transactions(
    rng: &mut StdRng,
    height: u64,
    counter: u64,
    count: usize,
    timestamp_ms: u64,
) -> Vec<Transaction> {
    let mut txs: Vec<Transaction> = (0..count)
        .map(|i| {
            let category = TransactionCategory::from_index(i);
            let (h, c, n) = (height.to_be_bytes(), counter.to_be_bytes(), (i as u64).to_be_bytes());
            let gas_used = 21_000 + rng.gen_range(0..200_000u64);
            // Generic contract calls and approvals carry no value so they
            // classify the same way a real one would.
            let value = match category {
                TransactionCategory::Contract | TransactionCategory::Approve => 0.0,
                _ => (rng.gen::<f64>() * 1_000.0).round() / 1_000.0,
            };
            Transaction {
                hash: hex_digest(&[&b"tx"[..], &h[..], &c[..], &n[..]], 32),
                from: hex_digest(&[&b"from"[..], &h[..], &c[..], &n[..]], 20),
                to: Some(hex_digest(&[&b"to"[..], &h[..], &c[..], &n[..]], 20)),
                value,
                gas_used,
                gas_limit: gas_used + gas_used / 5,
                method_signature: signature_for(category).to_string(),
                block_height: Some(height),
                timestamp_ms,
                confirmed: true,
                category,
                index: i as u32,
            }
        })
        .collect();
    ensure_all_categories(&mut txs);
    txs
}

/// Rewrite surplus slots so every category occurs at least once. Blocks
/// with fewer than seven transactions get as many distinct categories as
/// they have slots.
pub fn ensure_all_categories(txs: &mut [Transaction]) {
    for category in TransactionCategory::ALL {
        if txs.iter().any(|tx| tx.category == category) {
            continue;
        }
        let slot = (0..txs.len()).find(|&j| {
            let c = txs[j].category;
            txs.iter().filter(|tx| tx.category == c).count() > 1
        });
        let Some(j) = slot else {
            return;
        };
        txs[j].category = category;
        txs[j].method_signature = signature_for(category).to_string();
        if matches!(category, TransactionCategory::Contract | TransactionCategory::Approve) {
            txs[j].value = 0.0;
        }
    }
}

/// Stand-in transaction for a passenger spawned without a block. The hex
/// fields are arithmetic patterns of `index`, so the same index always
/// yields the same record.
pub fn pseudo_transaction(index: u64, now_ms: u64) -> Transaction {
    let pattern = |len: u64, a: u64, b: u64| -> String {
        let digits: String = (0..len)
            .map(|j| {
                let d = ((j * a + index * b) % 16) as u32;
                std::char::from_digit(d, 16).unwrap_or('0')
            })
            .collect();
        format!("0x{}", digits)
    };
    let category = TransactionCategory::from_index(index as usize);
    let gas_used = 21_000 + (index * 1_000) % 100_000;
    Transaction {
        hash: pattern(64, 13, 7),
        from: pattern(40, 11, 5),
        to: Some(pattern(40, 7, 11)),
        value: (index % 10) as f64 + 0.1,
        gas_used,
        gas_limit: gas_used,
        method_signature: signature_for(category).to_string(),
        block_height: None,
        timestamp_ms: now_ms,
        confirmed: false,
        category,
        index: index as u32,
    }
}
