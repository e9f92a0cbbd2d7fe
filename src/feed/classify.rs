//! Pure transaction classification and block normalisation.

use crate::feed::{RawBlock, RawTransaction};
use crate::model::{Block, BlockOrigin, Transaction, TransactionCategory};
use crate::reliability::fault::TransportError;

const TRANSFER_SIG: &str = "0xa9059cbb";

/// 4-byte selector table. Transfer is handled before the lookup.
const SIGNATURES: &[(&str, TransactionCategory)] = &[
    ("0x095ea7b3", TransactionCategory::Approve),
    // DEX routers
    ("0x38ed1739", TransactionCategory::Swap),
    ("0x8803dbee", TransactionCategory::Swap),
    ("0x7ff36ab5", TransactionCategory::Swap),
    ("0xfb3bdb41", TransactionCategory::Swap),
    ("0x18cbafe5", TransactionCategory::Swap),
    ("0xa694fc3a", TransactionCategory::Stake),
    ("0xbc4bafe4", TransactionCategory::Stake),
    ("0xe2bbb158", TransactionCategory::Stake),
    ("0x2e1a7d4d", TransactionCategory::Unstake),
    ("0xdb006a75", TransactionCategory::Unstake),
    ("0x853828b6", TransactionCategory::Unstake),
    ("0x4e71d92d", TransactionCategory::Claim),
    ("0x6a761202", TransactionCategory::Claim),
    ("0x2f6c493c", TransactionCategory::Claim),
];

/// Leading selector of a call input, or empty when there is none.
pub fn method_signature(input: &str) -> String {
    if input.len() >= 10 && input.is_char_boundary(10) {
        input[..10].to_ascii_lowercase()
    } else {
        String::new()
    }
}

pub fn classify(input: &str, value_wei: u128) -> TransactionCategory {
    let input = input.trim();
    if input.is_empty() || input == "0x" {
        return TransactionCategory::Transfer;
    }
    let sig = method_signature(input);
    if sig == TRANSFER_SIG {
        return TransactionCategory::Transfer;
    }
    let category = SIGNATURES
        .iter()
        .find(|(s, _)| *s == sig)
        .map(|(_, c)| *c)
        .unwrap_or(TransactionCategory::Contract);
    if category == TransactionCategory::Contract && value_wei > 0 {
        return TransactionCategory::Transfer;
    }
    category
}

pub fn parse_quantity(field: &str, raw: &str) -> Result<u128, TransportError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| TransportError::malformed(format!("{} not hex: {:?}", field, raw)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| TransportError::malformed(format!("{} {:?}: {}", field, raw, e)))
}

fn parse_u64(field: &str, raw: &str) -> Result<u64, TransportError> {
    let v = parse_quantity(field, raw)?;
    u64::try_from(v).map_err(|_| TransportError::malformed(format!("{} overflows u64", field)))
}

fn normalize_transaction(
    raw: &RawTransaction,
    position: usize,
    height: u64,
    timestamp_ms: u64,
) -> Result<Transaction, TransportError> {
    let value_wei = match &raw.value {
        Some(v) => parse_quantity("value", v)?,
        None => 0,
    };
    let gas_limit = match &raw.gas {
        Some(g) => parse_u64("gas", g)?,
        None => 0,
    };
    let gas_used = match &raw.gas_used {
        Some(g) => parse_u64("gasUsed", g)?,
        None => gas_limit,
    };
    let index = match &raw.transaction_index {
        Some(i) => parse_u64("transactionIndex", i)? as u32,
        None => position as u32,
    };
    Ok(Transaction {
        hash: raw.hash.clone(),
        from: raw.from.clone(),
        to: raw.to.clone(),
        value: value_wei as f64 / 1e18,
        gas_used,
        gas_limit,
        method_signature: method_signature(&raw.input),
        block_height: Some(height),
        timestamp_ms,
        confirmed: true,
        category: classify(&raw.input, value_wei),
        index,
    })
}

/// Turn a raw block into a live `Block`. Every transaction in it is
/// confirmed and bound to the block height.
pub fn normalize_block(raw: &RawBlock) -> Result<Block, TransportError> {
    let height = parse_u64("number", &raw.number)?;
    let hash = raw
        .hash
        .clone()
        .ok_or_else(|| TransportError::malformed("block has no hash"))?;
    let timestamp = if raw.timestamp.is_empty() {
        0
    } else {
        parse_u64("timestamp", &raw.timestamp)?
    };
    let gas_price_wei = match &raw.gas_price {
        Some(g) => parse_quantity("gasPrice", g)?,
        None => 0,
    };

    let transactions = raw
        .transactions
        .iter()
        .enumerate()
        .map(|(i, tx)| normalize_transaction(tx, i, height, timestamp * 1000))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Block {
        height,
        hash,
        gas_price_gwei: gas_price_wei as f64 / 1e9,
        timestamp,
        transaction_count: transactions.len(),
        transactions,
        origin: BlockOrigin::Live,
    })
}
