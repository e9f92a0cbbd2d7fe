//! Feed adapter: polls a block source and always hands back a usable block.

pub mod classify;
pub mod retry;
pub mod rpc;
pub mod synthetic;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::logging::{log, obj, v_num, v_str, v_u64, Domain, Level};
use crate::model::{Block, BlockOrigin};
use crate::reliability::fault::TransportError;
use retry::{retry_async, RetryConfig};
use synthetic::SyntheticGenerator;

/// Transaction as it appears on the wire (hex quantities).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub gas: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub transaction_index: Option<String>,
}

impl RawTransaction {
    pub fn new(hash: &str, input: &str, value_wei: u128) -> Self {
        Self {
            hash: hash.to_string(),
            from: format!("0x{}", "1".repeat(40)),
            to: Some(format!("0x{}", "2".repeat(40))),
            value: Some(format!("{:#x}", value_wei)),
            gas: Some(format!("{:#x}", 21_000u64)),
            gas_used: None,
            input: input.to_string(),
            transaction_index: None,
        }
    }
}

/// Latest block as returned by a source, before normalisation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub number: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

impl RawBlock {
    pub fn new(height: u64, timestamp_secs: u64, gas_price_wei: u128) -> Self {
        Self {
            number: format!("{:#x}", height),
            hash: Some(synthetic::hex_digest(&[&b"raw"[..], &height.to_be_bytes()[..]], 32)),
            timestamp: format!("{:#x}", timestamp_secs),
            gas_price: Some(format!("{:#x}", gas_price_wei)),
            transactions: Vec::new(),
        }
    }

    pub fn with_transactions(mut self, transactions: Vec<RawTransaction>) -> Self {
        self.transactions = transactions;
        self
    }
}

#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn fetch_latest_block(&self) -> Result<RawBlock>;

    fn name(&self) -> &'static str {
        "source"
    }
}

/// Source that never answers; every poll degrades to synthetic data.
#[derive(Debug, Clone, Default)]
pub struct OfflineSource;

#[async_trait]
impl BlockSource for OfflineSource {
    async fn fetch_latest_block(&self) -> Result<RawBlock> {
        Err(anyhow!("offline"))
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}

pub fn source_from_config(cfg: &Config) -> Result<Box<dyn BlockSource>> {
    if cfg.is_offline() {
        return Ok(Box::new(OfflineSource));
    }
    Ok(Box::new(rpc::JsonRpcSource::new(&cfg.rpc_url, cfg.rpc_timeout_ms)?))
}

/// Result of one poll. `fault` is set whenever the block is a fallback
/// caused by a transport failure. `expected_height` is the height recorded
/// when the request was issued, so late answers can be recognised.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub block: Block,
    pub fault: Option<TransportError>,
    pub expected_height: u64,
}

impl PollOutcome {
    pub fn is_live(&self) -> bool {
        self.block.origin == BlockOrigin::Live
    }
}

pub struct FeedAdapter {
    source: Box<dyn BlockSource>,
    retry: RetryConfig,
    synthetic: SyntheticGenerator,
    block_time_ms: u64,
    last_height: Option<u64>,
    last_origin: Option<BlockOrigin>,
    last_advance_ms: u64,
    pub polls: u64,
    pub fallbacks: u64,
}

impl FeedAdapter {
    pub fn new(source: Box<dyn BlockSource>, block_time_ms: u64) -> Self {
        Self {
            source,
            retry: RetryConfig::default(),
            synthetic: SyntheticGenerator::new(),
            block_time_ms: block_time_ms.max(1),
            last_height: None,
            last_origin: None,
            last_advance_ms: 0,
            polls: 0,
            fallbacks: 0,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn last_height(&self) -> Option<u64> {
        self.last_height
    }

    /// Never fails: transport and parse errors turn into a synthetic block
    /// plus a reported fault.
    pub async fn poll(&mut self, now_ms: u64) -> PollOutcome {
        self.polls += 1;
        let expected_height = self.last_height.unwrap_or(0);

        let source: &dyn BlockSource = self.source.as_ref();
        let fetched = retry_async(&self.retry, "fetch_latest_block", move || {
            source.fetch_latest_block()
        })
        .await
        .map_err(|e| TransportError::fetch(e.to_string()))
        .and_then(|raw| classify::normalize_block(&raw));

        match fetched {
            Ok(mut block) => {
                if block.transactions.is_empty() {
                    self.synthetic.fill_transactions(&mut block, now_ms);
                    log(
                        Level::Debug,
                        Domain::Feed,
                        "empty_block_filled",
                        obj(&[
                            ("block_height", v_u64(block.height)),
                            ("tx_count", v_u64(block.transaction_count as u64)),
                        ]),
                    );
                }
                self.advance_to(block.height, BlockOrigin::Live, now_ms);
                PollOutcome { block, fault: None, expected_height }
            }
            Err(fault) => {
                self.fallbacks += 1;
                let height = self.fallback_height(now_ms);
                let block = self.synthetic.block(height, now_ms);
                self.advance_to(height, BlockOrigin::Synthetic, now_ms);
                log(
                    Level::Warn,
                    Domain::Feed,
                    "fallback",
                    obj(&[
                        ("source", v_str(self.source.name())),
                        ("error", v_str(&fault.to_string())),
                        ("block_height", v_u64(height)),
                        ("tx_count", v_u64(block.transaction_count as u64)),
                        ("gas_price", v_num(block.gas_price_gwei)),
                    ]),
                );
                PollOutcome { block, fault: Some(fault), expected_height }
            }
        }
    }

    /// Heights only move forward within an origin. The first live block
    /// after a run of fallbacks resets the baseline, since synthetic heights
    /// are clock-derived and may sit far from the real chain.
    fn advance_to(&mut self, height: u64, origin: BlockOrigin, now_ms: u64) {
        let rebase = origin == BlockOrigin::Live && self.last_origin != Some(BlockOrigin::Live);
        match self.last_height {
            Some(h) if height <= h && !rebase => {}
            _ => {
                if rebase && self.last_origin.is_some() {
                    log(
                        Level::Info,
                        Domain::Feed,
                        "live_restored",
                        obj(&[
                            ("block_height", v_u64(height)),
                            ("synthetic_height", v_u64(self.last_height.unwrap_or(0))),
                        ]),
                    );
                }
                self.last_height = Some(height);
                self.last_advance_ms = now_ms;
            }
        }
        self.last_origin = Some(origin);
    }

    /// First fallback derives a height from the clock; later ones step
    /// the last known height by one per elapsed block time.
    fn fallback_height(&self, now_ms: u64) -> u64 {
        match self.last_height {
            None => synthetic::fallback_height(now_ms, self.block_time_ms),
            Some(h) => h + now_ms.saturating_sub(self.last_advance_ms) / self.block_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<RawBlock>>>,
    }

    #[async_trait]
    impl BlockSource for Scripted {
        async fn fetch_latest_block(&self) -> Result<RawBlock> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(anyhow!("script exhausted"));
            }
            replies.remove(0)
        }
    }

    fn adapter(replies: Vec<Result<RawBlock>>) -> FeedAdapter {
        FeedAdapter::new(Box::new(Scripted { replies: Mutex::new(replies) }), 2_000)
            .with_retry(RetryConfig::immediate())
    }

    #[tokio::test]
    async fn test_live_block_is_normalised() {
        let raw = RawBlock::new(100, 1_700_000_000, 2_000_000_000).with_transactions(vec![
            RawTransaction::new("0xaa", "0x", 1),
            RawTransaction::new("0xbb", "0x38ed1739ffff", 0),
        ]);
        let mut feed = adapter(vec![Ok(raw)]);
        let out = feed.poll(5_000).await;
        assert!(out.fault.is_none());
        assert!(out.is_live());
        assert_eq!(out.block.height, 100);
        assert_eq!(out.block.transaction_count, 2);
        assert!((out.block.gas_price_gwei - 2.0).abs() < 1e-9);
        assert_eq!(feed.last_height(), Some(100));
    }

    #[tokio::test]
    async fn test_empty_live_block_gets_synthetic_transactions() {
        let mut feed = adapter(vec![Ok(RawBlock::new(42, 1, 1))]);
        let out = feed.poll(0).await;
        assert!(out.fault.is_none());
        assert_eq!(out.block.height, 42);
        assert!(out.block.transaction_count >= synthetic::FALLBACK_MIN_TXS);
        assert_eq!(out.block.transactions.len(), out.block.transaction_count);
        assert!(out.block.transactions.iter().all(|tx| tx.block_height == Some(42)));
    }

    #[tokio::test]
    async fn test_fallback_steps_from_last_live_height() {
        let mut feed = adapter(vec![Ok(RawBlock::new(500, 1, 1))]);
        feed.poll(10_000).await;
        let out = feed.poll(14_100).await;
        assert!(out.fault.is_some());
        assert_eq!(out.expected_height, 500);
        assert_eq!(out.block.height, 502);
        assert_eq!(out.block.origin, BlockOrigin::Synthetic);
    }

    #[tokio::test]
    async fn test_live_block_rebases_after_startup_fallback() {
        let mut feed = adapter(vec![
            Err(anyhow!("connection refused")),
            Ok(RawBlock::new(40_000_001, 1, 1)),
            Ok(RawBlock::new(40_000_002, 1, 1)),
        ]);
        let t0 = 1_790_000_000_000;
        let first = feed.poll(t0).await;
        assert!(first.fault.is_some());
        assert!(first.block.height > 40_000_002);

        let live = feed.poll(t0 + 500).await;
        assert!(live.is_live());
        assert_eq!(feed.last_height(), Some(40_000_001));
        feed.poll(t0 + 2_500).await;
        assert_eq!(feed.last_height(), Some(40_000_002));

        // Script exhausted: fallback now steps from the live height.
        let fallback = feed.poll(t0 + 4_500).await;
        assert!(fallback.fault.is_some());
        assert_eq!(fallback.block.height, 40_000_003);
    }

    #[tokio::test]
    async fn test_malformed_hex_is_reported() {
        let mut raw = RawBlock::new(1, 1, 1);
        raw.number = "0xzz".to_string();
        let mut feed = adapter(vec![Ok(raw)]);
        let out = feed.poll(0).await;
        let fault = out.fault.expect("malformed block must fault");
        assert_eq!(fault.kind, crate::reliability::TransportErrorKind::Malformed);
    }
}
