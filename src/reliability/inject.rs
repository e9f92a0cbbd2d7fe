use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::feed::{BlockSource, RawBlock};

#[derive(Debug, Clone, PartialEq)]
pub struct FaultProfile {
    /// Chance per entity update of an injected `EntityFault`.
    pub entity_fault_rate: f64,
    /// Chance per fetch of an injected transport failure.
    pub transport_fault_rate: f64,
}

impl FaultProfile {
    pub fn disabled() -> Self {
        Self {
            entity_fault_rate: 0.0,
            transport_fault_rate: 0.0,
        }
    }

    pub fn from_env() -> Self {
        Self {
            entity_fault_rate: std::env::var("FAULT_ENTITY_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
            transport_fault_rate: std::env::var("FAULT_TRANSPORT_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entity_fault_rate > 0.0 || self.transport_fault_rate > 0.0
    }
}

impl Default for FaultProfile {
    fn default() -> Self {
        Self::disabled()
    }
}

pub fn should_fault(seed: u64, rate: f64) -> bool {
    let v = (seed % 10_000) as f64 / 10_000.0;
    v < rate
}

/// Spread sequential counters over the `should_fault` buckets.
pub fn mix(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Wraps a source and fails a deterministic fraction of fetches.
pub struct FlakySource<S> {
    inner: S,
    rate: f64,
    seed: u64,
    calls: AtomicU64,
}

impl<S: BlockSource> FlakySource<S> {
    pub fn new(inner: S, rate: f64, seed: u64) -> Self {
        Self {
            inner,
            rate,
            seed,
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl<S: BlockSource> BlockSource for FlakySource<S> {
    async fn fetch_latest_block(&self) -> Result<RawBlock> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if should_fault(mix(self.seed ^ n), self.rate) {
            return Err(anyhow!("injected transport fault (call {})", n));
        }
        self.inner.fetch_latest_block().await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}
