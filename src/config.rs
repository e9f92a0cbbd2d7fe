use anyhow::{anyhow, Result};
use serde::Serialize;
use std::str::FromStr;

use crate::model::TransactionCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CarrierKind {
    Balloon,
    Zeppelin,
}

impl CarrierKind {
    pub fn from_env() -> Self {
        match std::env::var("CARRIER_KIND").unwrap_or_else(|_| "balloon".to_string()).as_str() {
            "zeppelin" => CarrierKind::Zeppelin,
            _ => CarrierKind::Balloon,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            CarrierKind::Balloon => CarrierKind::Zeppelin,
            CarrierKind::Zeppelin => CarrierKind::Balloon,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CarrierKind::Balloon => "balloon",
            CarrierKind::Zeppelin => "zeppelin",
        }
    }
}

/// Flight speed factor per transaction category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategorySpeeds {
    pub transfer: f64,
    pub approve: f64,
    pub swap: f64,
    pub stake: f64,
    pub unstake: f64,
    pub claim: f64,
    pub contract: f64,
}

impl Default for CategorySpeeds {
    fn default() -> Self {
        Self {
            transfer: 1.0,
            approve: 0.8,
            swap: 1.5,
            stake: 0.9,
            unstake: 1.1,
            claim: 1.3,
            contract: 0.7,
        }
    }
}

impl CategorySpeeds {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            transfer: env_or("SPEED_TRANSFER", d.transfer),
            approve: env_or("SPEED_APPROVE", d.approve),
            swap: env_or("SPEED_SWAP", d.swap),
            stake: env_or("SPEED_STAKE", d.stake),
            unstake: env_or("SPEED_UNSTAKE", d.unstake),
            claim: env_or("SPEED_CLAIM", d.claim),
            contract: env_or("SPEED_CONTRACT", d.contract),
        }
    }

    pub fn factor(&self, category: TransactionCategory) -> f64 {
        match category {
            TransactionCategory::Transfer => self.transfer,
            TransactionCategory::Approve => self.approve,
            TransactionCategory::Swap => self.swap,
            TransactionCategory::Stake => self.stake,
            TransactionCategory::Unstake => self.unstake,
            TransactionCategory::Claim => self.claim,
            TransactionCategory::Contract => self.contract,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub canvas_width: f64,
    pub canvas_height: f64,

    // Carriers
    pub carrier_kind: CarrierKind,
    pub launch_height: f64,
    pub fly_speed: f64,
    pub category_speeds: CategorySpeeds,
    /// Loading time after which a carrier launches partially full.
    pub wait_timeout_ms: u64,
    /// Loading age at which the per-tick check errors a carrier out.
    pub stuck_timeout_ms: u64,
    pub wind_strength: f64,

    // Passengers
    pub walk_speed: f64,
    pub return_speed: f64,
    pub spawn_rate: f64,
    pub max_waiting_passengers: usize,
    pub initial_passengers: usize,
    pub max_manual_passengers: usize,

    // Population bounds
    pub max_carriers: usize,
    pub max_passengers: usize,
    pub max_visible_passengers: usize,
    pub max_particles: usize,

    // Feed
    pub rpc_url: String,
    pub rpc_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub blocks_per_update: u32,
    pub block_time_ms: u64,
    pub feed_channel_capacity: usize,

    // Scheduling and recovery
    pub cleanup_interval_ms: u64,
    pub health_interval_ms: u64,
    pub health_stuck_ms: u64,
    pub error_forgive_ms: u64,
    pub max_errors: u32,
    pub recovery_delay_ms: u64,
    pub frame_interval_ms: u64,
    pub checkpoint_interval_ms: u64,

    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            canvas_width: 1200.0,
            canvas_height: 800.0,
            carrier_kind: CarrierKind::Balloon,
            launch_height: 650.0,
            fly_speed: 0.7,
            category_speeds: CategorySpeeds::default(),
            wait_timeout_ms: 10_000,
            stuck_timeout_ms: 60_000,
            wind_strength: 0.2,
            walk_speed: 2.5,
            return_speed: 2.0,
            spawn_rate: 0.1,
            max_waiting_passengers: 20,
            initial_passengers: 20,
            max_manual_passengers: 10_000,
            max_carriers: 7,
            max_passengers: 200,
            max_visible_passengers: 200,
            max_particles: 30,
            rpc_url: "https://testnet-rpc.monad.xyz".to_string(),
            rpc_timeout_ms: 4_000,
            poll_interval_ms: 500,
            blocks_per_update: 1,
            block_time_ms: 2_000,
            feed_channel_capacity: 64,
            cleanup_interval_ms: 3_000,
            health_interval_ms: 30_000,
            health_stuck_ms: 120_000,
            error_forgive_ms: 60_000,
            max_errors: 3,
            recovery_delay_ms: 2_000,
            frame_interval_ms: 16,
            checkpoint_interval_ms: 10_000,
            seed: 0x7f4a_7c15,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            canvas_width: env_or("CANVAS_WIDTH", d.canvas_width),
            canvas_height: env_or("CANVAS_HEIGHT", d.canvas_height),
            carrier_kind: CarrierKind::from_env(),
            launch_height: env_or("LAUNCH_HEIGHT", d.launch_height),
            fly_speed: env_or("FLY_SPEED", d.fly_speed),
            category_speeds: CategorySpeeds::from_env(),
            wait_timeout_ms: env_or("WAIT_TIMEOUT_MS", d.wait_timeout_ms),
            stuck_timeout_ms: env_or("STUCK_TIMEOUT_MS", d.stuck_timeout_ms),
            wind_strength: env_or("WIND_STRENGTH", d.wind_strength),
            walk_speed: env_or("WALK_SPEED", d.walk_speed),
            return_speed: env_or("RETURN_SPEED", d.return_speed),
            spawn_rate: env_or("SPAWN_RATE", d.spawn_rate),
            max_waiting_passengers: env_or("MAX_WAITING", d.max_waiting_passengers),
            initial_passengers: env_or("INITIAL_PASSENGERS", d.initial_passengers),
            max_manual_passengers: env_or("MAX_MANUAL_PASSENGERS", d.max_manual_passengers),
            max_carriers: env_or("MAX_CARRIERS", d.max_carriers),
            max_passengers: env_or("MAX_PASSENGERS", d.max_passengers),
            max_visible_passengers: env_or("MAX_VISIBLE", d.max_visible_passengers),
            max_particles: env_or("MAX_PARTICLES", d.max_particles),
            rpc_url: std::env::var("RPC_URL").unwrap_or(d.rpc_url),
            rpc_timeout_ms: env_or("RPC_TIMEOUT_MS", d.rpc_timeout_ms),
            poll_interval_ms: env_or("POLL_INTERVAL_MS", d.poll_interval_ms),
            blocks_per_update: env_or("BLOCKS_PER_UPDATE", d.blocks_per_update),
            block_time_ms: env_or("BLOCK_TIME_MS", d.block_time_ms),
            feed_channel_capacity: env_or("FEED_CHANNEL_CAP", d.feed_channel_capacity),
            cleanup_interval_ms: env_or("CLEANUP_INTERVAL_MS", d.cleanup_interval_ms),
            health_interval_ms: env_or("HEALTH_INTERVAL_MS", d.health_interval_ms),
            health_stuck_ms: env_or("HEALTH_STUCK_MS", d.health_stuck_ms),
            error_forgive_ms: env_or("ERROR_FORGIVE_MS", d.error_forgive_ms),
            max_errors: env_or("MAX_ERRORS", d.max_errors),
            recovery_delay_ms: env_or("RECOVERY_DELAY_MS", d.recovery_delay_ms),
            frame_interval_ms: env_or("FRAME_INTERVAL_MS", d.frame_interval_ms),
            checkpoint_interval_ms: env_or("CHECKPOINT_INTERVAL_MS", d.checkpoint_interval_ms),
            seed: std::env::var("SEED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis() as u64),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.rpc_url == "offline"
    }

    pub fn block_time_secs(&self) -> f64 {
        (self.block_time_ms as f64 / 1000.0).max(0.001)
    }

    pub fn canvas_center(&self) -> crate::model::Vec2 {
        crate::model::Vec2::new(self.canvas_width / 2.0, self.canvas_height / 2.0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.canvas_width < 600.0 || self.canvas_height < 300.0 {
            return Err(anyhow!(
                "canvas {}x{} too small (min 600x300)",
                self.canvas_width,
                self.canvas_height
            ));
        }
        if self.max_errors == 0 {
            return Err(anyhow!("MAX_ERRORS must be at least 1"));
        }
        if self.poll_interval_ms == 0 || self.frame_interval_ms == 0 || self.block_time_ms == 0 {
            return Err(anyhow!("intervals must be non-zero"));
        }
        if self.max_carriers == 0 {
            return Err(anyhow!("MAX_CARRIERS must be at least 1"));
        }
        if !self.is_offline() {
            let parsed = url::Url::parse(&self.rpc_url)
                .map_err(|e| anyhow!("invalid RPC_URL {}: {}", self.rpc_url, e))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(anyhow!("RPC_URL must be http(s), got {}", parsed.scheme()));
            }
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
