//! Consensus parameters and node configuration
//!
//! `ConsensusParams` must be identical on every node of a network; the
//! presets are the only supported values. `NodeConfig` is per-node and is
//! loaded from a JSON file, with missing fields filled from defaults.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::*;
use crate::pow::{AdjustmentRatio, Target};
use crate::types::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    // ── Proof of work ───────────────────────────────────────
    /// Easiest target ever accepted; also the target of the genesis child.
    pub root_target: Target,
    /// Blocks the difficulty adjustment looks back over.
    pub target_window: u64,
    /// Seconds expected between blocks.
    pub block_frequency: u64,
    /// Largest factor by which the target may grow (get easier) per block.
    pub max_adjustment_up: AdjustmentRatio,
    /// Smallest factor by which the target may shrink (get harder) per block.
    pub max_adjustment_down: AdjustmentRatio,

    // ── Block limits ────────────────────────────────────────
    pub future_threshold: u64,
    pub past_timestamp_tolerance: u64,
    pub block_size_limit: usize,

    // ── Subsidy ─────────────────────────────────────────────
    pub initial_coinbase: Currency,
    pub minimum_coinbase: Currency,
    pub coin_precision: Currency,

    // ── Genesis ─────────────────────────────────────────────
    pub genesis_timestamp: Timestamp,
    /// Outputs paid by the genesis block.
    pub genesis_outputs: Vec<Output>,

    // ── Relay and pool limits ───────────────────────────────
    pub max_catch_up_blocks: usize,
    pub max_orphans: usize,
    /// Rejected block ids remembered; the oldest are forgotten first.
    pub max_known_invalid: usize,
    pub pool_size_limit: usize,
}

impl ConsensusParams {
    /// Production network parameters.
    pub fn standard() -> Self {
        Self {
            root_target: Target(ROOT_TARGET),
            target_window: TARGET_WINDOW,
            block_frequency: BLOCK_FREQUENCY,
            max_adjustment_up: AdjustmentRatio { numerator: 1001, denominator: 1000 },
            max_adjustment_down: AdjustmentRatio { numerator: 999, denominator: 1000 },
            future_threshold: FUTURE_THRESHOLD,
            past_timestamp_tolerance: PAST_TIMESTAMP_TOLERANCE,
            block_size_limit: BLOCK_SIZE_LIMIT,
            initial_coinbase: INITIAL_COINBASE,
            minimum_coinbase: MINIMUM_COINBASE,
            coin_precision: COIN_PRECISION,
            genesis_timestamp: GENESIS_TIMESTAMP,
            genesis_outputs: vec![Output {
                value: INITIAL_COINBASE * COIN_PRECISION,
                unlock_hash: UnlockHash::default(),
            }],
            max_catch_up_blocks: MAX_CATCH_UP_BLOCKS,
            max_orphans: MAX_ORPHAN_BLOCKS,
            max_known_invalid: MAX_KNOWN_INVALID_BLOCKS,
            pool_size_limit: TRANSACTION_POOL_SIZE_LIMIT,
        }
    }

    /// Parameters for local test networks: cheap proof of work, a short
    /// adjustment window, whole-coin precision and an anyone-can-spend
    /// genesis output.
    pub fn testing() -> Self {
        Self {
            root_target: Target(TESTING_ROOT_TARGET),
            target_window: 10,
            block_frequency: 10,
            coin_precision: 1,
            genesis_outputs: vec![Output {
                value: INITIAL_COINBASE,
                unlock_hash: UnlockConditions::anyone_can_spend().unlock_hash(),
            }],
            ..Self::standard()
        }
    }
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Standard,
    Testing,
}

/// Per-node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    // ── Network ─────────────────────────────────────────────
    pub api_addr: String,
    pub rpc_addr: String,
    pub network: Network,

    // ── Modules ─────────────────────────────────────────────
    pub host_dir: String,
    pub miner_threads: usize,
    pub download_dir: String,
    pub wallet_dir: String,

    // ── Logging ─────────────────────────────────────────────
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` takes precedence.
    pub log_filter: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api_addr: "127.0.0.1:9980".to_string(),
            rpc_addr: ":9988".to_string(),
            network: Network::Standard,
            host_dir: "host".to_string(),
            miner_threads: 1,
            download_dir: "downloads".to_string(),
            wallet_dir: "wallet".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load config from a JSON file. A missing file yields defaults; an
    /// unreadable or corrupt file is an error.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading config {:?}", path));
            }
        };
        let config: NodeConfig = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {:?}", path))?;
        info!("Loaded node config from {:?}", path);
        Ok(config)
    }

    pub fn consensus_params(&self) -> ConsensusParams {
        match self.network {
            Network::Standard => ConsensusParams::standard(),
            Network::Testing => ConsensusParams::testing(),
        }
    }
}
