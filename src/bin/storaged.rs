//! Storage network daemon: loads its config, installs logging and builds a
//! node around the consensus state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use storage_consensus::config::NodeConfig;
use storage_consensus::node::{NoHost, Node, OfflineGateway};

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("storaged.json"));
    let config = NodeConfig::load_from(&path)?;

    // RUST_LOG wins over the config file
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    fmt().with_env_filter(filter).init();

    info!("Starting storaged with config {:?}", path);
    let node = Node::new(config, Arc::new(OfflineGateway), Arc::new(NoHost))?;
    info!(
        height = node.consensus.height(),
        tip = %node.consensus.current_block_id(),
        outputs = node.consensus.ledger_snapshot().outputs.len(),
        "consensus state initialized"
    );
    Ok(())
}
