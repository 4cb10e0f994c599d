//! Composition root
//!
//! Builds the single consensus state, the pool over it and the RPC router,
//! handing each component only the collaborators it uses.

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use crate::config::NodeConfig;
use crate::mempool::TransactionPool;
use crate::rpc::{FileRequest, Gateway, Host, HostSettings, PeerAddress, RpcRouter};
use crate::state::ConsensusSet;
use crate::types::*;

pub struct Node {
    pub config: NodeConfig,
    pub consensus: Arc<ConsensusSet>,
    pub pool: Arc<TransactionPool>,
    pub router: RpcRouter,
}

impl Node {
    pub fn new(config: NodeConfig, gateway: Arc<dyn Gateway>, host: Arc<dyn Host>) -> anyhow::Result<Self> {
        let params = config.consensus_params();
        let consensus = ConsensusSet::new(params).context("creating genesis state")?;
        let pool = TransactionPool::new(consensus.clone());
        let router = RpcRouter::new(consensus.clone(), pool.clone(), gateway, host);
        info!(
            network = ?config.network,
            rpc_addr = %config.rpc_addr,
            genesis = %consensus.genesis_id(),
            "node ready"
        );
        Ok(Self { config, consensus, pool, router })
    }
}

/// Gateway for a node with no peers: accepts peers, relays nowhere
#[derive(Debug, Default)]
pub struct OfflineGateway;

impl Gateway for OfflineGateway {
    fn add_me(&self, peer: &PeerAddress) -> anyhow::Result<()> {
        debug!(peer = %peer.0, "ignoring peer on offline gateway");
        Ok(())
    }

    fn relay_block(&self, _block: &Block) -> anyhow::Result<()> {
        Ok(())
    }

    fn relay_transaction(&self, _tx: &Transaction) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Host for a node that offers no storage
#[derive(Debug, Default)]
pub struct NoHost;

impl Host for NoHost {
    fn settings(&self) -> anyhow::Result<HostSettings> {
        anyhow::bail!("this node is not hosting")
    }

    fn negotiate_contract(&self, _tx: Transaction) -> anyhow::Result<Transaction> {
        anyhow::bail!("this node is not hosting")
    }

    fn retrieve_file(&self, request: &FileRequest) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("this node stores no data for contract {}", request.contract_id)
    }
}
