//! RPC surface exposed to the network layer
//!
//! Every request kind is a variant of [`RpcRequest`] and is dispatched by a
//! single `match` in [`RpcRouter::handle`]. Peer management and the host
//! protocol are collaborators injected as trait objects; wire framing belongs
//! to the gateway.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{ConsensusError, ErrorClass};
use crate::mempool::TransactionPool;
use crate::state::ConsensusSet;
use crate::types::*;

/// Network address a peer can be reached at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress(pub String);

/// Terms a host advertises to renters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    pub total_storage: u64,
    pub min_filesize: u64,
    pub max_filesize: u64,
    pub min_duration: BlockHeight,
    pub max_duration: BlockHeight,
    /// Length of the proof window the host requires
    pub window_size: BlockHeight,
    /// Price per byte per block
    pub price: Currency,
    pub collateral: Currency,
    pub unlock_hash: UnlockHash,
}

/// Request for the data stored under a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequest {
    pub contract_id: ContractId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcRequest {
    AcceptBlock(Block),
    AcceptTransaction(Transaction),
    AddMe(PeerAddress),
    /// Known block ids, most recent first
    SendBlocks(Vec<BlockId>),
    HostSettings,
    /// A renter's contract transaction, for the host to complete
    NegotiateContract(Transaction),
    RetrieveFile(FileRequest),
}

impl RpcRequest {
    pub fn name(&self) -> &'static str {
        match self {
            RpcRequest::AcceptBlock(_) => "AcceptBlock",
            RpcRequest::AcceptTransaction(_) => "AcceptTransaction",
            RpcRequest::AddMe(_) => "AddMe",
            RpcRequest::SendBlocks(_) => "SendBlocks",
            RpcRequest::HostSettings => "HostSettings",
            RpcRequest::NegotiateContract(_) => "NegotiateContract",
            RpcRequest::RetrieveFile(_) => "RetrieveFile",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcResponse {
    Ack,
    Blocks(Vec<Block>),
    HostSettings(HostSettings),
    /// Id of the contract transaction submitted to the pool
    ContractFormed(TransactionId),
    File(Vec<u8>),
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Module(#[from] anyhow::Error),
}

impl RpcError {
    /// Whether the requesting peer sent something permanently invalid
    pub fn is_penalizable(&self) -> bool {
        matches!(self, RpcError::Consensus(e) if e.is_penalizable())
    }

    /// Whether the peer should be asked for the missing ancestors
    pub fn is_orphan(&self) -> bool {
        matches!(self, RpcError::Consensus(e) if e.class() == ErrorClass::Orphan)
    }
}

/// Peer set and relay, provided by the P2P layer
pub trait Gateway: Send + Sync {
    fn add_me(&self, peer: &PeerAddress) -> anyhow::Result<()>;
    fn relay_block(&self, block: &Block) -> anyhow::Result<()>;
    fn relay_transaction(&self, tx: &Transaction) -> anyhow::Result<()>;
}

/// Storage host protocol
pub trait Host: Send + Sync {
    fn settings(&self) -> anyhow::Result<HostSettings>;
    /// Check and complete a renter's contract transaction
    fn negotiate_contract(&self, tx: Transaction) -> anyhow::Result<Transaction>;
    fn retrieve_file(&self, request: &FileRequest) -> anyhow::Result<Vec<u8>>;
}

pub struct RpcRouter {
    consensus: Arc<ConsensusSet>,
    pool: Arc<TransactionPool>,
    gateway: Arc<dyn Gateway>,
    host: Arc<dyn Host>,
}

impl RpcRouter {
    pub fn new(
        consensus: Arc<ConsensusSet>,
        pool: Arc<TransactionPool>,
        gateway: Arc<dyn Gateway>,
        host: Arc<dyn Host>,
    ) -> Self {
        Self { consensus, pool, gateway, host }
    }

    pub fn handle(&self, request: RpcRequest) -> Result<RpcResponse, RpcError> {
        let name = request.name();
        let response = match request {
            RpcRequest::AcceptBlock(block) => {
                self.consensus.accept_block(block.clone())?;
                self.relay(name, self.gateway.relay_block(&block));
                RpcResponse::Ack
            }
            RpcRequest::AcceptTransaction(tx) => {
                self.pool.accept_transaction(tx.clone())?;
                self.relay(name, self.gateway.relay_transaction(&tx));
                RpcResponse::Ack
            }
            RpcRequest::AddMe(peer) => {
                self.gateway.add_me(&peer)?;
                RpcResponse::Ack
            }
            RpcRequest::SendBlocks(known) => RpcResponse::Blocks(self.consensus.blocks_after(&known)),
            RpcRequest::HostSettings => RpcResponse::HostSettings(self.host.settings()?),
            RpcRequest::NegotiateContract(tx) => {
                let tx = self.host.negotiate_contract(tx)?;
                let id = self.pool.accept_transaction(tx.clone())?;
                self.relay(name, self.gateway.relay_transaction(&tx));
                RpcResponse::ContractFormed(id)
            }
            RpcRequest::RetrieveFile(request) => RpcResponse::File(self.host.retrieve_file(&request)?),
        };
        debug!(rpc = name, "handled request");
        Ok(response)
    }

    fn relay(&self, rpc: &str, result: anyhow::Result<()>) {
        if let Err(e) = result {
            warn!(rpc, error = %e, "relay failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusParams;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingGateway {
        peers: Mutex<Vec<PeerAddress>>,
        relayed_txs: Mutex<Vec<TransactionId>>,
    }

    impl Gateway for RecordingGateway {
        fn add_me(&self, peer: &PeerAddress) -> anyhow::Result<()> {
            self.peers.lock().push(peer.clone());
            Ok(())
        }

        fn relay_block(&self, _block: &Block) -> anyhow::Result<()> {
            Ok(())
        }

        fn relay_transaction(&self, tx: &Transaction) -> anyhow::Result<()> {
            self.relayed_txs.lock().push(tx.id());
            Ok(())
        }
    }

    struct RefusingHost;

    impl Host for RefusingHost {
        fn settings(&self) -> anyhow::Result<HostSettings> {
            anyhow::bail!("not hosting")
        }

        fn negotiate_contract(&self, _tx: Transaction) -> anyhow::Result<Transaction> {
            anyhow::bail!("not hosting")
        }

        fn retrieve_file(&self, _request: &FileRequest) -> anyhow::Result<Vec<u8>> {
            anyhow::bail!("not hosting")
        }
    }

    fn router() -> (RpcRouter, Arc<RecordingGateway>, Arc<ConsensusSet>) {
        let consensus = ConsensusSet::new(ConsensusParams::testing()).unwrap();
        let pool = TransactionPool::new(consensus.clone());
        let gateway = Arc::new(RecordingGateway::default());
        let router = RpcRouter::new(consensus.clone(), pool, gateway.clone(), Arc::new(RefusingHost));
        (router, gateway, consensus)
    }

    #[test]
    fn test_add_me_and_send_blocks() {
        let (router, gateway, _) = router();
        let peer = PeerAddress("10.0.0.1:9988".to_string());
        assert_eq!(router.handle(RpcRequest::AddMe(peer.clone())).unwrap(), RpcResponse::Ack);
        assert_eq!(*gateway.peers.lock(), vec![peer]);
        assert_eq!(router.handle(RpcRequest::SendBlocks(vec![])).unwrap(), RpcResponse::Blocks(vec![]));
    }

    #[test]
    fn test_accept_transaction_relays() {
        let (router, gateway, consensus) = router();
        let genesis = consensus.current_block().unwrap();
        let tx = Transaction {
            inputs: vec![Input {
                parent_id: genesis.miner_payout_id(0),
                unlock_conditions: UnlockConditions::anyone_can_spend(),
            }],
            outputs: vec![Output { value: 300_000, unlock_hash: UnlockHash([1; 32]) }],
            ..Default::default()
        };
        router.handle(RpcRequest::AcceptTransaction(tx.clone())).unwrap();
        assert_eq!(*gateway.relayed_txs.lock(), vec![tx.id()]);

        let err = router.handle(RpcRequest::AcceptTransaction(tx)).unwrap_err();
        assert!(!err.is_penalizable());
    }

    #[test]
    fn test_host_errors_are_module_errors() {
        let (router, _, _) = router();
        let err = router.handle(RpcRequest::HostSettings).unwrap_err();
        assert!(matches!(err, RpcError::Module(_)));
        assert!(!err.is_penalizable());
    }

    #[test]
    fn test_orphan_block_signals_backfill() {
        let (router, _, consensus) = router();
        let block = Block {
            parent_id: BlockId([3; 32]),
            timestamp: consensus.params().genesis_timestamp,
            nonce: 0,
            miner_payouts: vec![],
            transactions: vec![],
        };
        let block = crate::mining::solve_block(block, &consensus.params().root_target, 10_000).unwrap();
        let err = router.handle(RpcRequest::AcceptBlock(block)).unwrap_err();
        assert!(err.is_orphan());
        assert_eq!(RpcRequest::HostSettings.name(), "HostSettings");
    }
}
