//! Messages flowing between the ingest driver, the balance runner, and
//! downstream publishers.

use crate::entities::Balance;
use tokio::sync::oneshot;

/// Distinct participant addresses of one block.
///
/// Addresses are normalized (no network prefix), unique, and sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockAddressSet {
    pub height: u64,
    pub addresses: Vec<String>,
}

impl BlockAddressSet {
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }
}

/// A block's address set on its way to the balance runner.
///
/// The runner fires `settled` once every chunk of the set reached a terminal
/// state. Dropping it unfired means the runner stopped.
#[derive(Debug)]
pub struct BalanceSyncRequest {
    pub set: BlockAddressSet,
    pub settled: oneshot::Sender<()>,
}

impl BalanceSyncRequest {
    pub fn new(set: BlockAddressSet) -> (Self, oneshot::Receiver<()>) {
        let (settled, settled_rx) = oneshot::channel();
        (Self { set, settled }, settled_rx)
    }
}

/// Fire-and-forget notifications for publish/broadcast collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineSignal {
    /// Balances freshly fetched from the node for one chunk of a block.
    BalancesFetched { height: u64, balances: Vec<Balance> },
    /// Every chunk of the block reached a terminal state.
    BlockSettled(BlockAddressSet),
}
