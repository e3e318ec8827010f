//! Balance sync pipeline.
//!
//! Two worker pools joined by a bounded queue:
//!
//! - fetch workers query the node for one chunk of addresses at the block
//!   height and translate the answer into store ids
//! - reconcile workers diff the fetched balances against the stored ones and
//!   apply the creates, updates and deletes
//!
//! Every fetch job carries a [`ChunkTicket`] that travels on into the
//! reconcile job, so the per-block barrier opens only once each chunk has
//! been reconciled or dropped after a logged failure.

use crate::config::PipelineConfig;
use crate::entities::Balance;
use crate::events::{
    BalanceSyncRequest, BalanceSyncRequestReceiver, BlockAddressSet, PipelineSignal,
    PipelineSignalSender,
};
use crate::node::NodeApi;
use crate::processors::coin_cache::CoinCache;
use crate::store::ExtenderStore;
use crate::utils::chunk_pool::{ChunkTicket, JobHandler, JobSender, PoolClosed, WorkerPool};
use crate::utils::decimal::decimal_eq;
use async_trait::async_trait;
use extender_sdk::address::remove_address_prefix;
use extender_sdk::client::ClientError;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Balance pipeline failures.
///
/// Chunk-level failures are logged by the worker and never propagated; only
/// a closed pool reaches the caller of [`BalanceSync::sync_block`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("node error: {0}")]
    Node(#[from] ClientError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("node returned unknown address {0}")]
    UnknownAddress(String),

    #[error(transparent)]
    PoolClosed(#[from] PoolClosed),
}

/// One chunk of addresses to fetch at a height.
#[derive(Debug)]
pub struct FetchJob {
    pub height: u64,
    pub addresses: Vec<String>,
    pub ticket: ChunkTicket,
}

/// Fetched balances of one chunk, ready for reconciliation.
///
/// `addresses` is the full chunk, so stored balances of addresses the node
/// reported as empty are still deleted.
#[derive(Debug)]
pub struct AddressBalancesContainer {
    pub height: u64,
    pub addresses: Vec<String>,
    pub balances: Vec<Balance>,
    pub ticket: ChunkTicket,
}

/// Row-level changes that bring stored balances in line with fetched ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceDiff {
    pub create: Vec<Balance>,
    pub update: Vec<Balance>,
    pub delete: Vec<Balance>,
}

impl BalanceDiff {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Diff stored balances against freshly fetched ones.
///
/// Pairs present on both sides are updated when the amounts differ
/// numerically. Fetched pairs without a stored row are created when the
/// coin id is positive. Stored pairs absent from the fetch are deleted.
/// With nothing stored yet, every fetched pair is created.
pub fn diff_balances(stored: Vec<Balance>, fetched: Vec<Balance>) -> BalanceDiff {
    if stored.is_empty() {
        return BalanceDiff {
            create: fetched.into_iter().filter(|b| b.coin_id > 0).collect(),
            ..BalanceDiff::default()
        };
    }

    let mut remaining: HashMap<(i64, i64), Balance> =
        stored.into_iter().map(|b| (b.key(), b)).collect();
    let mut diff = BalanceDiff::default();

    for balance in fetched {
        match remaining.remove(&balance.key()) {
            Some(old) => {
                if !decimal_eq(&old.value, &balance.value) {
                    diff.update.push(balance);
                }
            }
            None if balance.coin_id > 0 => diff.create.push(balance),
            None => {}
        }
    }

    diff.delete = remaining.into_values().collect();
    diff.delete.sort_by_key(Balance::key);
    diff
}

struct BalanceFetcher<S, N> {
    store: Arc<S>,
    node: Arc<N>,
    coins: Arc<CoinCache<S, N>>,
    reconcile_tx: JobSender<AddressBalancesContainer>,
    signal_tx: PipelineSignalSender,
}

impl<S: ExtenderStore, N: NodeApi> BalanceFetcher<S, N> {
    /// Query the node and translate the answer into store ids.
    ///
    /// `None` means the node returned nothing for the chunk. An address the
    /// store does not know fails the chunk, and so does a failed coin lookup:
    /// reconciling a partial answer would delete the balances left out. An
    /// unknown coin is skipped.
    async fn fetch(&self, height: u64, addresses: &[String]) -> Result<Option<Vec<Balance>>, SyncError> {
        let response = self.node.address_balances(addresses, height).await?;
        if response.is_empty() {
            return Ok(None);
        }

        let mut balances = Vec::new();
        for item in response {
            let address = remove_address_prefix(&item.address);
            let address_id = self
                .store
                .find_address_id(address)
                .await?
                .ok_or_else(|| SyncError::UnknownAddress(address.to_string()))?;

            for (symbol, value) in item.balance {
                match self.coins.resolve(&symbol).await? {
                    Some(coin_id) => balances.push(Balance::new(address_id, coin_id, value)),
                    None => warn!(height, symbol = %symbol, "Skipping balance of unknown coin"),
                }
            }
        }
        Ok(Some(balances))
    }
}

#[async_trait]
impl<S: ExtenderStore, N: NodeApi> JobHandler<FetchJob> for BalanceFetcher<S, N> {
    async fn handle(&self, job: FetchJob) {
        let FetchJob {
            height,
            addresses,
            ticket,
        } = job;

        let balances = match self.fetch(height, &addresses).await {
            Ok(Some(balances)) => balances,
            Ok(None) => {
                warn!(height, addresses = addresses.len(), "Node returned no balances");
                return;
            }
            Err(e) => {
                error!(height, addresses = addresses.len(), error = %e, "Balance fetch failed");
                return;
            }
        };

        // Nobody listening is fine.
        let _ = self.signal_tx.send(PipelineSignal::BalancesFetched {
            height,
            balances: balances.clone(),
        });

        let container = AddressBalancesContainer {
            height,
            addresses,
            balances,
            ticket,
        };
        if let Err(e) = self.reconcile_tx.submit(container).await {
            error!(height, error = %e, "Cannot queue balance reconciliation");
        }
    }
}

struct BalanceReconciler<S> {
    store: Arc<S>,
}

impl<S: ExtenderStore> BalanceReconciler<S> {
    async fn reconcile(&self, addresses: &[String], fetched: Vec<Balance>) -> Result<BalanceDiff, sqlx::Error> {
        let stored = self.store.find_balances_by_addresses(addresses).await?;
        let diff = diff_balances(stored, fetched);

        if !diff.create.is_empty() {
            self.store.insert_balances(diff.create.clone()).await?;
        }
        if !diff.update.is_empty() {
            self.store.update_balances(diff.update.clone()).await?;
        }
        if !diff.delete.is_empty() {
            self.store.delete_balances(diff.delete.clone()).await?;
        }
        Ok(diff)
    }
}

#[async_trait]
impl<S: ExtenderStore> JobHandler<AddressBalancesContainer> for BalanceReconciler<S> {
    async fn handle(&self, container: AddressBalancesContainer) {
        let height = container.height;
        match self.reconcile(&container.addresses, container.balances).await {
            Ok(diff) => debug!(
                height,
                created = diff.create.len(),
                updated = diff.update.len(),
                deleted = diff.delete.len(),
                "Balances reconciled"
            ),
            Err(e) => error!(height, error = %e, "Balance reconciliation failed"),
        }
    }
}

/// The two balance worker pools.
pub struct BalanceSync {
    fetch_pool: WorkerPool<FetchJob>,
    reconcile_pool: WorkerPool<AddressBalancesContainer>,
    chunk_size: usize,
}

impl BalanceSync {
    pub fn spawn<S: ExtenderStore, N: NodeApi>(
        store: Arc<S>,
        node: Arc<N>,
        coins: Arc<CoinCache<S, N>>,
        signal_tx: PipelineSignalSender,
        config: &PipelineConfig,
    ) -> Self {
        let reconcile_pool: WorkerPool<AddressBalancesContainer> = WorkerPool::spawn(
            "balance-reconcile",
            config.reconcile_workers,
            config.reconcile_workers,
            Arc::new(BalanceReconciler {
                store: Arc::clone(&store),
            }),
        );
        let fetch_pool: WorkerPool<FetchJob> = WorkerPool::spawn(
            "balance-fetch",
            config.fetch_workers,
            config.fetch_workers,
            Arc::new(BalanceFetcher {
                store,
                node,
                coins,
                reconcile_tx: reconcile_pool.sender(),
                signal_tx,
            }),
        );

        Self {
            fetch_pool,
            reconcile_pool,
            chunk_size: config.fetch_chunk_size,
        }
    }

    /// Fan a block's addresses out to the fetch workers and wait until every
    /// chunk reached a terminal state.
    pub async fn sync_block(&self, set: &BlockAddressSet) -> Result<usize, SyncError> {
        let height = set.height;
        let chunks = set.len().div_ceil(self.chunk_size.max(1));
        let barrier = self
            .fetch_pool
            .sender()
            .fan_out(set.addresses.clone(), self.chunk_size, |addresses, ticket| FetchJob {
                height,
                addresses,
                ticket,
            })
            .await?;
        barrier.wait().await;
        Ok(chunks)
    }

    /// Drain the fetch pool, then the reconcile pool it feeds.
    pub async fn shutdown(self) {
        let Self {
            fetch_pool,
            reconcile_pool,
            ..
        } = self;
        // The fetch handler holds the last reconcile sender.
        fetch_pool.shutdown().await;
        reconcile_pool.shutdown().await;
    }
}

/// Consumes address sets one block at a time and announces settled blocks.
pub struct BalanceSyncRunner {
    sync: BalanceSync,
    address_rx: BalanceSyncRequestReceiver,
    signal_tx: PipelineSignalSender,
    shutdown_rx: watch::Receiver<bool>,
}

impl BalanceSyncRunner {
    pub fn new(
        sync: BalanceSync,
        address_rx: BalanceSyncRequestReceiver,
        signal_tx: PipelineSignalSender,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sync,
            address_rx,
            signal_tx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("BalanceSyncRunner started");

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("BalanceSyncRunner received shutdown signal");
                        break;
                    }
                }

                request = self.address_rx.recv() => {
                    let Some(BalanceSyncRequest { set, settled }) = request else {
                        info!("BalanceSyncRequest channel closed");
                        break;
                    };
                    match self.sync.sync_block(&set).await {
                        Ok(chunks) => {
                            debug!(
                                height = set.height,
                                addresses = set.len(),
                                chunks,
                                "Block balances settled"
                            );
                            let _ = self.signal_tx.send(PipelineSignal::BlockSettled(set));
                            // The producer may have given up waiting.
                            let _ = settled.send(());
                        }
                        Err(e) => {
                            error!(height = set.height, error = %e, "Balance sync aborted");
                            break;
                        }
                    }
                }
            }
        }

        self.sync.shutdown().await;
        info!("BalanceSyncRunner shutdown complete");
    }
}
