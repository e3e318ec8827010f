//! BlockIngestor: drives the pipeline one block at a time.
//!
//! For each height it:
//! - fetches the block and its events from the node
//! - extracts the participant addresses and saves the block row
//! - saves the addresses and creates coins issued in the block
//! - hands the address set to the balance runner and waits until it settled
//! - classifies the events
//! - folds older rewards when aggregation is due
//! - queues a refresh of the coins the transactions touched
//!
//! Events of a block are classified only after its balances settled, and
//! the next block starts only after that. A liquidation therefore never
//! runs alongside balance workers that may still write the coin.
//!
//! A failed block is replayed from the same height after a delay. Every
//! write on the way is idempotent, so a replay never duplicates rows.

use crate::config::{IngestConfig, PipelineConfig};
use crate::entities::{RewardInsert, SlashInsert};
use crate::events::{PipelineSignalSender, balance_sync_request_channel};
use crate::node::NodeApi;
use crate::processors::address_extractor::{AddressExtractor, ExtractError, extract_addresses};
use crate::processors::balance_sync::{BalanceSync, BalanceSyncRunner};
use crate::processors::block_recorder::{BlockError, BlockRecorder};
use crate::processors::coin_cache::{CoinCache, CoinError, CoinRefreshJob, symbols_to_refresh};
use crate::processors::event_classifier::{
    ClassifyError, EventClassifier, EventSaver, EventSummary,
};
use crate::store::ExtenderStore;
use crate::utils::chunk_pool::{JobSender, PoolClosed, WorkerPool};
use extender_sdk::client::ClientError;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("node error: {0}")]
    Node(#[from] ClientError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("address extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("block row failed: {0}")]
    Block(#[from] BlockError),

    #[error("coin processing failed: {0}")]
    Coin(#[from] CoinError),

    #[error("event classification failed: {0}")]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    PoolClosed(#[from] PoolClosed),
}

/// Outcome of one processed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReport {
    pub height: u64,
    pub transactions: usize,
    pub addresses: usize,
    pub coins_created: u64,
    pub events: EventSummary,
    /// Reward buckets written, when aggregation ran at this height.
    pub reward_buckets: Option<u64>,
}

/// Pools and tasks that outlive a single block.
struct Background {
    balance_runner: JoinHandle<()>,
    reward_pool: WorkerPool<Vec<RewardInsert>>,
    slash_pool: WorkerPool<Vec<SlashInsert>>,
    refresh_pool: WorkerPool<CoinRefreshJob>,
}

pub struct BlockIngestor<S: ExtenderStore, N: NodeApi> {
    node: Arc<N>,
    coins: Arc<CoinCache<S, N>>,
    blocks: BlockRecorder<S>,
    extractor: AddressExtractor<S>,
    classifier: EventClassifier<S, N>,
    refresh_tx: JobSender<CoinRefreshJob>,
    background: Background,
    config: IngestConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: ExtenderStore, N: NodeApi> BlockIngestor<S, N> {
    /// Spawn every worker pool and the balance runner.
    ///
    /// Pipeline signals go to `signal_tx`; subscribe before calling this to
    /// see the first block.
    pub fn spawn(
        store: Arc<S>,
        node: Arc<N>,
        pipeline: &PipelineConfig,
        config: IngestConfig,
        signal_tx: PipelineSignalSender,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let pipeline = pipeline.clone().normalized();
        let coins = Arc::new(CoinCache::new(
            Arc::clone(&store),
            Arc::clone(&node),
            pipeline.base_coin.clone(),
        ));

        let refresh_pool: WorkerPool<CoinRefreshJob> = WorkerPool::spawn(
            "coin-refresh",
            1,
            pipeline.coin_refresh_queue,
            Arc::clone(&coins),
        );
        let saver = Arc::new(EventSaver::new(Arc::clone(&store)));
        let reward_pool: WorkerPool<Vec<RewardInsert>> = WorkerPool::spawn(
            "reward-save",
            pipeline.reward_save_workers,
            pipeline.reward_save_workers,
            Arc::clone(&saver),
        );
        let slash_pool: WorkerPool<Vec<SlashInsert>> = WorkerPool::spawn(
            "slash-save",
            pipeline.slash_save_workers,
            pipeline.slash_save_workers,
            saver,
        );

        let balance_sync = BalanceSync::spawn(
            Arc::clone(&store),
            Arc::clone(&node),
            Arc::clone(&coins),
            signal_tx.clone(),
            &pipeline,
        );
        let (address_tx, address_rx) = balance_sync_request_channel();
        let balance_runner = tokio::spawn(
            BalanceSyncRunner::new(balance_sync, address_rx, signal_tx, shutdown_rx.clone()).run(),
        );

        let classifier = EventClassifier::new(
            Arc::clone(&store),
            Arc::clone(&coins),
            reward_pool.sender(),
            slash_pool.sender(),
            refresh_pool.sender(),
            pipeline.events_chunk_size,
        );

        Self {
            node,
            coins,
            blocks: BlockRecorder::new(Arc::clone(&store), &config),
            extractor: AddressExtractor::new(store, address_tx),
            classifier,
            refresh_tx: refresh_pool.sender(),
            background: Background {
                balance_runner,
                reward_pool,
                slash_pool,
                refresh_pool,
            },
            config,
            shutdown_rx,
        }
    }

    /// Run every stage for one block.
    ///
    /// Returns once the block's balances settled and its events were
    /// classified. Reward, slash and coin refresh saves complete
    /// asynchronously.
    pub async fn process_block(&self, height: u64) -> Result<BlockReport, IngestError> {
        let block = self.node.block(height).await?;
        let events = self.node.events(height).await?;

        let set = extract_addresses(height, &block.transactions, &events)
            .map_err(ExtractError::from)?;
        self.blocks.record(height, &block).await?;
        self.extractor.save(&set).await?;

        // Coins must exist before their balances are fetched.
        let coins = self.coins.coins_from_transactions(&block.transactions).await?;
        let coins_created = self.coins.create_if_absent(coins).await?;

        let addresses = set.len();
        self.extractor.forward(set).await?;

        let summary = self.classifier.handle_events(height, &events).await?;
        let reward_buckets = self.blocks.aggregate_rewards(height).await;

        let refresh = symbols_to_refresh(&block.transactions, self.coins.base_coin());
        if !refresh.is_empty() {
            self.refresh_tx
                .submit(CoinRefreshJob { symbols: refresh })
                .await?;
        }

        Ok(BlockReport {
            height,
            transactions: block.transactions.len(),
            addresses,
            coins_created,
            events: summary,
            reward_buckets,
        })
    }

    pub async fn run(self) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut height = self.config.start_height;
        let mut latest = 0;
        info!(height, "BlockIngestor started");

        loop {
            if height > latest {
                let Some(result) = until_shutdown(&mut shutdown_rx, self.node.latest_height()).await
                else {
                    break;
                };
                match result {
                    Ok(value) => latest = value,
                    Err(e) => {
                        warn!(error = %e, "Cannot read latest height");
                        if !pause(&mut shutdown_rx, self.config.retry_delay()).await {
                            break;
                        }
                        continue;
                    }
                }
                if height > latest {
                    if !pause(&mut shutdown_rx, self.config.poll_interval()).await {
                        break;
                    }
                    continue;
                }
            }

            let Some(result) = until_shutdown(&mut shutdown_rx, self.process_block(height)).await
            else {
                break;
            };
            match result {
                Ok(report) => {
                    info!(
                        height,
                        transactions = report.transactions,
                        addresses = report.addresses,
                        rewards = report.events.rewards,
                        slashes = report.events.slashes,
                        "Block processed"
                    );
                    height += 1;
                }
                Err(e) => {
                    error!(height, error = %e, "Block processing failed, replaying");
                    if !pause(&mut shutdown_rx, self.config.retry_delay()).await {
                        break;
                    }
                }
            }
        }

        info!(height, "BlockIngestor received shutdown signal");
        self.shutdown().await;
        info!("BlockIngestor shutdown complete");
    }

    /// Close every queue and wait for the workers to drain.
    async fn shutdown(self) {
        let Self {
            extractor,
            classifier,
            refresh_tx,
            background,
            ..
        } = self;

        // Closes the address channel, stopping the balance runner.
        drop(extractor);
        drop(classifier);
        drop(refresh_tx);

        if let Err(e) = background.balance_runner.await {
            error!(error = %e, "Balance runner failed");
        }
        background.reward_pool.shutdown().await;
        background.slash_pool.shutdown().await;
        background.refresh_pool.shutdown().await;
    }
}

/// Drive `work` unless shutdown is requested first. `None` means stop.
async fn until_shutdown<F: Future>(
    shutdown_rx: &mut watch::Receiver<bool>,
    work: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;

        _ = stopped(shutdown_rx) => None,
        output = work => Some(output),
    }
}

/// Resolves once shutdown is requested or the signal sender is gone.
async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `delay`. Returns `false` if shutdown was requested meanwhile.
async fn pause(shutdown_rx: &mut watch::Receiver<bool>, delay: std::time::Duration) -> bool {
    until_shutdown(shutdown_rx, tokio::time::sleep(delay))
        .await
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{PipelineSignal, PipelineSignalReceiver, pipeline_signal_channel};
    use crate::testing::{MemoryStore, ScriptedNode};
    use compact_str::CompactString;
    use extender_sdk::objects::{Block, Event, EventKind, EventValue, Transaction, TransactionType};
    use serde_json::json;
    use std::time::Duration;
    use time::OffsetDateTime;

    fn send(from: &str, to: &str, coin: &str) -> Transaction {
        Transaction {
            hash: format!("Mt{from}{to}"),
            from: from.to_string(),
            kind: TransactionType::Send,
            gas_coin: "BIP".to_string(),
            data: Some(json!({"coin": coin, "to": to, "value": "1"})),
        }
    }

    fn block(height: u64, transactions: Vec<Transaction>) -> Block {
        Block {
            hash: format!("Mh{height}"),
            height: height.to_string(),
            time: OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(height as i64 * 5),
            num_txs: transactions.len().to_string(),
            total_txs: String::new(),
            block_reward: "333".to_string(),
            size: "512".to_string(),
            proposer: String::new(),
            transactions,
        }
    }

    fn liquidation(coin: &str) -> Event {
        Event {
            kind: EventKind::CoinLiquidation,
            value: EventValue {
                coin: coin.to_string(),
                ..EventValue::default()
            },
        }
    }

    fn ingest_config() -> IngestConfig {
        IngestConfig {
            start_height: 1,
            poll_interval_ms: 10,
            retry_delay_ms: 10,
            rewards_aggregate_every: 0,
            ..IngestConfig::default()
        }
    }

    async fn settled(signal_rx: &mut PipelineSignalReceiver, height: u64) {
        loop {
            match signal_rx.recv().await.unwrap() {
                PipelineSignal::BlockSettled(set) if set.height == height => return,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_send_block_syncs_both_parties() {
        let store = Arc::new(MemoryStore::default());
        let node = Arc::new(ScriptedNode::default());
        store.add_coin("COIN1");
        node.set_balance("MxA", "COIN1", "95");
        node.set_balance("MxB", "COIN1", "5");
        node.state()
            .blocks
            .insert(100, block(100, vec![send("MxA", "MxB", "COIN1")]));

        let (signal_tx, mut signal_rx) = pipeline_signal_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let ingestor = BlockIngestor::spawn(
            Arc::clone(&store),
            Arc::clone(&node),
            &PipelineConfig::default(),
            ingest_config(),
            signal_tx,
            shutdown_rx,
        );

        let report = ingestor.process_block(100).await.unwrap();
        assert_eq!(report.addresses, 2);
        settled(&mut signal_rx, 100).await;

        assert_eq!(store.balances_of("A").get("COIN1").unwrap(), "95");
        assert_eq!(store.balances_of("B").get("COIN1").unwrap(), "5");
        assert_eq!(store.state().balances.len(), 2);
        ingestor.shutdown().await;
    }

    #[tokio::test]
    async fn test_created_coin_resolves_in_same_block() {
        let store = Arc::new(MemoryStore::default());
        let node = Arc::new(ScriptedNode::default());
        store.add_coin("BIP");
        node.set_balance("Mxaa", "FRESH", "1000");
        node.state().blocks.insert(
            7,
            block(
                7,
                vec![Transaction {
                    hash: "Mt07".to_string(),
                    from: "Mxaa".to_string(),
                    kind: TransactionType::CreateCoin,
                    gas_coin: "BIP".to_string(),
                    data: Some(json!({
                        "name": "Fresh",
                        "symbol": "FRESH",
                        "initial_amount": "1000",
                        "initial_reserve": "100",
                        "constant_reserve_ratio": "10"
                    })),
                }],
            ),
        );

        let (signal_tx, mut signal_rx) = pipeline_signal_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let ingestor = BlockIngestor::spawn(
            Arc::clone(&store),
            node,
            &PipelineConfig::default(),
            ingest_config(),
            signal_tx,
            shutdown_rx,
        );

        let report = ingestor.process_block(7).await.unwrap();
        assert_eq!(report.coins_created, 1);
        settled(&mut signal_rx, 7).await;

        assert_eq!(store.balances_of("aa").get("FRESH").unwrap(), "1000");
        let creator = store.state().addresses.get("aa").copied();
        let state = store.state();
        let coin = state.coins.iter().find(|c| c.symbol == "FRESH").unwrap();
        assert_eq!(coin.creation_address_id, creator);
        drop(state);
        ingestor.shutdown().await;
    }

    #[tokio::test]
    async fn test_liquidation_block() {
        let store = Arc::new(MemoryStore::default());
        let node = Arc::new(ScriptedNode::default());
        store.add_coin("COIN1");
        store.add_balance("A", "COIN1", "10");
        node.clear_balances("A");
        node.state().blocks.insert(
            101,
            block(
                101,
                vec![Transaction {
                    hash: "Mt101".to_string(),
                    from: "MxA".to_string(),
                    kind: TransactionType::SellAllCoin,
                    gas_coin: "BIP".to_string(),
                    data: Some(json!({"coin_to_sell": "COIN1", "coin_to_buy": "BIP"})),
                }],
            ),
        );
        node.state().events.insert(101, vec![liquidation("COIN1")]);

        let (signal_tx, mut signal_rx) = pipeline_signal_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let ingestor = BlockIngestor::spawn(
            Arc::clone(&store),
            node,
            &PipelineConfig::default(),
            ingest_config(),
            signal_tx,
            shutdown_rx,
        );

        let report = ingestor.process_block(101).await.unwrap();
        assert_eq!(report.events.liquidated.len(), 1);
        settled(&mut signal_rx, 101).await;

        assert!(store.balances_of("A").is_empty());
        assert_eq!(store.find_coin_id_by_symbol("COIN1").await.unwrap(), None);
        ingestor.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_liquidation_waits_for_previous_block_balances() {
        let store = Arc::new(MemoryStore::default());
        let node = Arc::new(ScriptedNode::default());
        let coin_id = store.add_coin("COIN1");
        node.set_balance("MxA", "COIN1", "95");
        node.set_balance("MxB", "COIN1", "5");
        {
            let mut state = node.state();
            state.blocks.insert(1, block(1, vec![send("MxA", "MxB", "COIN1")]));
            state.blocks.insert(2, block(2, Vec::new()));
            state.events.insert(2, vec![liquidation("COIN1")]);
        }
        store.state().balance_insert_delay = Duration::from_millis(200);

        let (signal_tx, mut signal_rx) = pipeline_signal_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let ingestor = BlockIngestor::spawn(
            Arc::clone(&store),
            node,
            &PipelineConfig::default(),
            ingest_config(),
            signal_tx,
            shutdown_rx,
        );

        ingestor.process_block(1).await.unwrap();
        // Block 1 settled before process_block returned.
        assert_eq!(store.balances_of("A").get("COIN1").unwrap(), "95");
        settled(&mut signal_rx, 1).await;

        let report = ingestor.process_block(2).await.unwrap();
        assert_eq!(report.events.liquidated, vec![CompactString::const_new("COIN1")]);

        let state = store.state();
        let stale: Vec<_> = state
            .balances
            .keys()
            .filter(|(_, coin)| *coin == coin_id)
            .collect();
        assert!(stale.is_empty(), "balances of a liquidated coin: {stale:?}");
        drop(state);
        ingestor.shutdown().await;
    }

    #[tokio::test]
    async fn test_block_rows_and_reward_aggregation() {
        let store = Arc::new(MemoryStore::default());
        let node = Arc::new(ScriptedNode::default());
        store.add_coin("BIP");
        store.add_validator("01");
        let reward = Event {
            kind: EventKind::Reward,
            value: EventValue {
                role: "Validator".to_string(),
                address: "Mxaa".to_string(),
                amount: "10".to_string(),
                validator_pub_key: "Mp01".to_string(),
                ..EventValue::default()
            },
        };
        {
            let mut state = node.state();
            for height in 1..=2 {
                state.blocks.insert(height, block(height, Vec::new()));
                state.events.insert(height, vec![reward.clone()]);
            }
        }

        let (signal_tx, _) = pipeline_signal_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let ingestor = BlockIngestor::spawn(
            Arc::clone(&store),
            node,
            &PipelineConfig::default(),
            IngestConfig {
                rewards_aggregate_every: 2,
                ..ingest_config()
            },
            signal_tx,
            shutdown_rx,
        );

        let first = ingestor.process_block(1).await.unwrap();
        assert_eq!(first.reward_buckets, None);
        // Let the detached reward save land before the aggregation height.
        for _ in 0..100 {
            if !store.state().rewards.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let second = ingestor.process_block(2).await.unwrap();
        assert_eq!(second.reward_buckets, Some(1));
        ingestor.shutdown().await;

        let state = store.state();
        assert_eq!(state.blocks.len(), 2);
        assert_eq!(state.blocks[&2].block_time, 5_000_000_000);
        assert_eq!(state.aggregated_rewards.values().sum::<u128>(), 10);
        assert!(state.rewards.iter().all(|r| r.block_id == 2));
    }

    #[tokio::test]
    async fn test_run_replays_failed_block_until_it_succeeds() {
        let store = Arc::new(MemoryStore::default());
        let node = Arc::new(ScriptedNode::default());
        store.add_coin("BIP");
        node.set_balance("Mxaa", "BIP", "1");
        node.set_balance("Mxbb", "BIP", "2");
        {
            let mut state = node.state();
            state.latest_height = 2;
            state.blocks.insert(1, block(1, vec![send("Mxaa", "Mxbb", "BIP")]));
        }

        let (signal_tx, mut signal_rx) = pipeline_signal_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ingestor = BlockIngestor::spawn(
            Arc::clone(&store),
            Arc::clone(&node),
            &PipelineConfig::default(),
            ingest_config(),
            signal_tx,
            shutdown_rx,
        );
        let handle = tokio::spawn(ingestor.run());

        settled(&mut signal_rx, 1).await;
        // Block 2 is unknown to the node until now; the driver keeps retrying.
        tokio::time::sleep(Duration::from_millis(30)).await;
        node.state()
            .blocks
            .insert(2, block(2, vec![send("Mxbb", "Mxcc", "BIP")]));
        settled(&mut signal_rx, 2).await;

        assert_eq!(store.balances_of("aa").get("BIP").unwrap(), "1");
        assert_eq!(store.state().addresses.len(), 3);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
