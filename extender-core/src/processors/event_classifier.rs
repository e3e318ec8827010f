//! Event classification.
//!
//! Walks the consensus events of a block in order. Liquidations are applied
//! inline; rewards and slashes are collected into append-only records and
//! handed to the save pools in fixed-size chunks; slashed coins are queued
//! for a refresh from the node.

use crate::entities::{RewardInsert, SlashInsert};
use crate::node::NodeApi;
use crate::processors::coin_cache::{CoinCache, CoinError, CoinRefreshJob};
use crate::store::ExtenderStore;
use crate::utils::chunk_pool::{JobHandler, JobSender, PoolClosed};
use async_trait::async_trait;
use compact_str::CompactString;
use extender_sdk::address::{remove_address_prefix, remove_public_key_prefix};
use extender_sdk::objects::{Event, EventKind};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("event at height {height} references unknown address {address}")]
    UnknownAddress { height: u64, address: String },

    #[error("event at height {height} references unknown validator {public_key}")]
    UnknownValidator { height: u64, public_key: String },

    #[error("coin error: {0}")]
    Coin(#[from] CoinError),

    #[error(transparent)]
    PoolClosed(#[from] PoolClosed),
}

/// What a block's events turned into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSummary {
    pub rewards: usize,
    pub slashes: usize,
    pub liquidated: Vec<CompactString>,
    pub refresh: BTreeSet<CompactString>,
    /// Unbond events, and unrecognized events whose address and validator
    /// resolved.
    pub skipped: usize,
}

/// Persists reward and slash chunks. Failures are logged and the chunk is
/// dropped.
pub struct EventSaver<S> {
    store: Arc<S>,
}

impl<S> EventSaver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ExtenderStore> JobHandler<Vec<RewardInsert>> for EventSaver<S> {
    async fn handle(&self, rewards: Vec<RewardInsert>) {
        let count = rewards.len();
        match self.store.insert_rewards(rewards).await {
            Ok(_) => debug!(count, "Rewards saved"),
            Err(e) => error!(count, error = %e, "Failed to save rewards"),
        }
    }
}

#[async_trait]
impl<S: ExtenderStore> JobHandler<Vec<SlashInsert>> for EventSaver<S> {
    async fn handle(&self, slashes: Vec<SlashInsert>) {
        let count = slashes.len();
        match self.store.insert_slashes(slashes).await {
            Ok(_) => debug!(count, "Slashes saved"),
            Err(e) => error!(count, error = %e, "Failed to save slashes"),
        }
    }
}

pub struct EventClassifier<S, N> {
    store: Arc<S>,
    coins: Arc<CoinCache<S, N>>,
    reward_tx: JobSender<Vec<RewardInsert>>,
    slash_tx: JobSender<Vec<SlashInsert>>,
    refresh_tx: JobSender<CoinRefreshJob>,
    chunk_size: usize,
}

impl<S: ExtenderStore, N: NodeApi> EventClassifier<S, N> {
    pub fn new(
        store: Arc<S>,
        coins: Arc<CoinCache<S, N>>,
        reward_tx: JobSender<Vec<RewardInsert>>,
        slash_tx: JobSender<Vec<SlashInsert>>,
        refresh_tx: JobSender<CoinRefreshJob>,
        chunk_size: usize,
    ) -> Self {
        Self {
            store,
            coins,
            reward_tx,
            slash_tx,
            refresh_tx,
            chunk_size,
        }
    }

    /// Classify the events of one block.
    ///
    /// Any store failure, or an event other than a liquidation or unbond
    /// whose address or validator cannot be resolved, fails the block, as
    /// does a slash of an unknown coin. Nothing is
    /// submitted to the save pools in that case.
    pub async fn handle_events(&self, height: u64, events: &[Event]) -> Result<EventSummary, ClassifyError> {
        let mut summary = EventSummary::default();
        let mut rewards = Vec::new();
        let mut slashes = Vec::new();

        for event in events {
            let value = &event.value;
            match event.kind {
                EventKind::CoinLiquidation => {
                    self.liquidate(height, &value.coin).await?;
                    summary.liquidated.push(CompactString::from(value.coin.as_str()));
                    continue;
                }
                EventKind::Unbond => {
                    summary.skipped += 1;
                    continue;
                }
                EventKind::Reward | EventKind::Slash | EventKind::Other => {}
            }

            let address = remove_address_prefix(&value.address);
            let address_id = self.store.find_address_id(address).await?.ok_or_else(|| {
                ClassifyError::UnknownAddress {
                    height,
                    address: address.to_string(),
                }
            })?;
            let public_key = remove_public_key_prefix(&value.validator_pub_key);
            let validator_id = self.store.find_validator_id(public_key).await?.ok_or_else(|| {
                ClassifyError::UnknownValidator {
                    height,
                    public_key: public_key.to_string(),
                }
            })?;

            match event.kind {
                EventKind::Reward => {
                    rewards.push(RewardInsert {
                        block_id: height,
                        role: value.role.clone(),
                        amount: value.amount.clone(),
                        address_id,
                        validator_id,
                    });
                    continue;
                }
                EventKind::Slash => {}
                _ => {
                    summary.skipped += 1;
                    continue;
                }
            }

            if value.coin != self.coins.base_coin() {
                summary.refresh.insert(CompactString::from(value.coin.as_str()));
            }
            let coin_id = self.coins.require(&value.coin).await?;
            slashes.push(SlashInsert {
                block_id: height,
                coin_id,
                amount: value.amount.clone(),
                address_id,
                validator_id,
            });
        }

        summary.rewards = rewards.len();
        summary.slashes = slashes.len();

        if !summary.refresh.is_empty() {
            self.refresh_tx
                .submit(CoinRefreshJob {
                    symbols: summary.refresh.clone(),
                })
                .await?;
        }
        self.reward_tx
            .fan_out_detached(rewards, self.chunk_size, |chunk| chunk)
            .await?;
        self.slash_tx
            .fan_out_detached(slashes, self.chunk_size, |chunk| chunk)
            .await?;

        debug!(
            height,
            rewards = summary.rewards,
            slashes = summary.slashes,
            liquidated = summary.liquidated.len(),
            "Events classified"
        );
        Ok(summary)
    }

    /// Drop every balance of a liquidated coin, then its row.
    async fn liquidate(&self, height: u64, symbol: &str) -> Result<(), ClassifyError> {
        match self.coins.resolve(symbol).await? {
            Some(coin_id) => {
                let removed = self.store.delete_balances_by_coin(coin_id).await?;
                info!(height, symbol, coin_id, removed, "Coin liquidated");
            }
            None => warn!(height, symbol, "Liquidated coin has no live row"),
        }
        self.coins.delete_by_symbol(symbol).await?;
        Ok(())
    }
}
