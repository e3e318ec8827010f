//! Block rows and reward aggregation.
//!
//! Every processed block gets a row in `blocks` before any reward or slash
//! referencing it is queued. Every `rewards_aggregate_every` blocks, rewards
//! below the current height are folded into time buckets.

use crate::config::IngestConfig;
use crate::entities::{AggregateInterval, BlockInsert};
use crate::store::ExtenderStore;
use extender_sdk::address::remove_public_key_prefix;
use extender_sdk::objects::Block;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Block time recorded when the previous block is unknown.
pub const DEFAULT_BLOCK_TIME_NANOS: u64 = 1_000_000_000;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("block {height} has invalid {field}: {value:?}")]
    InvalidField {
        height: u64,
        field: &'static str,
        value: String,
    },
}

pub struct BlockRecorder<S> {
    store: Arc<S>,
    /// Height and timestamp of the last saved block.
    previous: Mutex<Option<(u64, OffsetDateTime)>>,
    aggregate_every: u64,
    aggregate_interval: AggregateInterval,
}

impl<S: ExtenderStore> BlockRecorder<S> {
    pub fn new(store: Arc<S>, config: &IngestConfig) -> Self {
        Self {
            store,
            previous: Mutex::new(None),
            aggregate_every: config.rewards_aggregate_every,
            aggregate_interval: config.rewards_aggregate_interval,
        }
    }

    /// Build the row of a block.
    ///
    /// An empty proposer (genesis) or one that is not a stored validator
    /// leaves `proposer_validator_id` empty.
    pub async fn block_row(&self, height: u64, block: &Block) -> Result<BlockInsert, BlockError> {
        let proposer_validator_id = if block.proposer.is_empty() {
            None
        } else {
            let public_key = remove_public_key_prefix(&block.proposer);
            let id = self.store.find_validator_id(public_key).await?;
            if id.is_none() {
                warn!(height, proposer = %public_key, "Block proposer is not a known validator");
            }
            id
        };

        let block_time = match *self.previous.lock().await {
            Some((previous, time)) if previous + 1 == height => {
                u64::try_from((block.time - time).whole_nanoseconds()).unwrap_or(0)
            }
            _ => DEFAULT_BLOCK_TIME_NANOS,
        };

        let num_txs = parse_counter(height, "num_txs", &block.num_txs)?;
        Ok(BlockInsert {
            id: height,
            total_txs: parse_counter(height, "total_txs", &block.total_txs)?,
            num_txs: u32::try_from(num_txs).map_err(|_| BlockError::InvalidField {
                height,
                field: "num_txs",
                value: block.num_txs.clone(),
            })?,
            size: parse_counter(height, "size", &block.size)?,
            block_time,
            created_at: block.time,
            block_reward: if block.block_reward.is_empty() {
                "0".to_string()
            } else {
                block.block_reward.clone()
            },
            proposer_validator_id,
            hash: block.hash.clone(),
        })
    }

    /// Save the row of a block and remember its timestamp for the next one.
    pub async fn record(&self, height: u64, block: &Block) -> Result<u64, BlockError> {
        let row = self.block_row(height, block).await?;
        let inserted = self.store.save_block(row).await?;
        *self.previous.lock().await = Some((height, block.time));
        debug!(height, inserted, "Block saved");
        Ok(inserted)
    }

    pub fn aggregation_due(&self, height: u64) -> bool {
        self.aggregate_every > 0 && height % self.aggregate_every == 0
    }

    /// Fold rewards below `height` into buckets when aggregation is due.
    ///
    /// Rewards still in flight in the save pools are folded by a later run.
    /// A failure is logged and left to the next run, which covers every
    /// height below it. Returns the number of buckets written.
    pub async fn aggregate_rewards(&self, height: u64) -> Option<u64> {
        if !self.aggregation_due(height) {
            return None;
        }
        match self
            .store
            .aggregate_rewards(self.aggregate_interval, height)
            .await
        {
            Ok(buckets) => {
                info!(
                    height,
                    buckets,
                    interval = self.aggregate_interval.as_str(),
                    "Rewards aggregated"
                );
                Some(buckets)
            }
            Err(e) => {
                error!(height, error = %e, "Reward aggregation failed");
                None
            }
        }
    }
}

/// Parse a decimal counter. The node omits counters of empty blocks.
fn parse_counter(height: u64, field: &'static str, value: &str) -> Result<u64, BlockError> {
    if value.is_empty() {
        return Ok(0);
    }
    value.parse().map_err(|_| BlockError::InvalidField {
        height,
        field,
        value: value.to_string(),
    })
}
