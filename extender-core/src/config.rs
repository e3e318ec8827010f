//! Pipeline tuning.
//!
//! Loaded by the server from the `[pipeline]` and `[ingest]` tables of its
//! config file. Every field has a default so either table may be omitted.

use crate::entities::AggregateInterval;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Addresses per balance fetch job. Matches the node's address-query
    /// batch limit.
    pub fetch_chunk_size: usize,
    /// Rewards or slashes per save job.
    pub events_chunk_size: usize,
    pub fetch_workers: usize,
    pub reconcile_workers: usize,
    pub reward_save_workers: usize,
    pub slash_save_workers: usize,
    /// Pending coin refresh jobs before producers suspend.
    pub coin_refresh_queue: usize,
    /// Native coin of the chain. Never refreshed from the node.
    pub base_coin: CompactString,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_chunk_size: 50,
            events_chunk_size: 100,
            fetch_workers: 10,
            reconcile_workers: 10,
            reward_save_workers: 3,
            slash_save_workers: 3,
            coin_refresh_queue: 1,
            base_coin: CompactString::const_new("BIP"),
        }
    }
}

impl PipelineConfig {
    /// Clamp every size to at least one so no pool or chunk is empty.
    pub fn normalized(mut self) -> Self {
        for size in [
            &mut self.fetch_chunk_size,
            &mut self.events_chunk_size,
            &mut self.fetch_workers,
            &mut self.reconcile_workers,
            &mut self.reward_save_workers,
            &mut self.slash_save_workers,
            &mut self.coin_refresh_queue,
        ] {
            *size = (*size).max(1);
        }
        self
    }
}

/// Block driver settings, from the `[ingest]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// First block to process.
    pub start_height: u64,
    /// Wait between polls once the driver caught up with the node.
    pub poll_interval_ms: u64,
    /// Wait before replaying a block that failed.
    pub retry_delay_ms: u64,
    /// Fold rewards every this many blocks. `0` disables aggregation.
    pub rewards_aggregate_every: u64,
    pub rewards_aggregate_interval: AggregateInterval,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            start_height: 1,
            poll_interval_ms: 1000,
            retry_delay_ms: 5000,
            rewards_aggregate_every: 60,
            rewards_aggregate_interval: AggregateInterval::Day,
        }
    }
}

impl IngestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
