use super::transaction::Transaction;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Block as returned by the block endpoint.
///
/// Counters and sizes arrive as decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub height: String,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    #[serde(default)]
    pub num_txs: String,
    #[serde(default)]
    pub total_txs: String,
    #[serde(default)]
    pub block_reward: String,
    #[serde(default)]
    pub size: String,
    /// Public key of the proposing validator, empty for the genesis block.
    #[serde(default)]
    pub proposer: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// `result` body of the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub latest_block_height: String,
}
