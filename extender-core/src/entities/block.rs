use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;

/// One row per processed block, keyed by height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInsert {
    pub id: u64,
    pub total_txs: u64,
    pub num_txs: u32,
    pub size: u64,
    /// Nanoseconds since the previous block.
    pub block_time: u64,
    pub created_at: OffsetDateTime,
    pub block_reward: String,
    /// `None` when the proposer key is not a known validator.
    pub proposer_validator_id: Option<i64>,
    pub hash: String,
}

#[derive(Debug, Clone)]
/// Insert a block row. A replayed height keeps the row written first.
pub struct InsertBlock {
    pub block: BlockInsert,
}

impl Processor<InsertBlock> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertBlock")]
    async fn process(&self, insert: InsertBlock) -> Result<u64, sqlx::Error> {
        let block = insert.block;
        let result = sqlx::query(
            r#"
            INSERT INTO blocks
                (id, total_txs, num_txs, size, block_time, created_at, block_reward,
                 proposer_validator_id, hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7::numeric, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(block.id as i64)
        .bind(block.total_txs as i64)
        .bind(block.num_txs as i32)
        .bind(block.size as i64)
        .bind(block.block_time as i64)
        .bind(block.created_at)
        .bind(block.block_reward)
        .bind(block.proposer_validator_id)
        .bind(block.hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
