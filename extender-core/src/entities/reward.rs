use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use serde::{Deserialize, Serialize};

/// A validator reward paid at a block. Append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardInsert {
    pub block_id: u64,
    pub role: String,
    pub amount: String,
    pub address_id: i64,
    pub validator_id: i64,
}

/// A slash applied at a block. Append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashInsert {
    pub block_id: u64,
    pub coin_id: i64,
    pub amount: String,
    pub address_id: i64,
    pub validator_id: i64,
}

#[derive(Debug, Clone)]
pub struct InsertManyRewards {
    pub rewards: Vec<RewardInsert>,
}

impl Processor<InsertManyRewards> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertManyRewards")]
    async fn process(&self, insert: InsertManyRewards) -> Result<u64, sqlx::Error> {
        if insert.rewards.is_empty() {
            return Ok(0);
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO rewards (block_id, role, amount, address_id, validator_id) ",
        );

        query_builder.push_values(insert.rewards, |mut b, reward| {
            b.push_bind(reward.block_id as i64)
                .push_bind(reward.role)
                .push_bind(reward.amount)
                .push_unseparated("::numeric")
                .push_bind(reward.address_id)
                .push_bind(reward.validator_id);
        });

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
pub struct InsertManySlashes {
    pub slashes: Vec<SlashInsert>,
}

impl Processor<InsertManySlashes> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertManySlashes")]
    async fn process(&self, insert: InsertManySlashes) -> Result<u64, sqlx::Error> {
        if insert.slashes.is_empty() {
            return Ok(0);
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO slashes (block_id, coin_id, amount, address_id, validator_id) ",
        );

        query_builder.push_values(insert.slashes, |mut b, slash| {
            b.push_bind(slash.block_id as i64)
                .push_bind(slash.coin_id)
                .push_bind(slash.amount)
                .push_unseparated("::numeric")
                .push_bind(slash.address_id)
                .push_bind(slash.validator_id);
        });

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

/// Width of the time buckets rewards are folded into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateInterval {
    Minute,
    Hour,
    #[default]
    Day,
}

impl AggregateInterval {
    /// Field name understood by `date_trunc`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

#[derive(Debug, Clone)]
/// Fold every reward below a block into per-bucket sums.
///
/// Moved rows are deleted and summed in one statement, so a reward
/// committed concurrently is either folded now or left for the next run.
/// Returns the number of buckets written.
pub struct AggregateRewards {
    pub interval: AggregateInterval,
    pub before_block_id: u64,
}

impl Processor<AggregateRewards> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:AggregateRewards")]
    async fn process(&self, aggregate: AggregateRewards) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            WITH moved AS (
                DELETE FROM rewards WHERE block_id < $2
                RETURNING block_id, role, amount, address_id, validator_id
            )
            INSERT INTO aggregated_rewards
                (time_id, from_block_id, to_block_id, address_id, validator_id, role, amount)
            SELECT date_trunc($1::text, blocks.created_at),
                   MIN(moved.block_id), MAX(moved.block_id),
                   moved.address_id, moved.validator_id, moved.role, SUM(moved.amount)
            FROM moved
            JOIN blocks ON blocks.id = moved.block_id
            GROUP BY 1, moved.address_id, moved.validator_id, moved.role
            ON CONFLICT (time_id, address_id, validator_id, role) DO UPDATE SET
                from_block_id = LEAST(aggregated_rewards.from_block_id, EXCLUDED.from_block_id),
                to_block_id = GREATEST(aggregated_rewards.to_block_id, EXCLUDED.to_block_id),
                amount = aggregated_rewards.amount + EXCLUDED.amount
            "#,
        )
        .bind(aggregate.interval.as_str())
        .bind(aggregate.before_block_id as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
