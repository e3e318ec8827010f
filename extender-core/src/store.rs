//! Store seam used by the pipeline.
//!
//! The processors only talk to [`ExtenderStore`]; [`PgStore`] forwards each
//! call to the matching SQL processor in [`crate::entities`].

use crate::entities::address::{FindAddressId, InsertAddressesIfAbsent};
use crate::entities::balance::{
    DeleteBalancesByCoin, DeleteManyBalances, FindBalancesByAddresses, InsertManyBalances,
    UpdateManyBalances,
};
use crate::entities::block::InsertBlock;
use crate::entities::coin::{
    FindCoinIdBySymbol, InsertCoinsIfAbsent, SoftDeleteCoinBySymbol, UpsertCoins,
};
use crate::entities::reward::{AggregateRewards, InsertManyRewards, InsertManySlashes};
use crate::entities::validator::FindValidatorIdByPublicKey;
use crate::entities::{
    AggregateInterval, Balance, BlockInsert, CoinInsert, CoinUpdate, RewardInsert, SlashInsert,
};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use compact_str::CompactString;
use kanau::processor::Processor;
use sqlx::PgPool;

/// Persistence operations the pipeline relies on.
///
/// Every bulk write must be idempotent: replaying the same batch after a
/// partial failure leaves the store in the same state.
#[async_trait]
pub trait ExtenderStore: Send + Sync + 'static {
    /// Insert normalized addresses that are not stored yet.
    async fn insert_addresses_if_absent(&self, addresses: &[String]) -> Result<u64, sqlx::Error>;

    async fn find_address_id(&self, address: &str) -> Result<Option<i64>, sqlx::Error>;

    async fn find_validator_id(&self, public_key: &str) -> Result<Option<i64>, sqlx::Error>;

    async fn find_balances_by_addresses(
        &self,
        addresses: &[String],
    ) -> Result<Vec<Balance>, sqlx::Error>;

    async fn insert_balances(&self, balances: Vec<Balance>) -> Result<u64, sqlx::Error>;

    async fn update_balances(&self, balances: Vec<Balance>) -> Result<u64, sqlx::Error>;

    async fn delete_balances(&self, balances: Vec<Balance>) -> Result<u64, sqlx::Error>;

    async fn delete_balances_by_coin(&self, coin_id: i64) -> Result<u64, sqlx::Error>;

    async fn find_coin_id_by_symbol(&self, symbol: &str) -> Result<Option<i64>, sqlx::Error>;

    async fn insert_coins_if_absent(&self, coins: Vec<CoinInsert>) -> Result<u64, sqlx::Error>;

    async fn upsert_coins(&self, coins: Vec<CoinUpdate>) -> Result<u64, sqlx::Error>;

    async fn delete_coin_by_symbol(&self, symbol: &str) -> Result<u64, sqlx::Error>;

    async fn insert_rewards(&self, rewards: Vec<RewardInsert>) -> Result<u64, sqlx::Error>;

    async fn insert_slashes(&self, slashes: Vec<SlashInsert>) -> Result<u64, sqlx::Error>;

    /// Insert a block row unless its height is already stored.
    async fn save_block(&self, block: BlockInsert) -> Result<u64, sqlx::Error>;

    /// Fold rewards of blocks below `before_block_id` into interval buckets.
    async fn aggregate_rewards(
        &self,
        interval: AggregateInterval,
        before_block_id: u64,
    ) -> Result<u64, sqlx::Error>;
}

/// PostgreSQL-backed [`ExtenderStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    db: DatabaseProcessor,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor { pool },
        }
    }
}

#[async_trait]
impl ExtenderStore for PgStore {
    async fn insert_addresses_if_absent(&self, addresses: &[String]) -> Result<u64, sqlx::Error> {
        self.db
            .process(InsertAddressesIfAbsent {
                addresses: addresses.to_vec(),
            })
            .await
    }

    async fn find_address_id(&self, address: &str) -> Result<Option<i64>, sqlx::Error> {
        self.db
            .process(FindAddressId {
                address: address.to_string(),
            })
            .await
    }

    async fn find_validator_id(&self, public_key: &str) -> Result<Option<i64>, sqlx::Error> {
        self.db
            .process(FindValidatorIdByPublicKey {
                public_key: public_key.to_string(),
            })
            .await
    }

    async fn find_balances_by_addresses(
        &self,
        addresses: &[String],
    ) -> Result<Vec<Balance>, sqlx::Error> {
        self.db
            .process(FindBalancesByAddresses {
                addresses: addresses.to_vec(),
            })
            .await
    }

    async fn insert_balances(&self, balances: Vec<Balance>) -> Result<u64, sqlx::Error> {
        self.db.process(InsertManyBalances { balances }).await
    }

    async fn update_balances(&self, balances: Vec<Balance>) -> Result<u64, sqlx::Error> {
        self.db.process(UpdateManyBalances { balances }).await
    }

    async fn delete_balances(&self, balances: Vec<Balance>) -> Result<u64, sqlx::Error> {
        self.db.process(DeleteManyBalances { balances }).await
    }

    async fn delete_balances_by_coin(&self, coin_id: i64) -> Result<u64, sqlx::Error> {
        self.db.process(DeleteBalancesByCoin { coin_id }).await
    }

    async fn find_coin_id_by_symbol(&self, symbol: &str) -> Result<Option<i64>, sqlx::Error> {
        self.db
            .process(FindCoinIdBySymbol {
                symbol: CompactString::from(symbol),
            })
            .await
    }

    async fn insert_coins_if_absent(&self, coins: Vec<CoinInsert>) -> Result<u64, sqlx::Error> {
        self.db.process(InsertCoinsIfAbsent { coins }).await
    }

    async fn upsert_coins(&self, coins: Vec<CoinUpdate>) -> Result<u64, sqlx::Error> {
        self.db.process(UpsertCoins { coins }).await
    }

    async fn delete_coin_by_symbol(&self, symbol: &str) -> Result<u64, sqlx::Error> {
        self.db
            .process(SoftDeleteCoinBySymbol {
                symbol: CompactString::from(symbol),
            })
            .await
    }

    async fn insert_rewards(&self, rewards: Vec<RewardInsert>) -> Result<u64, sqlx::Error> {
        self.db.process(InsertManyRewards { rewards }).await
    }

    async fn insert_slashes(&self, slashes: Vec<SlashInsert>) -> Result<u64, sqlx::Error> {
        self.db.process(InsertManySlashes { slashes }).await
    }

    async fn save_block(&self, block: BlockInsert) -> Result<u64, sqlx::Error> {
        self.db.process(InsertBlock { block }).await
    }

    async fn aggregate_rewards(
        &self,
        interval: AggregateInterval,
        before_block_id: u64,
    ) -> Result<u64, sqlx::Error> {
        self.db
            .process(AggregateRewards {
                interval,
                before_block_id,
            })
            .await
    }
}
