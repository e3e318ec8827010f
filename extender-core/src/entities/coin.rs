use crate::framework::DatabaseProcessor;
use compact_str::CompactString;
use kanau::processor::Processor;

/// A coin row.
///
/// `symbol` is unique among rows whose `deleted_at` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub id: i64,
    pub symbol: CompactString,
    pub name: String,
    pub crr: i64,
    pub volume: String,
    pub reserve_balance: String,
    pub creation_address_id: Option<i64>,
    pub deleted_at: Option<time::PrimitiveDateTime>,
}

/// Data for inserting a coin that may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinInsert {
    pub symbol: CompactString,
    pub name: String,
    pub crr: i64,
    pub volume: String,
    pub reserve_balance: String,
    pub creation_address_id: Option<i64>,
}

/// Fresh node state for a coin whose id is already known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinUpdate {
    pub id: i64,
    pub symbol: CompactString,
    pub name: String,
    pub crr: i64,
    pub volume: String,
    pub reserve_balance: String,
}

#[derive(Debug, Clone)]
/// Find the id of the live (not soft-deleted) coin with a symbol.
pub struct FindCoinIdBySymbol {
    pub symbol: CompactString,
}

impl Processor<FindCoinIdBySymbol> for DatabaseProcessor {
    type Output = Option<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindCoinIdBySymbol")]
    async fn process(&self, query: FindCoinIdBySymbol) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM coins WHERE symbol = $1 AND deleted_at IS NULL",
        )
        .bind(query.symbol.as_str())
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Insert coins, skipping symbols that already have a live row.
///
/// Concurrent inserts of the same symbol resolve through the partial
/// unique index, never producing a duplicate.
pub struct InsertCoinsIfAbsent {
    pub coins: Vec<CoinInsert>,
}

impl Processor<InsertCoinsIfAbsent> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertCoinsIfAbsent")]
    async fn process(&self, insert: InsertCoinsIfAbsent) -> Result<u64, sqlx::Error> {
        if insert.coins.is_empty() {
            return Ok(0);
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO coins \
            (symbol, name, crr, volume, reserve_balance, creation_address_id) ",
        );

        query_builder.push_values(insert.coins, |mut b, coin| {
            b.push_bind(coin.symbol.to_string())
                .push_bind(coin.name)
                .push_bind(coin.crr)
                .push_bind(coin.volume)
                .push_unseparated("::numeric")
                .push_bind(coin.reserve_balance)
                .push_unseparated("::numeric")
                .push_bind(coin.creation_address_id);
        });

        query_builder.push(" ON CONFLICT (symbol) WHERE deleted_at IS NULL DO NOTHING");

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Write fresh node state over existing coin rows, keyed by id.
///
/// Rows that vanished in the meantime are re-created with the same id.
pub struct UpsertCoins {
    pub coins: Vec<CoinUpdate>,
}

impl Processor<UpsertCoins> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertCoins")]
    async fn process(&self, upsert: UpsertCoins) -> Result<u64, sqlx::Error> {
        if upsert.coins.is_empty() {
            return Ok(0);
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO coins (id, symbol, name, crr, volume, reserve_balance) ",
        );

        query_builder.push_values(upsert.coins, |mut b, coin| {
            b.push_bind(coin.id)
                .push_bind(coin.symbol.to_string())
                .push_bind(coin.name)
                .push_bind(coin.crr)
                .push_bind(coin.volume)
                .push_unseparated("::numeric")
                .push_bind(coin.reserve_balance)
                .push_unseparated("::numeric");
        });

        query_builder.push(
            " ON CONFLICT (id) DO UPDATE SET \
            name = EXCLUDED.name, \
            crr = EXCLUDED.crr, \
            volume = EXCLUDED.volume, \
            reserve_balance = EXCLUDED.reserve_balance, \
            updated_at = NOW(), \
            deleted_at = NULL",
        );

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Soft-delete the live coin with a symbol.
pub struct SoftDeleteCoinBySymbol {
    pub symbol: CompactString,
}

impl Processor<SoftDeleteCoinBySymbol> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:SoftDeleteCoinBySymbol")]
    async fn process(&self, delete: SoftDeleteCoinBySymbol) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE coins SET deleted_at = NOW() WHERE symbol = $1 AND deleted_at IS NULL",
        )
        .bind(delete.symbol.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
