use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

/// Amount of one coin held by one address.
///
/// `value` is an integer amount in base units carried as a decimal string;
/// it is never converted to a float. A missing row means a zero balance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, sqlx::FromRow)]
pub struct Balance {
    pub address_id: i64,
    pub coin_id: i64,
    pub value: String,
}

impl Balance {
    pub fn new(address_id: i64, coin_id: i64, value: impl Into<String>) -> Self {
        Self {
            address_id,
            coin_id,
            value: value.into(),
        }
    }

    /// The `(address_id, coin_id)` pair identifying the row.
    pub fn key(&self) -> (i64, i64) {
        (self.address_id, self.coin_id)
    }
}

#[derive(Debug, Clone)]
/// Load every stored balance of the given normalized addresses.
pub struct FindBalancesByAddresses {
    pub addresses: Vec<String>,
}

impl Processor<FindBalancesByAddresses> for DatabaseProcessor {
    type Output = Vec<Balance>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindBalancesByAddresses")]
    async fn process(&self, query: FindBalancesByAddresses) -> Result<Vec<Balance>, sqlx::Error> {
        if query.addresses.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Balance>(
            r#"
            SELECT b.address_id, b.coin_id, b.value::text AS value
            FROM balances b
            INNER JOIN addresses a ON a.id = b.address_id
            WHERE a.address = ANY($1)
            "#,
        )
        .bind(&query.addresses)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Insert balances in a single query.
///
/// Conflicting `(address_id, coin_id)` pairs are left untouched, so a
/// replayed chunk never fails on rows a sibling already wrote.
pub struct InsertManyBalances {
    pub balances: Vec<Balance>,
}

impl Processor<InsertManyBalances> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertManyBalances")]
    async fn process(&self, insert: InsertManyBalances) -> Result<u64, sqlx::Error> {
        if insert.balances.is_empty() {
            return Ok(0);
        }

        let mut query_builder =
            sqlx::QueryBuilder::new("INSERT INTO balances (address_id, coin_id, value) ");

        query_builder.push_values(insert.balances, |mut b, balance| {
            b.push_bind(balance.address_id)
                .push_bind(balance.coin_id)
                .push_bind(balance.value)
                .push_unseparated("::numeric");
        });

        query_builder.push(" ON CONFLICT (address_id, coin_id) DO NOTHING");

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Overwrite the value of existing balances in a single query.
pub struct UpdateManyBalances {
    pub balances: Vec<Balance>,
}

impl Processor<UpdateManyBalances> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpdateManyBalances")]
    async fn process(&self, update: UpdateManyBalances) -> Result<u64, sqlx::Error> {
        if update.balances.is_empty() {
            return Ok(0);
        }
        let (address_ids, coin_ids, values) = unzip_balances(update.balances);

        let result = sqlx::query(
            r#"
            UPDATE balances AS b
            SET value = u.value::numeric
            FROM UNNEST($1::bigint[], $2::bigint[], $3::text[]) AS u(address_id, coin_id, value)
            WHERE b.address_id = u.address_id AND b.coin_id = u.coin_id
            "#,
        )
        .bind(&address_ids)
        .bind(&coin_ids)
        .bind(&values)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Delete balances by their `(address_id, coin_id)` pair.
pub struct DeleteManyBalances {
    pub balances: Vec<Balance>,
}

impl Processor<DeleteManyBalances> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeleteManyBalances")]
    async fn process(&self, delete: DeleteManyBalances) -> Result<u64, sqlx::Error> {
        if delete.balances.is_empty() {
            return Ok(0);
        }
        let (address_ids, coin_ids, _) = unzip_balances(delete.balances);

        let result = sqlx::query(
            r#"
            DELETE FROM balances AS b
            USING UNNEST($1::bigint[], $2::bigint[]) AS d(address_id, coin_id)
            WHERE b.address_id = d.address_id AND b.coin_id = d.coin_id
            "#,
        )
        .bind(&address_ids)
        .bind(&coin_ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Delete every balance denominated in a coin.
pub struct DeleteBalancesByCoin {
    pub coin_id: i64,
}

impl Processor<DeleteBalancesByCoin> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeleteBalancesByCoin")]
    async fn process(&self, delete: DeleteBalancesByCoin) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM balances WHERE coin_id = $1")
            .bind(delete.coin_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn unzip_balances(balances: Vec<Balance>) -> (Vec<i64>, Vec<i64>, Vec<String>) {
    let mut address_ids = Vec::with_capacity(balances.len());
    let mut coin_ids = Vec::with_capacity(balances.len());
    let mut values = Vec::with_capacity(balances.len());
    for balance in balances {
        address_ids.push(balance.address_id);
        coin_ids.push(balance.coin_id);
        values.push(balance.value);
    }
    (address_ids, coin_ids, values)
}
