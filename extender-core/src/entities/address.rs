use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

#[derive(Debug, Clone)]
/// Insert addresses that are not stored yet.
///
/// Addresses must already be normalized (no network prefix).
/// Returns the number of rows actually inserted.
pub struct InsertAddressesIfAbsent {
    pub addresses: Vec<String>,
}

impl Processor<InsertAddressesIfAbsent> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertAddressesIfAbsent")]
    async fn process(&self, insert: InsertAddressesIfAbsent) -> Result<u64, sqlx::Error> {
        if insert.addresses.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO addresses (address)
            SELECT * FROM UNNEST($1::text[])
            ON CONFLICT (address) DO NOTHING
            "#,
        )
        .bind(&insert.addresses)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Look up the id of a normalized address.
pub struct FindAddressId {
    pub address: String,
}

impl Processor<FindAddressId> for DatabaseProcessor {
    type Output = Option<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindAddressId")]
    async fn process(&self, query: FindAddressId) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM addresses WHERE address = $1")
            .bind(query.address)
            .fetch_optional(&self.pool)
            .await
    }
}
