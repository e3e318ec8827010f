use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

#[derive(Debug, Clone)]
/// Look up a validator by its public key (without the `Mp` prefix).
pub struct FindValidatorIdByPublicKey {
    pub public_key: String,
}

impl Processor<FindValidatorIdByPublicKey> for DatabaseProcessor {
    type Output = Option<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindValidatorIdByPublicKey")]
    async fn process(&self, query: FindValidatorIdByPublicKey) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM validators WHERE public_key = $1")
            .bind(query.public_key)
            .fetch_optional(&self.pool)
            .await
    }
}
