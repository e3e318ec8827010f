use sqlx::PgPool;

/// Runs the SQL processors in [`crate::entities`] against a pool.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}
