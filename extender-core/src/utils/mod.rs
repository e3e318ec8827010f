pub mod chunk_pool;
pub mod decimal;
