use serde::{Deserialize, Serialize};

/// Live coin state as reported by the coin info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinInfo {
    pub name: String,
    pub symbol: String,
    pub volume: String,
    pub crr: String,
    pub reserve_balance: String,
}
