use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Balances of one address as returned by the addresses endpoint.
///
/// `balance` maps coin symbol to an integer amount in base units, kept as
/// a decimal string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalances {
    pub address: String,
    #[serde(default)]
    pub balance: BTreeMap<String, String>,
}
