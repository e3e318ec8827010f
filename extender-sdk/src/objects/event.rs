//! Consensus events emitted by the node for a block.

use serde::{Deserialize, Serialize};

/// Event kind, taken from the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "minter/RewardEvent")]
    Reward,
    #[serde(rename = "minter/SlashEvent")]
    Slash,
    #[serde(rename = "minter/UnbondEvent")]
    Unbond,
    #[serde(rename = "minter/CoinLiquidationEvent")]
    CoinLiquidation,
    #[serde(other)]
    Other,
}

/// Event payload.
///
/// The node uses one flat shape for every kind; fields that a kind does not
/// carry are left empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventValue {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub coin: String,
    #[serde(default)]
    pub validator_pub_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub value: EventValue,
}

/// `result` body of the events endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsResult {
    #[serde(default)]
    pub events: Vec<Event>,
}
