pub mod balance;
pub mod block;
pub mod coin;
pub mod event;
pub mod transaction;

pub use balance::AddressBalances;
pub use block::{Block, Status};
pub use coin::CoinInfo;
pub use event::{Event, EventKind, EventValue, EventsResult};
pub use transaction::{
    BuyCoinData, CreateCoinData, DecodeError, MultiSendData, SellAllCoinData, SellCoinData,
    SendData, Transaction, TransactionType,
};

use serde::{Deserialize, Serialize};

/// Error body returned by the node instead of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Response envelope shared by every node endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResponse<T> {
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<NodeErrorBody>,
}

impl<T> NodeResponse<T> {
    /// Split the envelope into its result or the node-reported error.
    ///
    /// A response with neither field set is reported as an error with
    /// code `0`.
    pub fn into_result(self) -> Result<T, NodeErrorBody> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Err(NodeErrorBody {
                code: 0,
                message: "empty node response".to_string(),
            }),
        }
    }
}
