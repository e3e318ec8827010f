//! Transactions as rendered inside a node block response.
//!
//! The payload (`data`) is kept as raw JSON and decoded on demand into the
//! typed structs below, because its shape depends on [`TransactionType`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Transaction type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum TransactionType {
    Send,
    SellCoin,
    SellAllCoin,
    BuyCoin,
    CreateCoin,
    DeclareCandidacy,
    Delegate,
    Unbond,
    RedeemCheck,
    SetCandidateOnline,
    SetCandidateOffline,
    CreateMultisig,
    MultiSend,
    EditCandidate,
    Other(u8),
}

impl From<u8> for TransactionType {
    fn from(value: u8) -> Self {
        match value {
            1 => TransactionType::Send,
            2 => TransactionType::SellCoin,
            3 => TransactionType::SellAllCoin,
            4 => TransactionType::BuyCoin,
            5 => TransactionType::CreateCoin,
            6 => TransactionType::DeclareCandidacy,
            7 => TransactionType::Delegate,
            8 => TransactionType::Unbond,
            9 => TransactionType::RedeemCheck,
            10 => TransactionType::SetCandidateOnline,
            11 => TransactionType::SetCandidateOffline,
            12 => TransactionType::CreateMultisig,
            13 => TransactionType::MultiSend,
            14 => TransactionType::EditCandidate,
            other => TransactionType::Other(other),
        }
    }
}

impl From<TransactionType> for u8 {
    fn from(value: TransactionType) -> Self {
        match value {
            TransactionType::Send => 1,
            TransactionType::SellCoin => 2,
            TransactionType::SellAllCoin => 3,
            TransactionType::BuyCoin => 4,
            TransactionType::CreateCoin => 5,
            TransactionType::DeclareCandidacy => 6,
            TransactionType::Delegate => 7,
            TransactionType::Unbond => 8,
            TransactionType::RedeemCheck => 9,
            TransactionType::SetCandidateOnline => 10,
            TransactionType::SetCandidateOffline => 11,
            TransactionType::CreateMultisig => 12,
            TransactionType::MultiSend => 13,
            TransactionType::EditCandidate => 14,
            TransactionType::Other(other) => other,
        }
    }
}

/// Errors raised while decoding a transaction payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("transaction {hash} has no data")]
    MissingData { hash: String },

    #[error("transaction {hash} has malformed data: {source}")]
    Malformed {
        hash: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("transaction {hash} has invalid field {field}: {value}")]
    InvalidField {
        hash: String,
        field: &'static str,
        value: String,
    },
}

/// A transaction included in a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    #[serde(default)]
    pub gas_coin: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl Transaction {
    /// Decode the payload into `T`.
    ///
    /// A missing or `null` payload is reported as [`DecodeError::MissingData`].
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        let data = match &self.data {
            Some(serde_json::Value::Null) | None => {
                return Err(DecodeError::MissingData {
                    hash: self.hash.clone(),
                });
            }
            Some(data) => data,
        };
        T::deserialize(data).map_err(|source| DecodeError::Malformed {
            hash: self.hash.clone(),
            source,
        })
    }

    /// Whether the transaction carries any payload at all.
    pub fn has_data(&self) -> bool {
        !matches!(self.data, None | Some(serde_json::Value::Null))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendData {
    pub coin: String,
    pub to: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSendData {
    #[serde(default)]
    pub list: Vec<SendData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCoinData {
    pub name: String,
    pub symbol: String,
    pub initial_amount: String,
    pub initial_reserve: String,
    pub constant_reserve_ratio: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellCoinData {
    pub coin_to_sell: String,
    pub coin_to_buy: String,
    #[serde(default)]
    pub value_to_sell: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellAllCoinData {
    pub coin_to_sell: String,
    pub coin_to_buy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyCoinData {
    pub coin_to_buy: String,
    pub coin_to_sell: String,
    #[serde(default)]
    pub value_to_buy: String,
}
