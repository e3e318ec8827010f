//! Coin resolution cache and coin bookkeeping.
//!
//! The cache maps symbols to ids of live coin rows and is shared by every
//! worker of the pipeline. It is populated lazily on lookup and invalidated
//! when a coin is liquidated. Coin refreshes run in a dedicated
//! [`WorkerPool`](crate::utils::chunk_pool::WorkerPool) whose handler is the
//! cache itself.

use crate::entities::{CoinInsert, CoinUpdate};
use crate::node::NodeApi;
use crate::store::ExtenderStore;
use crate::utils::chunk_pool::JobHandler;
use async_trait::async_trait;
use compact_str::CompactString;
use dashmap::DashMap;
use extender_sdk::address::remove_address_prefix;
use extender_sdk::client::ClientError;
use extender_sdk::objects::{
    BuyCoinData, CreateCoinData, DecodeError, SellAllCoinData, SellCoinData, Transaction,
    TransactionType,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum CoinError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("node error: {0}")]
    Node(#[from] ClientError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("coin {symbol} has no live row")]
    Unknown { symbol: CompactString },

    #[error("coin {symbol} has invalid crr: {value}")]
    InvalidCrr { symbol: CompactString, value: String },
}

/// A batch of symbols whose node state should be re-read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoinRefreshJob {
    pub symbols: BTreeSet<CompactString>,
}

pub struct CoinCache<S, N> {
    store: Arc<S>,
    node: Arc<N>,
    base_coin: CompactString,
    ids: DashMap<CompactString, i64>,
}

impl<S: ExtenderStore, N: NodeApi> CoinCache<S, N> {
    pub fn new(store: Arc<S>, node: Arc<N>, base_coin: CompactString) -> Self {
        Self {
            store,
            node,
            base_coin,
            ids: DashMap::new(),
        }
    }

    pub fn base_coin(&self) -> &str {
        &self.base_coin
    }

    /// Number of cached symbols.
    pub fn cached(&self) -> usize {
        self.ids.len()
    }

    /// Resolve a symbol to the id of its live coin row.
    ///
    /// Hits never touch the store. A miss queries the store once and caches
    /// the id when found; an unknown symbol is not cached.
    pub async fn resolve(&self, symbol: &str) -> Result<Option<i64>, sqlx::Error> {
        let cached = self.ids.get(symbol).map(|entry| *entry.value());
        if let Some(id) = cached {
            return Ok(Some(id));
        }

        let id = self.store.find_coin_id_by_symbol(symbol).await?;
        if let Some(id) = id {
            self.ids.insert(CompactString::from(symbol), id);
        }
        Ok(id)
    }

    /// Resolve a symbol that must exist.
    pub async fn require(&self, symbol: &str) -> Result<i64, CoinError> {
        self.resolve(symbol)
            .await?
            .ok_or_else(|| CoinError::Unknown {
                symbol: CompactString::from(symbol),
            })
    }

    /// Insert coins whose symbols have no live row yet.
    pub async fn create_if_absent(&self, coins: Vec<CoinInsert>) -> Result<u64, sqlx::Error> {
        if coins.is_empty() {
            return Ok(0);
        }
        let created = self.store.insert_coins_if_absent(coins).await?;
        debug!(created, "Coins inserted");
        Ok(created)
    }

    /// Soft-delete the live row of a symbol and forget its cached id.
    pub async fn delete_by_symbol(&self, symbol: &str) -> Result<u64, sqlx::Error> {
        let deleted = self.store.delete_coin_by_symbol(symbol).await?;
        self.ids.remove(symbol);
        Ok(deleted)
    }

    /// Build inserts for every coin created by the given transactions.
    ///
    /// A create-coin transaction without a decodable payload or with a
    /// non-integer reserve ratio fails the whole batch. An unknown creator
    /// address leaves `creation_address_id` empty.
    pub async fn coins_from_transactions(
        &self,
        transactions: &[Transaction],
    ) -> Result<Vec<CoinInsert>, CoinError> {
        let mut coins = Vec::new();
        for tx in transactions
            .iter()
            .filter(|tx| tx.kind == TransactionType::CreateCoin)
        {
            let data: CreateCoinData = tx.decode_data()?;
            let symbol = CompactString::from(data.symbol.as_str());
            let crr = data
                .constant_reserve_ratio
                .parse::<i64>()
                .map_err(|_| CoinError::InvalidCrr {
                    symbol: symbol.clone(),
                    value: data.constant_reserve_ratio.clone(),
                })?;

            let creator = remove_address_prefix(&tx.from);
            let creation_address_id = match self.store.find_address_id(creator).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, address = %creator, "Cannot resolve coin creator");
                    None
                }
            };

            coins.push(CoinInsert {
                symbol,
                name: data.name,
                crr,
                volume: data.initial_amount,
                reserve_balance: data.initial_reserve,
                creation_address_id,
            });
        }
        Ok(coins)
    }

    /// Re-read coin state from the node and write it back.
    ///
    /// The base coin is skipped. A symbol whose node state or live row
    /// cannot be read is logged and skipped without holding back the rest.
    /// Returns the number of coins written.
    pub async fn refresh(&self, symbols: &BTreeSet<CompactString>) -> Result<u64, sqlx::Error> {
        let mut updates = Vec::with_capacity(symbols.len());
        for symbol in symbols.iter().filter(|s| **s != self.base_coin) {
            match self.fetch_update(symbol).await {
                Ok(update) => updates.push(update),
                Err(CoinError::Database(e)) => {
                    error!(symbol = %symbol, error = %e, "Coin lookup failed, skipping refresh")
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "Skipping coin refresh"),
            }
        }
        if updates.is_empty() {
            return Ok(0);
        }
        self.store.upsert_coins(updates).await
    }

    async fn fetch_update(&self, symbol: &str) -> Result<CoinUpdate, CoinError> {
        let info = self.node.coin_info(symbol).await?;
        let id = self.require(symbol).await?;
        let crr = info.crr.parse::<i64>().map_err(|_| CoinError::InvalidCrr {
            symbol: CompactString::from(symbol),
            value: info.crr.clone(),
        })?;
        Ok(CoinUpdate {
            id,
            symbol: CompactString::from(symbol),
            name: info.name,
            crr,
            volume: info.volume,
            reserve_balance: info.reserve_balance,
        })
    }
}

#[async_trait]
impl<S: ExtenderStore, N: NodeApi> JobHandler<CoinRefreshJob> for CoinCache<S, N> {
    async fn handle(&self, job: CoinRefreshJob) {
        match self.refresh(&job.symbols).await {
            Ok(refreshed) => info!(
                requested = job.symbols.len(),
                refreshed, "Coins refreshed"
            ),
            Err(e) => error!(error = %e, symbols = ?job.symbols, "Coin refresh failed"),
        }
    }
}

/// Symbols touched by the given transactions whose node state may have
/// changed: every gas coin plus both sides of each conversion.
///
/// The base coin and empty symbols are left out. A conversion payload that
/// cannot be decoded contributes only its gas coin.
pub fn symbols_to_refresh(transactions: &[Transaction], base_coin: &str) -> BTreeSet<CompactString> {
    let mut symbols = BTreeSet::new();
    for tx in transactions {
        symbols.insert(CompactString::from(tx.gas_coin.as_str()));

        let pair = match tx.kind {
            TransactionType::SellCoin => tx
                .decode_data::<SellCoinData>()
                .map(|d| (d.coin_to_sell, d.coin_to_buy)),
            TransactionType::SellAllCoin => tx
                .decode_data::<SellAllCoinData>()
                .map(|d| (d.coin_to_sell, d.coin_to_buy)),
            TransactionType::BuyCoin => tx
                .decode_data::<BuyCoinData>()
                .map(|d| (d.coin_to_sell, d.coin_to_buy)),
            _ => continue,
        };
        match pair {
            Ok((sell, buy)) => {
                symbols.insert(CompactString::from(sell));
                symbols.insert(CompactString::from(buy));
            }
            Err(e) => warn!(error = %e, "Skipping conversion payload"),
        }
    }
    symbols.retain(|s| !s.is_empty() && s != base_coin);
    symbols
}
