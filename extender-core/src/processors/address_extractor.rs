//! Deduplicating address extraction.
//!
//! Every block is reduced to the distinct, normalized set of addresses that
//! took part in it. The set is persisted (insert-if-absent) and then handed
//! to the balance runner.

use crate::events::{BalanceSyncRequest, BalanceSyncRequestSender, BlockAddressSet};
use crate::store::ExtenderStore;
use extender_sdk::address::remove_address_prefix;
use extender_sdk::objects::{
    DecodeError, Event, MultiSendData, SendData, Transaction, TransactionType,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("balance pipeline is closed")]
    PipelineClosed,
}

/// Collect the distinct participant addresses of a block.
///
/// Sources are every sender, every send recipient, every multisend
/// recipient, and the subject address of every event. Every transaction
/// must carry a payload; one without fails the whole block.
pub fn extract_addresses(
    height: u64,
    transactions: &[Transaction],
    events: &[Event],
) -> Result<BlockAddressSet, DecodeError> {
    let mut addresses = BTreeSet::new();
    let mut add = |address: &str| {
        let address = remove_address_prefix(address);
        if !address.is_empty() {
            addresses.insert(address.to_string());
        }
    };

    for tx in transactions {
        if !tx.has_data() {
            return Err(DecodeError::MissingData {
                hash: tx.hash.clone(),
            });
        }
        add(&tx.from);

        match tx.kind {
            TransactionType::Send => {
                let data: SendData = tx.decode_data()?;
                add(&data.to);
            }
            TransactionType::MultiSend => {
                let data: MultiSendData = tx.decode_data()?;
                for item in &data.list {
                    add(&item.to);
                }
            }
            _ => {}
        }
    }

    for event in events {
        add(&event.value.address);
    }

    Ok(BlockAddressSet {
        height,
        addresses: addresses.into_iter().collect(),
    })
}

pub struct AddressExtractor<S> {
    store: Arc<S>,
    address_tx: BalanceSyncRequestSender,
}

impl<S: ExtenderStore> AddressExtractor<S> {
    pub fn new(store: Arc<S>, address_tx: BalanceSyncRequestSender) -> Self {
        Self { store, address_tx }
    }

    /// Persist the addresses of a set, skipping the ones already stored.
    pub async fn save(&self, set: &BlockAddressSet) -> Result<u64, ExtractError> {
        if set.is_empty() {
            return Ok(0);
        }
        let inserted = self.store.insert_addresses_if_absent(&set.addresses).await?;
        debug!(
            height = set.height,
            addresses = set.len(),
            inserted,
            "Block addresses saved"
        );
        Ok(inserted)
    }

    /// Hand a set to the balance runner and wait until every chunk of it
    /// was reconciled or dropped.
    ///
    /// Nothing touches balances or coins of the next stage while a block's
    /// balance workers are still running.
    pub async fn forward(&self, set: BlockAddressSet) -> Result<(), ExtractError> {
        let (request, settled) = BalanceSyncRequest::new(set);
        self.address_tx
            .send(request)
            .await
            .map_err(|_| ExtractError::PipelineClosed)?;
        settled.await.map_err(|_| ExtractError::PipelineClosed)
    }
}
