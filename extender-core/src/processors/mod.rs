//! Pipeline stages.
//!
//! - `BlockIngestor`: fetches each block, runs the stages below in order
//! - `BlockRecorder`: block row, periodic reward aggregation
//! - `AddressExtractor`: block -> `BlockAddressSet`, saved and forwarded,
//!   then awaited until settled
//! - `BalanceSyncRunner`: `BlockAddressSet` -> fetch pool -> reconcile pool,
//!   emits `BlockSettled` once the block's barrier opens
//! - `EventClassifier`: events -> liquidations, reward/slash save pools,
//!   coin refresh queue
//! - `CoinCache`: symbol -> id resolution shared by every stage

pub mod address_extractor;
pub mod balance_sync;
pub mod block_ingest;
pub mod block_recorder;
pub mod coin_cache;
pub mod event_classifier;

pub use address_extractor::{AddressExtractor, ExtractError, extract_addresses};
pub use balance_sync::{BalanceDiff, BalanceSync, BalanceSyncRunner, SyncError, diff_balances};
pub use block_ingest::{BlockIngestor, BlockReport, IngestError};
pub use block_recorder::{BlockError, BlockRecorder};
pub use coin_cache::{CoinCache, CoinError, CoinRefreshJob, symbols_to_refresh};
pub use event_classifier::{ClassifyError, EventClassifier, EventSaver, EventSummary};
