//! Pipeline messages and the channels that carry them.
//!
//! # Flow
//!
//! 1. `BlockIngestor` sends a `BalanceSyncRequest` -> `BalanceSyncRunner`
//!    and waits for its `settled` handle
//! 2. `BalanceSync` fetch workers emit `PipelineSignal::BalancesFetched`
//! 3. `BalanceSyncRunner` emits `PipelineSignal::BlockSettled` after the
//!    per-block barrier opens

pub mod channels;
pub mod types;

pub use channels::{
    BalanceSyncRequestReceiver, BalanceSyncRequestSender, PipelineSignalReceiver,
    PipelineSignalSender, SIGNAL_CHANNEL_BUFFER, balance_sync_request_channel,
    pipeline_signal_channel,
};
pub use types::{BalanceSyncRequest, BlockAddressSet, PipelineSignal};
