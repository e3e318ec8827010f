//! Channel factories and handles.

use super::types::{BalanceSyncRequest, PipelineSignal};
use tokio::sync::{broadcast, mpsc};

/// Buffer of the outbound signal channel. Slow subscribers lag rather than
/// stall the pipeline.
pub const SIGNAL_CHANNEL_BUFFER: usize = 256;

/// Sender handle for BalanceSyncRequest messages.
pub type BalanceSyncRequestSender = mpsc::Sender<BalanceSyncRequest>;
/// Receiver handle for BalanceSyncRequest messages.
pub type BalanceSyncRequestReceiver = mpsc::Receiver<BalanceSyncRequest>;

/// Sender handle for PipelineSignal notifications.
pub type PipelineSignalSender = broadcast::Sender<PipelineSignal>;
/// Receiver handle for PipelineSignal notifications.
pub type PipelineSignalReceiver = broadcast::Receiver<PipelineSignal>;

/// Create the channel feeding address sets into the balance runner.
///
/// Producers wait on each request's `settled` handle, so at most one set is
/// ever pending.
pub fn balance_sync_request_channel() -> (BalanceSyncRequestSender, BalanceSyncRequestReceiver) {
    mpsc::channel(1)
}

/// Create the outbound signal channel.
///
/// Sending never blocks and succeeds silently when nobody subscribed.
pub fn pipeline_signal_channel() -> (PipelineSignalSender, PipelineSignalReceiver) {
    broadcast::channel(SIGNAL_CHANNEL_BUFFER)
}
