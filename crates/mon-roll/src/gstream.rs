//! The g-stream sink shared by `MonRoll`'s periodic export and `OssStats`:
//! a bounded channel of JSON records, pushed non-blocking and best-effort.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

/// A sink for JSON monitoring records. `push` never blocks: a full sink
/// drops the record and reports failure, matching the native
/// `XrdXrootdGStream::Insert`'s "failure to emit is logged but non-fatal"
/// contract.
pub trait GStream: Send + Sync {
    /// Pushes one record. Returns `false` if the record was dropped.
    fn push(&self, json: &str) -> bool;
}

/// An in-memory, bounded-channel `GStream`. Typically paired with a reader
/// thread that forwards records to a collector socket or log file.
pub struct ChannelGStream {
    tx: SyncSender<String>,
}

impl ChannelGStream {
    /// Builds a connected sink/receiver pair with the given capacity.
    pub fn new(capacity: usize) -> (Self, Receiver<String>) {
        let (tx, rx) = sync_channel(capacity);
        (ChannelGStream { tx }, rx)
    }
}

impl GStream for ChannelGStream {
    fn push(&self, json: &str) -> bool {
        match self.tx.try_send(json.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("g-stream full, dropping record");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("g-stream receiver gone, dropping record");
                false
            }
        }
    }
}

/// A sink that discards everything; useful when monitoring is disabled but
/// callers still want an unconditional `GStream` to push into.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGStream;

impl GStream for NullGStream {
    fn push(&self, _json: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_succeeds_while_capacity_remains_then_drops() {
        let (gstream, rx) = ChannelGStream::new(1);
        assert!(gstream.push("{\"a\":1}"));
        assert!(!gstream.push("{\"a\":2}"));
        assert_eq!(rx.try_recv().unwrap(), "{\"a\":1}");
    }

    #[test]
    fn null_gstream_always_reports_failure() {
        assert!(!NullGStream.push("{}"));
    }
}
