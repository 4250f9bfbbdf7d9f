//! Channel trait definition

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a [`Channel`]
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel was already closed when the operation was attempted
    #[error("Channel closed")]
    Closed,

    /// Any other transport failure (connection reset, encode error, ...)
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    /// Check if this is a closed-channel error
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::Closed)
    }
}

/// Ordered, bidirectional transport that batches are written to
///
/// This is the seam between the communication primitives and the
/// underlying wire transport. Implementations own serialization and
/// delivery; callers own the single-writer discipline: a
/// [`BatchedSender`](crate::BatchedSender) guarantees that only its
/// background flush task ever calls [`write`](Channel::write).
#[async_trait]
pub trait Channel<T>: Send + Sync {
    /// Write one batch, returning the number of bytes put on the wire
    async fn write(&self, batch: Vec<T>) -> Result<usize, ChannelError>;

    /// Flush and close the channel
    ///
    /// Fails with [`ChannelError::Closed`] if already closed (ignorable).
    async fn close(&self) -> Result<(), ChannelError>;

    /// Tear the channel down immediately, best effort, no delivery guarantee
    fn abort(&self);

    /// Whether the channel has been closed or aborted
    fn is_closed(&self) -> bool;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::Instant;

    /// Recording channel for unit tests
    ///
    /// Counts one byte per message written. Can be closed externally and
    /// can be armed to fail the next write.
    #[derive(Default)]
    pub struct MockChannel {
        written: Mutex<Vec<(Instant, Vec<String>)>>,
        closed: AtomicBool,
        aborted: AtomicBool,
        fail_next: Mutex<Option<ChannelError>>,
    }

    impl MockChannel {
        pub fn new() -> Self {
            Self::default()
        }

        /// Batches written so far, with the instant each write happened
        pub fn written(&self) -> Vec<(Instant, Vec<String>)> {
            self.written.lock().expect("mock lock").clone()
        }

        /// Batches written so far, payloads only
        pub fn batches(&self) -> Vec<Vec<String>> {
            self.written().into_iter().map(|(_, b)| b).collect()
        }

        /// Mark the channel closed without going through close()
        pub fn force_close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        /// Arm a failure for the next write call
        pub fn fail_next_write(&self, err: ChannelError) {
            *self.fail_next.lock().expect("mock lock") = Some(err);
        }

        pub fn was_aborted(&self) -> bool {
            self.aborted.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Channel<String> for MockChannel {
        async fn write(&self, batch: Vec<String>) -> Result<usize, ChannelError> {
            if let Some(err) = self.fail_next.lock().expect("mock lock").take() {
                return Err(err);
            }
            if self.is_closed() {
                return Err(ChannelError::Closed);
            }
            let nbytes = batch.len();
            self.written.lock().expect("mock lock").push((Instant::now(), batch));
            Ok(nbytes)
        }

        async fn close(&self) -> Result<(), ChannelError> {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Err(ChannelError::Closed);
            }
            Ok(())
        }

        fn abort(&self) {
            self.aborted.store(true, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_closed() {
        assert!(ChannelError::Closed.is_closed());
        assert!(!ChannelError::Transport("connection reset".to_string()).is_closed());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ChannelError::Closed.to_string(), "Channel closed");
        assert_eq!(
            ChannelError::Transport("connection reset".to_string()).to_string(),
            "Transport error: connection reset"
        );
    }

    #[tokio::test]
    async fn test_mock_channel_records_writes() {
        let channel = mock::MockChannel::new();
        let n = channel.write(vec!["a".to_string(), "b".to_string()]).await.expect("write");
        assert_eq!(n, 2);
        assert_eq!(channel.batches(), vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[tokio::test]
    async fn test_mock_channel_close_is_terminal() {
        let channel = mock::MockChannel::new();
        channel.close().await.expect("first close");
        assert!(channel.is_closed());
        assert!(channel.close().await.is_err());
        assert!(channel.write(vec!["x".to_string()]).await.is_err());
    }
}
