//! Batched message sending
//!
//! Coalesces many small outbound messages into rate-limited batches
//! written to a channel by a single background flush task.

mod config;
mod sender;

pub use config::BatchedSenderConfig;
pub use sender::{BatchedSender, SenderState, SenderStats};
