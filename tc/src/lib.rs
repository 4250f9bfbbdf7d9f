//! TaskComm - Communication primitives for the daemon layer
//!
//! TaskComm provides the two timing-sensitive building blocks of the
//! daemon's communication layer: coalescing many tiny outbound messages
//! into rate-limited batches, and driving callbacks on a fixed cadence
//! without overlap or catch-up bursts.
//!
//! # Core Concepts
//!
//! - **One Writer Per Channel**: each sender owns a single background
//!   flush task that is the only code ever writing to its channel
//! - **Coalesce, Don't Queue Durably**: batches are forwarded best-effort;
//!   there is no redelivery or exactly-once machinery
//! - **Wake Early, Flush On Time**: producers wake the flush task when it
//!   is idle, but the rate limit decides when bytes actually move
//! - **Skip Missed Ticks**: periodic callbacks that overrun resume on the
//!   next period boundary instead of firing back-to-back
//!
//! # Modules
//!
//! - [`channel`] - Transport trait consumed by the sender
//! - [`batched`] - Batched message sender
//! - [`periodic`] - Drift-corrected periodic scheduler

pub mod batched;
pub mod channel;
pub mod periodic;

// Re-export commonly used types
pub use batched::{BatchedSender, BatchedSenderConfig, SenderState, SenderStats};
pub use channel::{Channel, ChannelError};
pub use periodic::{PeriodicConfig, PeriodicError, PeriodicScheduler, PeriodicStats};
