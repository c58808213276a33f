//! Distributed token-range allocation.
//!
//! A [`TokenRangeManager`] reserves windows of consecutive tokens from a
//! counter persisted in the coordination service and serves identifiers from
//! the current window without further round-trips. Reservations are
//! serialised across processes by a [`DistributedLock`].

pub mod error;
pub mod lock;
pub mod manager;
pub mod range;

pub use error::{AllocatorError, Result};
pub use lock::{DistributedLock, LockHandle, LockSettings};
pub use manager::{AllocatorSettings, TokenRangeManager};
pub use range::TokenRange;
