//! Coordination-service access for the Shortmint allocator.
//!
//! The [`Coordination`] trait captures the handful of capabilities the
//! allocator needs from a hierarchical coordination service. [`Coordinator`]
//! is the handle the rest of the workspace holds: either backed by a real
//! service ([`ZooKeeperCoordination`], [`MemorySession`]) or disabled, in
//! which case every call is a logged no-op.

pub mod client;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod retry;
pub mod zookeeper;

pub use client::{Coordination, CreateMode, NodeEvent, Watch, WatchKind};
pub use coordinator::{CoordinationMode, Coordinator};
pub use error::{CoordinationError, Result};
pub use memory::{MemoryEnsemble, MemorySession};
pub use retry::{remove_node_with_retry, RetryPolicy};
pub use zookeeper::ZooKeeperCoordination;
