use shortmint_coordination::CoordinationError;
use std::time::Duration;
use thiserror::Error;

/// Result type for allocator operations.
pub type Result<T> = std::result::Result<T, AllocatorError>;

/// Errors returned by the lock and the token range manager.
///
/// Whatever the variant, a failed allocation produced no identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocatorError {
    #[error(transparent)]
    Coordination(#[from] CoordinationError),
    #[error("lock ticket {ticket} disappeared before the lock was acquired")]
    LockNodeVanished { ticket: String },
    #[error("timed out after {waited:?} waiting for the lock")]
    AcquireTimeout { waited: Duration },
    #[error("counter at {path} holds a non-integer value: {value:?}")]
    CorruptState { path: String, value: String },
    #[error("token space exhausted after {last}")]
    Exhausted { last: u64 },
}

impl AllocatorError {
    /// Whether restarting the whole lock acquisition may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Coordination(e) => e.is_retryable(),
            Self::LockNodeVanished { .. } | Self::AcquireTimeout { .. } => true,
            Self::CorruptState { .. } | Self::Exhausted { .. } => false,
        }
    }
}
