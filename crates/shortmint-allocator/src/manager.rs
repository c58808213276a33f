use crate::error::{AllocatorError, Result};
use crate::lock::{DistributedLock, LockSettings};
use crate::range::TokenRange;
use async_trait::async_trait;
use shortmint_coordination::client::parent_path;
use shortmint_coordination::{
    remove_node_with_retry, CoordinationError, CoordinationMode, Coordinator, CreateMode,
    RetryPolicy,
};
use shortmint_core::{Generator, ShortCodeBase62};
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

pub const COUNTER_PATH: &str = "/token";
pub const DEFAULT_WINDOW_SIZE: u64 = 1_000_000;
/// Seed of the counter, so the first identifier minted is `1000000`.
pub const DEFAULT_INITIAL_COUNTER: u64 = 999_999;
pub const DEFAULT_ACQUIRE_ATTEMPTS: u32 = 3;

/// Configures a [`TokenRangeManager`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct AllocatorSettings {
    /// Number of tokens reserved per refill.
    #[builder(default = DEFAULT_WINDOW_SIZE)]
    pub window_size: u64,
    /// Node holding the persisted high-water mark.
    #[builder(default = COUNTER_PATH.to_string(), setter(into))]
    pub counter_path: String,
    /// Value the counter is seeded with when absent.
    #[builder(default = DEFAULT_INITIAL_COUNTER)]
    pub initial_counter: u64,
    #[builder(default)]
    pub lock: LockSettings,
    /// How many times a failed lock acquisition is restarted from scratch.
    #[builder(default = DEFAULT_ACQUIRE_ATTEMPTS)]
    pub acquire_attempts: u32,
    /// Retry policy for counter reads, writes and deletes.
    #[builder(default)]
    pub retry: RetryPolicy,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug)]
struct WindowState {
    range: TokenRange,
    /// Last window end reserved by this process, or the seed.
    high_water: u64,
}

/// Hands out unique tokens from locally buffered windows.
///
/// Only a refill talks to the coordination service: it takes the
/// distributed lock, bumps the persisted counter by one window and releases.
/// Every other call is served from memory. Share it behind an `Arc`.
#[derive(Debug)]
pub struct TokenRangeManager {
    coordinator: Coordinator,
    lock: DistributedLock,
    settings: AllocatorSettings,
    state: Mutex<WindowState>,
}

impl TokenRangeManager {
    pub fn new(coordinator: Coordinator, settings: AllocatorSettings) -> Self {
        let lock = DistributedLock::new(coordinator.clone(), settings.lock.clone());
        let state = WindowState {
            range: TokenRange::empty(),
            high_water: settings.initial_counter,
        };
        Self {
            coordinator,
            lock,
            settings,
            state: Mutex::new(state),
        }
    }

    pub fn mode(&self) -> CoordinationMode {
        self.coordinator.mode()
    }

    pub fn settings(&self) -> &AllocatorSettings {
        &self.settings
    }

    /// Snapshot of the current window.
    pub async fn range(&self) -> TokenRange {
        self.state.lock().await.range
    }

    /// Seeds the counter node unless it already exists.
    pub async fn bootstrap(&self) -> Result<()> {
        if self.coordinator.is_disabled() {
            warn!(
                mode = %self.mode(),
                initial = self.settings.initial_counter,
                "no counter to bootstrap, using the local seed"
            );
            return Ok(());
        }

        let path = self.settings.counter_path.as_str();
        if let Some(parent) = parent_path(path) {
            self.coordinator.ensure_path(parent).await?;
        }
        if self.coordinator.exists(path).await? {
            debug!(path = %path, "counter already present");
            return Ok(());
        }

        let seed = self.settings.initial_counter.to_string();
        match self
            .coordinator
            .create(path, seed.as_bytes(), CreateMode::Persistent)
            .await
        {
            Ok(_) => info!(path = %path, initial = %seed, "counter seeded"),
            Err(CoordinationError::NodeExists(_)) => {
                debug!(path = %path, "counter seeded concurrently");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Returns the next token, refilling the window when it is spent.
    pub async fn next_token(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        if state.range.is_exhausted() {
            self.refill(&mut state).await?;
        }
        let last = state.range.end();
        state
            .range
            .take()
            .ok_or(AllocatorError::Exhausted { last })
    }

    /// Returns the next token, base-62 encoded.
    pub async fn next_code(&self) -> Result<ShortCodeBase62> {
        self.next_token().await.map(ShortCodeBase62::encode)
    }

    async fn refill(&self, state: &mut WindowState) -> Result<()> {
        let size = self.settings.window_size.max(1);
        let range = if self.coordinator.is_disabled() {
            warn!(
                mode = %self.mode(),
                last = state.high_water,
                "reserving window locally, tokens are unique only within this process"
            );
            TokenRange::after(state.high_water, size)?
        } else {
            self.locked("refill", move || self.reserve_window(size)).await?
        };

        info!(
            start = range.start(),
            end = range.end(),
            mode = %self.mode(),
            "token window reserved"
        );
        state.high_water = range.end();
        state.range = range;
        Ok(())
    }

    async fn reserve_window(&self, size: u64) -> Result<TokenRange> {
        let last = self.load_counter().await?;
        let range = TokenRange::after(last, size)?;
        self.write_counter(range.end()).await?;
        Ok(range)
    }

    /// Raises the persisted counter to at least `last_used`.
    ///
    /// The counter never decreases: a value below the stored one is ignored.
    /// Returns the value persisted afterwards.
    pub async fn set_token_range_with_lock(&self, last_used: u64) -> Result<u64> {
        if self.coordinator.is_disabled() {
            let mut state = self.state.lock().await;
            state.high_water = state.high_water.max(last_used);
            warn!(mode = %self.mode(), high_water = state.high_water, "counter kept locally");
            return Ok(state.high_water);
        }

        self.locked("set counter", move || async move {
            let stored = self.load_counter().await?;
            if last_used <= stored {
                debug!(stored, requested = last_used, "counter already past requested value");
                return Ok(stored);
            }
            self.write_counter(last_used).await?;
            info!(previous = stored, counter = last_used, "counter raised");
            Ok(last_used)
        })
        .await
    }

    /// Deletes the counter node. Succeeds if it is already gone.
    pub async fn remove_counter(&self) -> Result<()> {
        let path = self.settings.counter_path.as_str();
        remove_node_with_retry(&self.coordinator, path, self.settings.retry).await?;
        info!(path = %path, "counter removed");
        Ok(())
    }

    /// Runs `f` under the lock, restarting the acquisition while it fails
    /// with a retryable error.
    async fn locked<T, F, Fut>(&self, operation: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.settings.acquire_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.lock.with_lock(|| f()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(operation, attempt, error = %e, "locked operation failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    warn!(operation, attempt, error = %e, "locked operation failed");
                    return Err(e);
                }
            }
        }
    }

    /// Reads the counter. A missing counter is an error: only
    /// [`TokenRangeManager::bootstrap`] may seed it, since reseeding after
    /// tokens were issued would hand them out again.
    async fn load_counter(&self) -> Result<u64> {
        let coordinator = &self.coordinator;
        let path = self.settings.counter_path.as_str();
        let raw = self
            .settings
            .retry
            .run("read counter", move || coordinator.get_data(path))
            .await
            .map_err(|e| {
                if let CoordinationError::NodeNotFound(_) = e {
                    warn!(path = %path, "counter missing, refusing to reseed outside bootstrap");
                }
                e
            })?;
        parse_counter(path, &raw)
    }

    async fn write_counter(&self, value: u64) -> Result<()> {
        let coordinator = &self.coordinator;
        let path = self.settings.counter_path.as_str();
        let data = value.to_string();
        let bytes = data.as_bytes();
        self.settings
            .retry
            .run("write counter", move || coordinator.set_data(path, bytes))
            .await?;
        debug!(path = %path, counter = value, "counter persisted");
        Ok(())
    }
}

fn parse_counter(path: &str, raw: &[u8]) -> Result<u64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.trim().parse::<u64>().ok())
        .ok_or_else(|| AllocatorError::CorruptState {
            path: path.to_string(),
            value: String::from_utf8_lossy(raw).into_owned(),
        })
}

#[async_trait]
impl Generator for TokenRangeManager {
    type Output = ShortCodeBase62;
    type Error = AllocatorError;

    async fn generate(&self) -> Result<Self::Output> {
        self.next_code().await
    }
}
