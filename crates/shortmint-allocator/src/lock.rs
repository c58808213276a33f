//! Mutual exclusion across processes built on ephemeral-sequential nodes.
//!
//! Every candidate creates a ticket under a shared root. The candidate whose
//! ticket has the lowest sequence holds the lock; everyone else watches only
//! the ticket immediately ahead of it, so a release wakes exactly one waiter.
//!
//! Ticket names embed a per-attempt id (`token_lock_<id>-<seq>`). When the
//! reply to a create is lost the ticket may still exist, and the id is how
//! the attempt finds and adopts it instead of leaving it to block the queue.

use crate::error::{AllocatorError, Result};
use shortmint_coordination::client::{join_path, node_name};
use shortmint_coordination::{
    remove_node_with_retry, Coordinator, CreateMode, RetryPolicy, WatchKind,
};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

pub const LOCK_ROOT: &str = "/locks";
pub const LOCK_PREFIX: &str = "token_lock_";
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const SEQUENCE_WIDTH: usize = 10;

/// The sequence suffix the service appended to a ticket name.
fn sequence(name: &str) -> &str {
    &name[name.len().saturating_sub(SEQUENCE_WIDTH)..]
}

/// Configures a [`DistributedLock`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct LockSettings {
    /// Persistent node under which tickets are created.
    #[builder(default = LOCK_ROOT.to_string(), setter(into))]
    pub root: String,
    /// Name prefix of every ticket.
    #[builder(default = LOCK_PREFIX.to_string(), setter(into))]
    pub prefix: String,
    /// Upper bound on waiting for the lock. `None` waits forever.
    #[builder(default = Some(DEFAULT_ACQUIRE_TIMEOUT))]
    pub acquire_timeout: Option<Duration>,
    /// Retry policy used when deleting a ticket.
    #[builder(default)]
    pub release_retry: RetryPolicy,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Proof of holding a [`DistributedLock`].
///
/// Hand it back to [`DistributedLock::release`]. A handle dropped while still
/// holding a ticket (for example when the acquiring future is cancelled)
/// removes the ticket in the background.
#[must_use = "the lock is held until the handle is released"]
#[derive(Debug)]
pub struct LockHandle {
    ticket: Option<String>,
    coordinator: Coordinator,
    retry: RetryPolicy,
}

impl LockHandle {
    /// Full path of the ticket, `None` when coordination is disabled.
    pub fn ticket(&self) -> Option<&str> {
        self.ticket.as_deref()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        warn!(ticket = %ticket, "lock handle dropped without release");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(ticket = %ticket, "no runtime to remove ticket, leaving it to session expiry");
            return;
        };
        let coordinator = self.coordinator.clone();
        let retry = self.retry;
        runtime.spawn(async move {
            if let Err(e) = remove_node_with_retry(&coordinator, &ticket, retry).await {
                warn!(ticket = %ticket, error = %e, "failed to remove abandoned ticket");
            }
        });
    }
}

/// A lock shared by every process pointing at the same root.
#[derive(Debug, Clone)]
pub struct DistributedLock {
    coordinator: Coordinator,
    settings: LockSettings,
}

impl DistributedLock {
    pub fn new(coordinator: Coordinator, settings: LockSettings) -> Self {
        Self {
            coordinator,
            settings,
        }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    fn handle(&self, ticket: Option<String>) -> LockHandle {
        LockHandle {
            ticket,
            coordinator: self.coordinator.clone(),
            retry: self.settings.release_retry,
        }
    }

    /// Blocks until this process holds the lock.
    ///
    /// Fails with [`AllocatorError::LockNodeVanished`] if the own ticket is
    /// gone before the lock was obtained and with
    /// [`AllocatorError::AcquireTimeout`] once the configured bound elapses.
    /// Both are worth retrying from scratch. The ticket never outlives a
    /// failed attempt.
    pub async fn acquire(&self) -> Result<LockHandle> {
        if self.coordinator.is_disabled() {
            warn!(mode = %self.coordinator.mode(), "lock not coordinated, granting locally");
            return Ok(self.handle(None));
        }

        self.coordinator.ensure_path(&self.settings.root).await?;
        let attempt = format!("{}{}-", self.settings.prefix, Uuid::new_v4());
        let ticket = match self
            .coordinator
            .create(
                &join_path(&self.settings.root, &attempt),
                &[],
                CreateMode::EphemeralSequential,
            )
            .await
        {
            Ok(ticket) => ticket,
            Err(e) if e.is_retryable() => {
                warn!(attempt = %attempt, error = %e, "ticket creation unconfirmed, looking for it");
                match self.find_ticket(&attempt).await? {
                    Some(ticket) => ticket,
                    None => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };
        trace!(ticket = %ticket, "lock ticket created");

        let handle = self.handle(Some(ticket.clone()));
        let wait = self.wait_for_turn(&ticket);
        let outcome = match self.settings.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or(Err(AllocatorError::AcquireTimeout { waited: limit })),
            None => wait.await,
        };

        match outcome {
            Ok(()) => {
                debug!(ticket = %ticket, "lock acquired");
                Ok(handle)
            }
            Err(e) => {
                warn!(ticket = %ticket, error = %e, "lock acquisition failed");
                if let Err(release_err) = self.release(handle).await {
                    warn!(ticket = %ticket, error = %release_err, "failed to remove ticket after failed acquisition");
                }
                Err(e)
            }
        }
    }

    /// Looks up the ticket created by `attempt` after an unconfirmed create.
    async fn find_ticket(&self, attempt: &str) -> Result<Option<String>> {
        let coordinator = &self.coordinator;
        let root = self.settings.root.as_str();
        let children = self
            .settings
            .release_retry
            .run("list lock tickets", move || coordinator.get_children(root))
            .await?;
        let found = children
            .into_iter()
            .find(|name| name.starts_with(attempt))
            .map(|name| join_path(root, &name));
        match &found {
            Some(ticket) => debug!(ticket = %ticket, "adopted ticket from unconfirmed create"),
            None => debug!(attempt = %attempt, "unconfirmed create left no ticket"),
        }
        Ok(found)
    }

    async fn wait_for_turn(&self, ticket_path: &str) -> Result<()> {
        let root = &self.settings.root;
        let ticket = node_name(ticket_path);

        loop {
            let mut tickets: Vec<String> = self
                .coordinator
                .get_children(root)
                .await?
                .into_iter()
                .filter(|name| name.starts_with(&self.settings.prefix))
                .collect();
            // suffixes are zero-padded, so lexicographic order is numeric order
            tickets.sort_by(|a, b| sequence(a).cmp(sequence(b)));

            let position = tickets
                .iter()
                .position(|name| name == ticket)
                .ok_or_else(|| AllocatorError::LockNodeVanished {
                    ticket: ticket_path.to_string(),
                })?;
            if position == 0 {
                return Ok(());
            }

            let predecessor = join_path(root, &tickets[position - 1]);
            let watch = self
                .coordinator
                .watch(&predecessor, WatchKind::Node)
                .await?;
            if !watch.node_exists() {
                trace!(ticket = %ticket, predecessor = %predecessor, "predecessor already gone");
                continue;
            }

            debug!(ticket = %ticket, predecessor = %predecessor, "waiting for predecessor");
            let event = watch.changed().await;
            trace!(ticket = %ticket, ?event, "predecessor watch fired");
        }
    }

    /// Releases the lock by deleting the ticket. Idempotent.
    pub async fn release(&self, mut handle: LockHandle) -> Result<()> {
        let Some(ticket) = handle.ticket.take() else {
            return Ok(());
        };
        remove_node_with_retry(&self.coordinator, &ticket, self.settings.release_retry).await?;
        debug!(ticket = %ticket, "lock released");
        Ok(())
    }

    /// Runs `f` while holding the lock and releases it on every exit path.
    ///
    /// An error from `f` wins over an error from the release.
    pub async fn with_lock<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = self.acquire().await?;
        let outcome = f().await;
        let released = self.release(handle).await;

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!(error = %release_err, "failed to release lock after failed critical section");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shortmint_coordination::{CoordinationError, MemoryEnsemble};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn lock_for(ensemble: &MemoryEnsemble) -> DistributedLock {
        DistributedLock::new(Coordinator::connected(ensemble.session()), fast_settings())
    }

    fn fast_settings() -> LockSettings {
        LockSettings::builder()
            .acquire_timeout(Some(Duration::from_secs(5)))
            .release_retry(
                RetryPolicy::builder()
                    .delay(Duration::from_millis(1))
                    .build(),
            )
            .build()
    }

    async fn wait_for_tickets(ensemble: &MemoryEnsemble, count: usize) {
        awaitility::at_most(Duration::from_secs(1))
            .poll_interval(Duration::from_millis(2))
            .until_async(|| async { ensemble.children(LOCK_ROOT).len() >= count })
            .await;
    }

    #[tokio::test]
    async fn acquire_and_release_single_holder() {
        let ensemble = MemoryEnsemble::new();
        let lock = lock_for(&ensemble);

        let handle = lock.acquire().await.unwrap();
        let ticket = handle.ticket().unwrap().to_string();
        assert!(ticket.starts_with("/locks/token_lock_"));
        assert!(ticket.ends_with("-0000000000"));
        assert_eq!(ensemble.children(LOCK_ROOT), vec![node_name(&ticket)]);

        lock.release(handle).await.unwrap();
        assert!(ensemble.children(LOCK_ROOT).is_empty());
        // the root stays behind
        assert!(ensemble.node_data(LOCK_ROOT).is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn waiter_acquires_after_predecessor_releases() {
        let ensemble = MemoryEnsemble::new();
        let first = lock_for(&ensemble);
        let second = lock_for(&ensemble);

        let held = first.acquire().await.unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = tokio::spawn({
            let acquired = Arc::clone(&acquired);
            async move {
                let handle = second.acquire().await.unwrap();
                acquired.store(true, Ordering::SeqCst);
                second.release(handle).await.unwrap();
            }
        });

        wait_for_tickets(&ensemble, 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!acquired.load(Ordering::SeqCst));

        first.release(held).await.unwrap();
        waiter.await.unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(ensemble.children(LOCK_ROOT).is_empty());
    }

    #[tokio::test]
    async fn acquire_times_out_and_cleans_up_ticket() {
        let ensemble = MemoryEnsemble::new();
        let holder = lock_for(&ensemble);
        let impatient = DistributedLock::new(
            Coordinator::connected(ensemble.session()),
            LockSettings::builder()
                .acquire_timeout(Some(Duration::from_millis(30)))
                .build(),
        );

        let held = holder.acquire().await.unwrap();
        let err = impatient.acquire().await.unwrap_err();
        assert!(matches!(err, AllocatorError::AcquireTimeout { .. }));
        assert!(err.is_retryable());
        assert_eq!(
            ensemble.children(LOCK_ROOT),
            vec![node_name(held.ticket().unwrap())]
        );

        holder.release(held).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn holder_session_expiry_hands_over_the_lock() {
        let ensemble = MemoryEnsemble::new();
        let crashed_session = ensemble.session();
        let crashed_id = crashed_session.id();
        let crashed = DistributedLock::new(Coordinator::connected(crashed_session), fast_settings());
        let survivor = lock_for(&ensemble);

        let abandoned = crashed.acquire().await.unwrap();
        let waiter = tokio::spawn(async move {
            let handle = survivor.acquire().await.unwrap();
            survivor.release(handle).await.unwrap();
        });

        wait_for_tickets(&ensemble, 2).await;
        ensemble.expire_session(crashed_id);
        waiter.await.unwrap();

        // the dead session can no longer talk to the ensemble
        let err = crashed.release(abandoned).await.unwrap_err();
        assert!(matches!(
            err,
            AllocatorError::Coordination(CoordinationError::SessionExpired(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn vanished_ticket_fails_acquisition() {
        let ensemble = MemoryEnsemble::new();
        let holder = lock_for(&ensemble);
        let victim = lock_for(&ensemble);

        let held = holder.acquire().await.unwrap();
        let waiter = tokio::spawn(async move { victim.acquire().await });

        wait_for_tickets(&ensemble, 2).await;
        let queued = ensemble
            .children(LOCK_ROOT)
            .into_iter()
            .find(|name| name.ends_with("-0000000001"))
            .unwrap();
        ensemble.remove(&join_path(LOCK_ROOT, &queued)).unwrap();
        holder.release(held).await.unwrap();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, AllocatorError::LockNodeVanished { .. }));
        assert!(ensemble.children(LOCK_ROOT).is_empty());
    }

    #[tokio::test]
    async fn with_lock_releases_on_error() {
        let ensemble = MemoryEnsemble::new();
        let lock = lock_for(&ensemble);

        let err = lock
            .with_lock(|| async {
                Err::<(), _>(AllocatorError::CorruptState {
                    path: "/token".to_string(),
                    value: "x".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AllocatorError::CorruptState { .. }));
        assert!(ensemble.children(LOCK_ROOT).is_empty());

        let value = lock.with_lock(|| async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
        assert!(ensemble.children(LOCK_ROOT).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropped_handle_removes_ticket_in_background() {
        let ensemble = MemoryEnsemble::new();
        let lock = lock_for(&ensemble);

        let handle = lock.acquire().await.unwrap();
        drop(handle);

        awaitility::at_most(Duration::from_secs(1))
            .poll_interval(Duration::from_millis(2))
            .until_async(|| async { ensemble.children(LOCK_ROOT).is_empty() })
            .await;
    }

    #[test]
    fn tickets_order_by_sequence_not_by_attempt_id() {
        let mut tickets = vec![
            "token_lock_f0-0000000002".to_string(),
            "token_lock_a0-0000000010".to_string(),
            "token_lock_ff-0000000001".to_string(),
        ];
        tickets.sort_by(|a, b| sequence(a).cmp(sequence(b)));
        assert_eq!(
            tickets,
            vec![
                "token_lock_ff-0000000001",
                "token_lock_f0-0000000002",
                "token_lock_a0-0000000010",
            ]
        );
    }

    #[tokio::test]
    async fn unconfirmed_create_adopts_its_ticket() {
        let ensemble = MemoryEnsemble::new();
        ensemble.put(LOCK_ROOT, b"").unwrap();
        let unlucky = lock_for(&ensemble);
        let other = lock_for(&ensemble);

        // the ticket is written but the reply is lost
        ensemble.fail_next_creates_after_apply(1);
        let handle = unlucky.acquire().await.unwrap();
        let ticket = handle.ticket().unwrap().to_string();
        assert!(ticket.ends_with("-0000000000"));
        assert_eq!(ensemble.children(LOCK_ROOT), vec![node_name(&ticket)]);

        unlucky.release(handle).await.unwrap();
        assert!(ensemble.children(LOCK_ROOT).is_empty());

        // nothing stale is left queued ahead of other processes
        let handle = other.acquire().await.unwrap();
        other.release(handle).await.unwrap();
    }

    #[tokio::test]
    async fn disabled_lock_is_granted_locally() {
        let lock = DistributedLock::new(Coordinator::disabled(), LockSettings::default());
        let handle = lock.acquire().await.unwrap();
        assert!(handle.ticket().is_none());
        lock.release(handle).await.unwrap();
    }
}
