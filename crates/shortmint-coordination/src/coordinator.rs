use crate::client::{Coordination, CreateMode, Watch, WatchKind};
use crate::error::{CoordinationError, Result};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether identifiers are coordinated across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationMode {
    /// No coordination service: uniqueness holds only inside this process.
    Disabled,
    /// Backed by a coordination service: uniqueness holds across processes.
    Distributed,
}

impl Display for CoordinationMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinationMode::Disabled => write!(f, "disabled"),
            CoordinationMode::Distributed => write!(f, "distributed"),
        }
    }
}

/// Handle to the coordination service, chosen once at process start.
///
/// In [`Coordinator::Disabled`] every call is a no-op that logs a warning and
/// returns the zero value for its type. This is a degraded mode: the
/// allocator keeps working, but two processes may mint the same identifier.
#[derive(Clone)]
pub enum Coordinator {
    Disabled,
    Connected(Arc<dyn Coordination>),
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Coordinator").field(&self.mode()).finish()
    }
}

fn skip(op: &'static str, path: &str) {
    warn!(
        mode = %CoordinationMode::Disabled,
        op,
        path = %path,
        "coordination disabled, skipping call"
    );
}

impl Coordinator {
    /// Creates a coordinator with no backing service.
    pub fn disabled() -> Self {
        warn!(
            mode = %CoordinationMode::Disabled,
            "no coordination service configured; identifiers are only unique within this process"
        );
        Self::Disabled
    }

    /// Creates a coordinator backed by `client`.
    pub fn connected(client: impl Coordination) -> Self {
        Self::from_arc(Arc::new(client))
    }

    /// Creates a coordinator backed by a shared client.
    pub fn from_arc(client: Arc<dyn Coordination>) -> Self {
        info!(mode = %CoordinationMode::Distributed, "coordination service attached");
        Self::Connected(client)
    }

    pub fn mode(&self) -> CoordinationMode {
        match self {
            Coordinator::Disabled => CoordinationMode::Disabled,
            Coordinator::Connected(_) => CoordinationMode::Distributed,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Coordinator::Disabled)
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self {
            Coordinator::Disabled => {
                skip("exists", path);
                Ok(false)
            }
            Coordinator::Connected(client) => client.exists(path).await,
        }
    }

    pub async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        match self {
            Coordinator::Disabled => {
                skip("create", path);
                Ok(String::new())
            }
            Coordinator::Connected(client) => client.create(path, data, mode).await,
        }
    }

    pub async fn set_data(&self, path: &str, data: &[u8]) -> Result<()> {
        match self {
            Coordinator::Disabled => {
                skip("set_data", path);
                Ok(())
            }
            Coordinator::Connected(client) => client.set_data(path, data).await,
        }
    }

    pub async fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        match self {
            Coordinator::Disabled => {
                skip("get_data", path);
                Ok(Vec::new())
            }
            Coordinator::Connected(client) => client.get_data(path).await,
        }
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        match self {
            Coordinator::Disabled => {
                skip("delete", path);
                Ok(())
            }
            Coordinator::Connected(client) => client.delete(path).await,
        }
    }

    pub async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        match self {
            Coordinator::Disabled => {
                skip("get_children", path);
                Ok(Vec::new())
            }
            Coordinator::Connected(client) => client.get_children(path).await,
        }
    }

    pub async fn watch(&self, path: &str, kind: WatchKind) -> Result<Watch> {
        match self {
            Coordinator::Disabled => {
                skip("watch", path);
                Ok(Watch::inert())
            }
            Coordinator::Connected(client) => client.watch(path, kind).await,
        }
    }

    /// Creates `path` and any missing ancestors as empty persistent nodes.
    ///
    /// A concurrent creator winning the race is not an error.
    pub async fn ensure_path(&self, path: &str) -> Result<()> {
        let client = match self {
            Coordinator::Disabled => {
                skip("ensure_path", path);
                return Ok(());
            }
            Coordinator::Connected(client) => client,
        };

        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);

            if client.exists(&prefix).await? {
                continue;
            }
            match client.create(&prefix, &[], CreateMode::Persistent).await {
                Ok(_) => debug!(path = %prefix, "created persistent node"),
                Err(CoordinationError::NodeExists(_)) => {
                    debug!(path = %prefix, "node created concurrently");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
