use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Removed when the creating session ends; the service appends a
    /// zero-padded, monotonically increasing suffix to the requested path.
    EphemeralSequential,
}

/// What a one-shot [`Watch`] observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// Creation, deletion or data change of the node itself.
    Node,
    /// Any change to the node's child set.
    Children,
}

/// The event delivered to a [`Watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    Created,
    Deleted,
    DataChanged,
    ChildrenChanged,
    /// The session changed state (disconnect, expiry) or the watch was dropped
    /// by the service. Observers must re-read the state they care about.
    Session,
}

/// A one-shot notification registered on a path.
#[derive(Debug)]
pub struct Watch {
    node_exists: bool,
    receiver: Option<oneshot::Receiver<NodeEvent>>,
}

impl Watch {
    pub fn new(node_exists: bool, receiver: oneshot::Receiver<NodeEvent>) -> Self {
        Self {
            node_exists,
            receiver: Some(receiver),
        }
    }

    /// A watch that never observes anything and resolves immediately.
    pub fn inert() -> Self {
        Self {
            node_exists: false,
            receiver: None,
        }
    }

    /// Whether the watched node existed when the watch was registered.
    pub fn node_exists(&self) -> bool {
        self.node_exists
    }

    /// Waits for the watch to fire.
    ///
    /// A watch whose notifier went away resolves to [`NodeEvent::Session`].
    pub async fn changed(self) -> NodeEvent {
        match self.receiver {
            Some(receiver) => receiver.await.unwrap_or(NodeEvent::Session),
            None => NodeEvent::Session,
        }
    }
}

/// Capabilities of a hierarchical, path-addressed coordination service.
///
/// Every call is a potential network round-trip. Implementations map
/// backend failures onto [`CoordinationError`](crate::CoordinationError).
#[async_trait]
pub trait Coordination: Send + Sync + 'static {
    /// Checks whether a node exists.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Creates a node and returns the path that was actually created.
    ///
    /// For [`CreateMode::EphemeralSequential`] the returned path carries the
    /// suffix assigned by the service. Fails with `NodeNotFound` if the parent
    /// is missing and `NodeExists` if the node is already present.
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String>;

    /// Replaces the data of an existing node.
    async fn set_data(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Reads the data of an existing node.
    async fn get_data(&self, path: &str) -> Result<Vec<u8>>;

    /// Deletes a node. Fails with `NodeNotFound` if it does not exist.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists child names of a node, sorted lexicographically.
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    /// Registers a one-shot watch on `path`.
    async fn watch(&self, path: &str, kind: WatchKind) -> Result<Watch>;
}

/// Joins a parent path and a child name.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Returns the last segment of a path.
pub fn node_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Returns the parent of a path, or `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        assert_eq!(join_path("/", "token"), "/token");
        assert_eq!(join_path("/locks", "token_lock_0000000001"), "/locks/token_lock_0000000001");
        assert_eq!(node_name("/locks/token_lock_0000000001"), "token_lock_0000000001");
        assert_eq!(parent_path("/locks/a"), Some("/locks"));
        assert_eq!(parent_path("/locks"), Some("/"));
        assert_eq!(parent_path("/"), None);
    }

    #[tokio::test]
    async fn inert_watch_resolves_immediately() {
        let watch = Watch::inert();
        assert!(!watch.node_exists());
        assert_eq!(watch.changed().await, NodeEvent::Session);
    }

    #[tokio::test]
    async fn dropped_notifier_resolves_as_session_event() {
        let (tx, rx) = oneshot::channel();
        let watch = Watch::new(true, rx);
        drop(tx);
        assert_eq!(watch.changed().await, NodeEvent::Session);
    }
}
