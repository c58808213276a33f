use crate::client::{Coordination, CreateMode, NodeEvent, Watch, WatchKind};
use crate::error::{CoordinationError, Result};
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{info, trace, warn};
use zookeeper_client as zk;

/// A [`Coordination`] backend talking to a ZooKeeper ensemble.
#[derive(Clone)]
pub struct ZooKeeperCoordination {
    client: zk::Client,
}

impl std::fmt::Debug for ZooKeeperCoordination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZooKeeperCoordination").finish_non_exhaustive()
    }
}

fn map_zk_error(path: &str, err: zk::Error) -> CoordinationError {
    let message = format!("{path}: {err}");
    match err {
        zk::Error::NoNode => CoordinationError::NodeNotFound(path.to_string()),
        zk::Error::NodeExists => CoordinationError::NodeExists(path.to_string()),
        zk::Error::ConnectionLoss => CoordinationError::ConnectionLost(message),
        zk::Error::SessionExpired => CoordinationError::SessionExpired(message),
        _ if message.to_ascii_lowercase().contains("timeout") => {
            CoordinationError::Timeout(message)
        }
        _ => CoordinationError::Operation(message),
    }
}

fn map_event(event_type: zk::EventType) -> NodeEvent {
    match event_type {
        zk::EventType::NodeCreated => NodeEvent::Created,
        zk::EventType::NodeDeleted => NodeEvent::Deleted,
        zk::EventType::NodeDataChanged => NodeEvent::DataChanged,
        zk::EventType::NodeChildrenChanged => NodeEvent::ChildrenChanged,
        _ => NodeEvent::Session,
    }
}

/// Forwards a ZooKeeper one-shot watcher into a channel the caller can await
/// or drop.
fn bridge(path: &str, node_exists: bool, watcher: zk::OneshotWatcher) -> Watch {
    let (tx, rx) = oneshot::channel();
    let path = path.to_string();
    tokio::spawn(async move {
        let event = watcher.changed().await;
        trace!(path = %path, event_type = ?event.event_type, "zookeeper watch fired");
        let _ = tx.send(map_event(event.event_type));
    });
    Watch::new(node_exists, rx)
}

impl ZooKeeperCoordination {
    /// Connects to an ensemble given as `host:port[,host:port...][/chroot]`.
    pub async fn connect(cluster: &str) -> Result<Self> {
        let client = zk::Client::connect(cluster).await.map_err(|e| {
            warn!(cluster = %cluster, error = %e, "failed to connect to ZooKeeper");
            map_zk_error(cluster, e)
        })?;
        info!(cluster = %cluster, "connected to ZooKeeper");
        Ok(Self::new(client))
    }

    /// Wraps an already connected client.
    pub fn new(client: zk::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Coordination for ZooKeeperCoordination {
    async fn exists(&self, path: &str) -> Result<bool> {
        let stat = self
            .client
            .check_stat(path)
            .await
            .map_err(|e| map_zk_error(path, e))?;
        Ok(stat.is_some())
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let zk_mode = match mode {
            CreateMode::Persistent => zk::CreateMode::Persistent,
            CreateMode::EphemeralSequential => zk::CreateMode::EphemeralSequential,
        };
        let options = zk_mode.with_acls(zk::Acls::anyone_all());

        let (_, sequence) = self
            .client
            .create(path, data, &options)
            .await
            .map_err(|e| map_zk_error(path, e))?;

        Ok(match mode {
            CreateMode::Persistent => path.to_string(),
            CreateMode::EphemeralSequential => format!("{path}{sequence}"),
        })
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> Result<()> {
        self.client
            .set_data(path, data, None)
            .await
            .map_err(|e| map_zk_error(path, e))?;
        Ok(())
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        let (data, _) = self
            .client
            .get_data(path)
            .await
            .map_err(|e| map_zk_error(path, e))?;
        Ok(data)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete(path, None)
            .await
            .map_err(|e| map_zk_error(path, e))
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let mut children = self
            .client
            .list_children(path)
            .await
            .map_err(|e| map_zk_error(path, e))?;
        children.sort();
        Ok(children)
    }

    async fn watch(&self, path: &str, kind: WatchKind) -> Result<Watch> {
        match kind {
            WatchKind::Node => {
                let (stat, watcher) = self
                    .client
                    .check_and_watch_stat(path)
                    .await
                    .map_err(|e| map_zk_error(path, e))?;
                Ok(bridge(path, stat.is_some(), watcher))
            }
            WatchKind::Children => {
                let (_, watcher) = self
                    .client
                    .list_and_watch_children(path)
                    .await
                    .map_err(|e| map_zk_error(path, e))?;
                Ok(bridge(path, true, watcher))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_node_errors() {
        assert_eq!(
            map_zk_error("/token", zk::Error::NoNode),
            CoordinationError::NodeNotFound("/token".to_string())
        );
        assert_eq!(
            map_zk_error("/locks", zk::Error::NodeExists),
            CoordinationError::NodeExists("/locks".to_string())
        );
        assert!(map_zk_error("/token", zk::Error::ConnectionLoss).is_retryable());
        assert!(matches!(
            map_zk_error("/token", zk::Error::SessionExpired),
            CoordinationError::SessionExpired(_)
        ));
    }

    #[test]
    fn maps_watch_events() {
        assert_eq!(map_event(zk::EventType::NodeDeleted), NodeEvent::Deleted);
        assert_eq!(map_event(zk::EventType::NodeCreated), NodeEvent::Created);
        assert_eq!(map_event(zk::EventType::Session), NodeEvent::Session);
    }
}
