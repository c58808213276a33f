use crate::client::{parent_path, Coordination, CreateMode, NodeEvent, Watch, WatchKind};
use crate::error::{CoordinationError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace};

type Watchers = HashMap<String, Vec<oneshot::Sender<NodeEvent>>>;

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    /// Session that owns an ephemeral node.
    owner: Option<u64>,
    /// Sequence handed to the next sequential child.
    next_sequence: u32,
}

impl Node {
    fn persistent(data: Vec<u8>) -> Self {
        Self {
            data,
            owner: None,
            next_sequence: 0,
        }
    }
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    node_watches: Watchers,
    child_watches: Watchers,
    next_session: u64,
    expired: HashSet<u64>,
    failing_deletes: u32,
    failing_creates: u32,
}

fn fire(watchers: &mut Watchers, path: &str, event: NodeEvent) {
    if let Some(senders) = watchers.remove(path) {
        trace!(path = %path, ?event, watchers = senders.len(), "firing watches");
        for sender in senders {
            // the waiter may have given up already
            let _ = sender.send(event);
        }
    }
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::persistent(Vec::new()));
        Self {
            nodes,
            node_watches: HashMap::new(),
            child_watches: HashMap::new(),
            next_session: 1,
            expired: HashSet::new(),
            failing_deletes: 0,
            failing_creates: 0,
        }
    }

    fn check_session(&self, session: u64) -> Result<()> {
        if self.expired.contains(&session) {
            return Err(CoordinationError::SessionExpired(format!(
                "session {session:#x}"
            )));
        }
        Ok(())
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn create(
        &mut self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        session: u64,
    ) -> Result<String> {
        let parent = parent_path(path)
            .ok_or_else(|| CoordinationError::NodeExists(path.to_string()))?;
        let parent_node = self
            .nodes
            .get(parent)
            .ok_or_else(|| CoordinationError::NodeNotFound(parent.to_string()))?;
        if parent_node.owner.is_some() {
            return Err(CoordinationError::Operation(format!(
                "ephemeral node {parent} cannot have children"
            )));
        }

        let sequence = parent_node.next_sequence;
        let created = match mode {
            CreateMode::Persistent => path.to_string(),
            CreateMode::EphemeralSequential => format!("{path}{sequence:010}"),
        };
        if self.nodes.contains_key(&created) {
            return Err(CoordinationError::NodeExists(created));
        }
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.next_sequence = sequence.wrapping_add(1);
        }

        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::EphemeralSequential => Some(session),
        };
        self.nodes.insert(
            created.clone(),
            Node {
                data: data.to_vec(),
                owner,
                next_sequence: 0,
            },
        );

        fire(&mut self.node_watches, &created, NodeEvent::Created);
        fire(&mut self.child_watches, parent, NodeEvent::ChildrenChanged);
        Ok(created)
    }

    fn set_data(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NodeNotFound(path.to_string()))?;
        node.data = data.to_vec();
        fire(&mut self.node_watches, path, NodeEvent::DataChanged);
        Ok(())
    }

    fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        self.nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordinationError::NodeNotFound(path.to_string()))
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if path == "/" {
            return Err(CoordinationError::Operation(
                "cannot delete the root node".to_string(),
            ));
        }
        if !self.nodes.contains_key(path) {
            return Err(CoordinationError::NodeNotFound(path.to_string()));
        }
        if !self.children(path).is_empty() {
            return Err(CoordinationError::Operation(format!(
                "node {path} is not empty"
            )));
        }

        self.nodes.remove(path);
        fire(&mut self.node_watches, path, NodeEvent::Deleted);
        if let Some(parent) = parent_path(path) {
            fire(&mut self.child_watches, parent, NodeEvent::ChildrenChanged);
        }
        Ok(())
    }

    fn get_children(&self, path: &str) -> Result<Vec<String>> {
        if !self.nodes.contains_key(path) {
            return Err(CoordinationError::NodeNotFound(path.to_string()));
        }
        Ok(self.children(path))
    }

    fn watch(&mut self, path: &str, kind: WatchKind) -> Result<Watch> {
        // watches on nodes that never come back are dropped by their waiters
        for watchers in [&mut self.node_watches, &mut self.child_watches] {
            watchers.retain(|_, senders| {
                senders.retain(|sender| !sender.is_closed());
                !senders.is_empty()
            });
        }

        let exists = self.nodes.contains_key(path);
        let (tx, rx) = oneshot::channel();
        match kind {
            WatchKind::Node => {
                self.node_watches
                    .entry(path.to_string())
                    .or_default()
                    .push(tx);
            }
            WatchKind::Children => {
                if !exists {
                    return Err(CoordinationError::NodeNotFound(path.to_string()));
                }
                self.child_watches
                    .entry(path.to_string())
                    .or_default()
                    .push(tx);
            }
        }
        Ok(Watch::new(exists, rx))
    }

    fn expire(&mut self, session: u64) -> Vec<String> {
        self.expired.insert(session);
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            // ephemeral nodes never have children
            let _ = self.delete(path);
        }
        owned
    }
}

/// An in-process coordination tree with ZooKeeper semantics.
///
/// Each [`MemorySession`] handed out by [`MemoryEnsemble::session`] behaves
/// like a separate client process: it owns its ephemeral nodes, and
/// [`MemoryEnsemble::expire_session`] reaps them the way a real ensemble does
/// when a client dies.
#[derive(Debug, Clone)]
pub struct MemoryEnsemble {
    tree: Arc<Mutex<Tree>>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    /// Opens a new client session.
    pub fn session(&self) -> MemorySession {
        let mut tree = self.tree.lock();
        let id = tree.next_session;
        tree.next_session += 1;
        debug!(session = id, "memory session opened");
        MemorySession {
            id,
            tree: Arc::clone(&self.tree),
        }
    }

    /// Expires a session, deleting every ephemeral node it owns.
    ///
    /// Returns the paths that were reaped.
    pub fn expire_session(&self, session: u64) -> Vec<String> {
        let reaped = self.tree.lock().expire(session);
        debug!(session, reaped = reaped.len(), "memory session expired");
        reaped
    }

    /// Makes the next `count` deletes fail with `ConnectionLost`.
    pub fn fail_next_deletes(&self, count: u32) {
        self.tree.lock().failing_deletes = count;
    }

    /// Makes the next `count` creates succeed on the tree but report
    /// `ConnectionLost` to the caller, as when the reply is lost.
    pub fn fail_next_creates_after_apply(&self, count: u32) {
        self.tree.lock().failing_creates = count;
    }

    /// Number of registered watches that have not fired yet.
    pub fn pending_watches(&self) -> usize {
        let tree = self.tree.lock();
        tree.node_watches
            .values()
            .chain(tree.child_watches.values())
            .map(Vec::len)
            .sum()
    }

    /// Reads a node's data outside of any session.
    pub fn node_data(&self, path: &str) -> Option<Vec<u8>> {
        self.tree.lock().nodes.get(path).map(|node| node.data.clone())
    }

    /// Lists a node's children outside of any session.
    pub fn children(&self, path: &str) -> Vec<String> {
        self.tree.lock().children(path)
    }

    /// Writes a node outside of any session, creating it as persistent if
    /// needed. The parent must exist.
    pub fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut tree = self.tree.lock();
        if tree.nodes.contains_key(path) {
            tree.set_data(path, data)
        } else {
            tree.create(path, data, CreateMode::Persistent, 0).map(|_| ())
        }
    }

    /// Deletes a node outside of any session, as an operator would.
    pub fn remove(&self, path: &str) -> Result<()> {
        self.tree.lock().delete(path)
    }
}

/// One client session on a [`MemoryEnsemble`].
#[derive(Debug)]
pub struct MemorySession {
    id: u64,
    tree: Arc<Mutex<Tree>>,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Coordination for MemorySession {
    async fn exists(&self, path: &str) -> Result<bool> {
        let tree = self.tree.lock();
        tree.check_session(self.id)?;
        Ok(tree.nodes.contains_key(path))
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let mut tree = self.tree.lock();
        tree.check_session(self.id)?;
        let created = tree.create(path, data, mode, self.id)?;
        if tree.failing_creates > 0 {
            tree.failing_creates -= 1;
            return Err(CoordinationError::ConnectionLost(format!(
                "injected failure after creating {created}"
            )));
        }
        Ok(created)
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut tree = self.tree.lock();
        tree.check_session(self.id)?;
        tree.set_data(path, data)
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        let tree = self.tree.lock();
        tree.check_session(self.id)?;
        tree.get_data(path)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut tree = self.tree.lock();
        tree.check_session(self.id)?;
        if tree.failing_deletes > 0 {
            tree.failing_deletes -= 1;
            return Err(CoordinationError::ConnectionLost(format!(
                "injected failure deleting {path}"
            )));
        }
        tree.delete(path)
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let tree = self.tree.lock();
        tree.check_session(self.id)?;
        tree.get_children(path)
    }

    async fn watch(&self, path: &str, kind: WatchKind) -> Result<Watch> {
        let mut tree = self.tree.lock();
        tree.check_session(self.id)?;
        tree.watch(path, kind)
    }
}
