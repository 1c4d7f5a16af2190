//! In-memory coordination service.
//!
//! A single-session, in-process implementation of [`CoordClient`]: a
//! path-keyed node tree with ephemeral tagging, per-path child watches and
//! a connection-state broadcast. Registries embed it for tests and local
//! runs the way the original system runs against an embedded test cluster.
//!
//! Fault injection drives the recovery paths: [`MemoryClient::disconnect`],
//! [`MemoryClient::expire_session`] and [`MemoryClient::reconnect`].

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use crate::client::{ConnState, CoordClient, WatchEvent};
use crate::error::{Error, Result};

struct Node {
    data: Vec<u8>,
    /// Session id that owns this node; `None` for persistent nodes.
    ephemeral: Option<u64>,
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    watches: HashMap<String, Vec<Sender<WatchEvent>>>,
    states: Vec<Sender<ConnState>>,
    session: u64,
    connected: bool,
    closed: bool,
}

impl Tree {
    fn check_usable(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if !self.connected {
            return Err(Error::Connection("memory client disconnected".into()));
        }
        Ok(())
    }

    fn notify_children_changed(&mut self, parent: &str) {
        if let Some(watchers) = self.watches.get_mut(parent) {
            watchers.retain(|tx| tx.send(WatchEvent::ChildrenChanged).is_ok());
        }
    }

    fn broadcast(&mut self, state: ConnState) {
        self.states.retain(|tx| tx.send(state).is_ok());
    }

    fn remove_session_ephemerals(&mut self, session: u64) {
        let doomed: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in doomed {
            self.nodes.remove(&path);
            if let Some(parent) = parent_of(&path) {
                let parent = parent.to_string();
                self.notify_children_changed(&parent);
            }
        }
    }
}

fn parent_of(path: &str) -> Option<&str> {
    let idx = path.rfind('/')?;
    if idx == 0 { None } else { Some(&path[..idx]) }
}

pub struct MemoryClient {
    tree: Mutex<Tree>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(Tree {
                session: 1,
                connected: true,
                ..Tree::default()
            }),
        }
    }

    fn tree(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop the session: every ephemeral node it created disappears, the
    /// affected watches fire, and `SessionExpired` is broadcast. The client
    /// stays disconnected until [`reconnect`](Self::reconnect).
    pub fn expire_session(&self) {
        let mut tree = self.tree();
        if tree.closed {
            return;
        }
        let session = tree.session;
        tree.remove_session_ephemerals(session);
        tree.session += 1;
        tree.connected = false;
        tree.broadcast(ConnState::SessionExpired);
    }

    /// Drop connectivity without losing the session.
    pub fn disconnect(&self) {
        let mut tree = self.tree();
        if tree.closed {
            return;
        }
        tree.connected = false;
        tree.broadcast(ConnState::Disconnected);
    }

    /// Restore connectivity and broadcast `Connected`.
    pub fn reconnect(&self) {
        let mut tree = self.tree();
        if tree.closed {
            return;
        }
        tree.connected = true;
        tree.broadcast(ConnState::Connected);
    }

    /// Node data, mostly for assertions.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.tree().nodes.get(path).map(|node| node.data.clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.tree().nodes.contains_key(path)
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordClient for MemoryClient {
    fn ensure_path(&self, path: &str) -> Result<()> {
        let mut tree = self.tree();
        tree.check_usable()?;
        let mut prefix = String::new();
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);
            if !tree.nodes.contains_key(&prefix) {
                tree.nodes.insert(
                    prefix.clone(),
                    Node {
                        data: Vec::new(),
                        ephemeral: None,
                    },
                );
                if let Some(parent) = parent_of(&prefix) {
                    let parent = parent.to_string();
                    tree.notify_children_changed(&parent);
                }
            }
        }
        Ok(())
    }

    fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut tree = self.tree();
        tree.check_usable()?;
        let parent = parent_of(path)
            .ok_or_else(|| Error::NotFound(format!("no parent for {path}")))?
            .to_string();
        if !tree.nodes.contains_key(&parent) {
            return Err(Error::NotFound(parent));
        }
        if tree.nodes.contains_key(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        let session = tree.session;
        tree.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                ephemeral: Some(session),
            },
        );
        tree.notify_children_changed(&parent);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let mut tree = self.tree();
        tree.check_usable()?;
        if tree.nodes.remove(path).is_some() {
            if let Some(parent) = parent_of(path) {
                let parent = parent.to_string();
                tree.notify_children_changed(&parent);
            }
        }
        Ok(())
    }

    fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let tree = self.tree();
        tree.check_usable()?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let children: Vec<String> = tree
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect();
        if children.is_empty() {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(children)
    }

    fn watch_children(&self, path: &str) -> Result<Receiver<WatchEvent>> {
        let mut tree = self.tree();
        tree.check_usable()?;
        let (tx, rx) = channel();
        tree.watches.entry(path.to_string()).or_default().push(tx);
        Ok(rx)
    }

    fn state_events(&self) -> Receiver<ConnState> {
        let (tx, rx) = channel();
        self.tree().states.push(tx);
        rx
    }

    fn close(&self) {
        let mut tree = self.tree();
        if tree.closed {
            return;
        }
        let session = tree.session;
        tree.remove_session_ephemerals(session);
        tree.closed = true;
        tree.connected = false;
        // Dropping the senders disconnects every watch and state receiver.
        tree.watches.clear();
        tree.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ensure_then_create_then_list() {
        let client = MemoryClient::new();
        client.ensure_path("/dubbo/com.example.Svc/providers").unwrap();
        client
            .create_ephemeral("/dubbo/com.example.Svc/providers/n1", b"")
            .unwrap();
        let children = client.get_children("/dubbo/com.example.Svc/providers").unwrap();
        assert_eq!(children, vec!["n1".to_string()]);
    }

    #[test]
    fn test_create_existing_node_fails() {
        let client = MemoryClient::new();
        client.ensure_path("/a").unwrap();
        client.create_ephemeral("/a/n", b"").unwrap();
        assert!(matches!(
            client.create_ephemeral("/a/n", b""),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_without_parent_fails() {
        let client = MemoryClient::new();
        assert!(matches!(
            client.create_ephemeral("/missing/n", b""),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let client = MemoryClient::new();
        assert!(client.delete("/nothing/here").is_ok());
    }

    #[test]
    fn test_empty_children_is_not_found() {
        let client = MemoryClient::new();
        client.ensure_path("/a/b").unwrap();
        assert!(matches!(client.get_children("/a/b"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_children_do_not_recurse() {
        let client = MemoryClient::new();
        client.ensure_path("/a/b/c").unwrap();
        client.create_ephemeral("/a/n", b"").unwrap();
        let children = client.get_children("/a").unwrap();
        assert_eq!(children, vec!["b".to_string(), "n".to_string()]);
    }

    #[test]
    fn test_watch_fires_on_create_and_delete() {
        let client = MemoryClient::new();
        client.ensure_path("/a").unwrap();
        let rx = client.watch_children("/a").unwrap();
        client.create_ephemeral("/a/n", b"").unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            WatchEvent::ChildrenChanged
        );
        client.delete("/a/n").unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            WatchEvent::ChildrenChanged
        );
    }

    #[test]
    fn test_expire_session_drops_ephemerals_only() {
        let client = MemoryClient::new();
        client.ensure_path("/a").unwrap();
        client.create_ephemeral("/a/n", b"").unwrap();
        let states = client.state_events();

        client.expire_session();
        assert_eq!(
            states.recv_timeout(Duration::from_secs(1)).unwrap(),
            ConnState::SessionExpired
        );
        assert!(!client.exists("/a/n"));
        assert!(client.exists("/a"), "persistent nodes survive expiry");

        // Disconnected until reconnect.
        assert!(matches!(client.get_children("/a"), Err(Error::Connection(_))));
        client.reconnect();
        assert_eq!(
            states.recv_timeout(Duration::from_secs(1)).unwrap(),
            ConnState::Connected
        );
        assert!(matches!(client.get_children("/a"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_disconnect_blocks_operations() {
        let client = MemoryClient::new();
        client.ensure_path("/a").unwrap();
        client.disconnect();
        assert!(matches!(client.ensure_path("/b"), Err(Error::Connection(_))));
        client.reconnect();
        assert!(client.ensure_path("/b").is_ok());
    }

    #[test]
    fn test_close_disconnects_receivers() {
        let client = MemoryClient::new();
        client.ensure_path("/a").unwrap();
        let watch = client.watch_children("/a").unwrap();
        let states = client.state_events();
        client.close();
        assert!(watch.recv().is_err());
        assert!(states.recv().is_err());
        assert!(matches!(client.ensure_path("/a"), Err(Error::Closed)));
    }
}
