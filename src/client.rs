//! Capability interface onto the coordination service.
//!
//! The registry core consumes the coordination client through this trait;
//! connection establishment, session keep-alive and the raw node CRUD live
//! behind it. Watch and connection-state notifications are delivered over
//! plain mpsc channels so consumers can block, poll with a timeout, or
//! drain them from a loop thread.

use std::sync::mpsc::Receiver;

use crate::error::Result;

/// Connection-state notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connected,
    Disconnected,
    /// The session is gone; every ephemeral node it created is gone too.
    SessionExpired,
}

/// Child-watch notification. Carries no payload: the receiver re-lists
/// the children and diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    ChildrenChanged,
}

pub trait CoordClient: Send + Sync {
    /// Create `path` and any missing ancestors as persistent nodes.
    /// Idempotent.
    fn ensure_path(&self, path: &str) -> Result<()>;

    /// Create an ephemeral node. Create-only: an existing node yields
    /// `Error::AlreadyExists` and the caller decides whether to replace it.
    fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Remove a node. Removing a node that does not exist is not an error.
    fn delete(&self, path: &str) -> Result<()>;

    /// Child names under `path`. A missing node or one with no children
    /// yields `Error::NotFound`.
    fn get_children(&self, path: &str) -> Result<Vec<String>>;

    /// Persistent child watch on `path`. Fires on every child create or
    /// delete, including those caused by session expiry; survives
    /// reconnection.
    fn watch_children(&self, path: &str) -> Result<Receiver<WatchEvent>>;

    /// Stream of connection-state changes.
    fn state_events(&self) -> Receiver<ConnState>;

    /// Release the session. Ephemeral nodes vanish and all notification
    /// senders are dropped.
    fn close(&self);
}
