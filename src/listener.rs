//! Per-subscription watch loop and the event stream it feeds.
//!
//! A [`ServiceListener`] owns one loop thread. The loop seeds itself with
//! the children present at subscribe time (surfaced as synthetic `Add`
//! events), then waits for watch notifications, re-lists the children and
//! diffs against the previous snapshot. All events of one diff round are
//! enqueued before the next notification is processed. Consumers pull
//! events with [`ServiceListener::next`]; closing the listener wakes a
//! blocked `next()` with `Error::Closed`.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::client::CoordClient;
use crate::codec;
use crate::diff::diff;
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const FETCH_RETRIES: u32 = 3;
const FETCH_BACKOFF: Duration = Duration::from_millis(10);

/// What happened to a provider entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Add => f.write_str("add"),
            Action::Delete => f.write_str("delete"),
        }
    }
}

/// One change in the set of entries under a subscribed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub action: Action,
    pub url: crate::url::ServiceUrl,
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceEvent{{Action{{{}}} Url{{{}}}}}", self.action, self.url)
    }
}

struct LoopCtl {
    shutdown: AtomicBool,
    /// Snapshot is stale; re-fetch and diff on the next loop turn.
    resync: AtomicBool,
    /// Ignore watch notifications while the session is being recovered.
    suspended: AtomicBool,
}

pub struct ServiceListener {
    path: String,
    ctl: Arc<LoopCtl>,
    events: Mutex<Receiver<ServiceEvent>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceListener {
    pub(crate) fn spawn(client: Arc<dyn CoordClient>, path: String) -> Result<Arc<Self>> {
        let watch_rx = client.watch_children(&path)?;
        let (tx, rx) = channel();
        let ctl = Arc::new(LoopCtl {
            shutdown: AtomicBool::new(false),
            resync: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
        });
        let loop_ctl = Arc::clone(&ctl);
        let loop_path = path.clone();
        let handle = thread::spawn(move || watch_loop(client, loop_path, watch_rx, tx, loop_ctl));
        Ok(Arc::new(Self {
            path,
            ctl,
            events: Mutex::new(rx),
            handle: Mutex::new(Some(handle)),
        }))
    }

    /// Subscribed path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Block until the next event. Fails with `Error::Closed` once the
    /// listener is closed and the queue is drained.
    pub fn next(&self) -> Result<ServiceEvent> {
        let rx = self.events.lock().map_err(|_| Error::Closed)?;
        rx.recv().map_err(|_| Error::Closed)
    }

    /// Bounded receive: `Ok(None)` when no event arrives within `timeout`.
    pub fn next_timeout(&self, timeout: Duration) -> Result<Option<ServiceEvent>> {
        let rx = self.events.lock().map_err(|_| Error::Closed)?;
        match rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.ctl.shutdown.load(Ordering::Acquire)
    }

    /// Stop the loop thread. Idempotent; a blocked [`next`](Self::next)
    /// returns `Error::Closed` once the queue is drained.
    pub fn close(&self) {
        if self.ctl.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut handle) = self.handle.lock() {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
    }

    /// Stop reacting to watch notifications until the next resync. Used
    /// while the session is being re-established so the loop never diffs
    /// against a half-recovered tree.
    pub(crate) fn suspend(&self) {
        self.ctl.suspended.store(true, Ordering::Release);
    }

    /// Mark the snapshot stale. The loop re-fetches the children and diffs
    /// against the pre-expiry snapshot, so unchanged entries produce no
    /// events and changed ones produce exactly one.
    pub(crate) fn resync(&self) {
        self.ctl.resync.store(true, Ordering::Release);
    }
}

impl Drop for ServiceListener {
    fn drop(&mut self) {
        self.close();
    }
}

fn watch_loop(
    client: Arc<dyn CoordClient>,
    path: String,
    watch_rx: Receiver<crate::client::WatchEvent>,
    tx: Sender<ServiceEvent>,
    ctl: Arc<LoopCtl>,
) {
    let mut snapshot = HashSet::new();
    // Seed round: everything present at subscribe time becomes an Add.
    sync(&*client, &path, &mut snapshot, &tx);
    loop {
        if ctl.shutdown.load(Ordering::Acquire) {
            break;
        }
        if ctl.resync.swap(false, Ordering::AcqRel) {
            ctl.suspended.store(false, Ordering::Release);
            sync(&*client, &path, &mut snapshot, &tx);
            continue;
        }
        match watch_rx.recv_timeout(POLL_INTERVAL) {
            Ok(_) if ctl.suspended.load(Ordering::Acquire) => {
                // Stale notification from a session under recovery.
            }
            Ok(_) => sync(&*client, &path, &mut snapshot, &tx),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // Watch source is gone; only shutdown or a resync nudge
                // can produce further work.
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
    log::debug!("listener loop for {path} stopped");
}

/// One diff round: fetch the children, emit one event per changed name,
/// replace the snapshot.
fn sync(client: &dyn CoordClient, path: &str, snapshot: &mut HashSet<String>, tx: &Sender<ServiceEvent>) {
    let children = match fetch_children(client, path) {
        Some(children) => children,
        None => return,
    };
    let fresh: HashSet<String> = children.into_iter().collect();
    let delta = diff(snapshot, &fresh);
    for name in &delta.removed {
        emit(tx, Action::Delete, name);
    }
    for name in &delta.added {
        emit(tx, Action::Add, name);
    }
    *snapshot = fresh;
}

fn emit(tx: &Sender<ServiceEvent>, action: Action, name: &str) {
    match codec::decode(name) {
        Ok(url) => {
            let _ = tx.send(ServiceEvent { action, url });
        }
        // One malformed entry must not block discovery of the rest.
        Err(err) => log::warn!("skipping undecodable child {name:?}: {err}"),
    }
}

/// Fetch with bounded retry. `NotFound` means an empty path, transient
/// failures are retried with backoff and logged, exhaustion leaves the
/// snapshot untouched.
fn fetch_children(client: &dyn CoordClient, path: &str) -> Option<Vec<String>> {
    let mut delay = FETCH_BACKOFF;
    for attempt in 1..=FETCH_RETRIES {
        match client.get_children(path) {
            Ok(children) => return Some(children),
            Err(Error::NotFound(_)) => return Some(Vec::new()),
            Err(err) => {
                log::warn!("children fetch failed for {path} (attempt {attempt}): {err}");
                thread::sleep(delay);
                delay *= 2;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClient;
    use crate::url::ServiceUrl;
    use std::sync::mpsc;

    const DIR: &str = "/dubbo/com.example.Svc/providers";

    fn setup() -> (Arc<MemoryClient>, ServiceUrl) {
        let client = Arc::new(MemoryClient::new());
        client.ensure_path(DIR).unwrap();
        let url = ServiceUrl::new("dubbo", "127.0.0.1", 20000, "com.example.Svc")
            .with_param("cluster", "mock");
        (client, url)
    }

    fn node_path(url: &ServiceUrl) -> String {
        format!("{DIR}/{}", codec::encode(url))
    }

    #[test]
    fn test_seed_round_yields_adds() {
        let (client, url) = setup();
        client.create_ephemeral(&node_path(&url), b"").unwrap();

        let listener = ServiceListener::spawn(client, DIR.to_string()).unwrap();
        let event = listener.next().unwrap();
        assert_eq!(event.action, Action::Add);
        assert_eq!(event.url, url);
        listener.close();
    }

    #[test]
    fn test_add_then_delete_events() {
        let (client, url) = setup();
        let listener = ServiceListener::spawn(Arc::clone(&client) as _, DIR.to_string()).unwrap();

        client.create_ephemeral(&node_path(&url), b"").unwrap();
        let event = listener.next().unwrap();
        assert_eq!(event.action, Action::Add);

        client.delete(&node_path(&url)).unwrap();
        let event = listener.next().unwrap();
        assert_eq!(event.action, Action::Delete);
        assert_eq!(event.url, url);
        listener.close();
    }

    #[test]
    fn test_undecodable_child_is_skipped() {
        let (client, url) = setup();
        let listener = ServiceListener::spawn(Arc::clone(&client) as _, DIR.to_string()).unwrap();

        client.create_ephemeral(&format!("{DIR}/%zz-not-a-url"), b"").unwrap();
        client.create_ephemeral(&node_path(&url), b"").unwrap();

        // Only the decodable child surfaces.
        let event = listener.next().unwrap();
        assert_eq!(event.url, url);
        assert!(listener.next_timeout(Duration::from_millis(200)).unwrap().is_none());
        listener.close();
    }

    #[test]
    fn test_close_wakes_blocked_next() {
        let (client, _) = setup();
        let listener = ServiceListener::spawn(client, DIR.to_string()).unwrap();

        let (started_tx, started_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let blocked = Arc::clone(&listener);
        let handle = std::thread::spawn(move || {
            let _ = started_tx.send(());
            let result = blocked.next();
            let _ = done_tx.send(result);
        });

        started_rx.recv().unwrap();
        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());

        listener.close();
        let result = done_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(result, Err(Error::Closed)));
        handle.join().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let (client, _) = setup();
        let listener = ServiceListener::spawn(client, DIR.to_string()).unwrap();
        listener.close();
        listener.close();
        assert!(listener.is_closed());
    }

    #[test]
    fn test_event_display_shape() {
        let url = ServiceUrl::new("dubbo", "127.0.0.1", 20000, "com.example.Svc");
        let event = ServiceEvent { action: Action::Add, url };
        assert!(event.to_string().starts_with("ServiceEvent{Action{add}"));
    }
}
