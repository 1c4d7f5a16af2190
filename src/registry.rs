//! Registry core: registration set, subscription ownership, lifecycle.
//!
//! One [`Registry`] binds to one coordination endpoint. Public methods may
//! be called from any thread; the entry map and the retained-listener slot
//! are mutex-serialized. A background state thread consumes connection
//! notifications and, after session expiry, re-creates every outstanding
//! ephemeral node and resyncs the retained listener before the registry
//! reports itself available again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::client::{ConnState, CoordClient};
use crate::codec;
use crate::error::{Error, Result};
use crate::listener::ServiceListener;
use crate::paths::{self, Category, DEFAULT_ROOT};
use crate::url::{RegistryEndpoint, Role, ServiceUrl};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One active registration: an ephemeral node we own and re-create after
/// session loss.
#[derive(Debug, Clone)]
struct RegisteredEntry {
    dir: String,
    node_path: String,
    url: ServiceUrl,
}

struct Shared {
    client: Arc<dyn CoordClient>,
    /// Keyed by full node path; the encoded name is the identity, so two
    /// URLs that encode identically are one registration.
    entries: Mutex<HashMap<String, RegisteredEntry>>,
    /// At most one retained listener per registry; replaced on subscribe.
    listener: Mutex<Option<Arc<ServiceListener>>>,
    connected: AtomicBool,
    destroyed: AtomicBool,
}

pub struct Registry {
    endpoint: RegistryEndpoint,
    root: String,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
    state_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Registry {
    /// Bind to `endpoint` over an already-connected coordination client.
    pub fn new(endpoint: RegistryEndpoint, client: Arc<dyn CoordClient>) -> Self {
        Self::with_root(endpoint, client, DEFAULT_ROOT)
    }

    pub fn with_root(
        endpoint: RegistryEndpoint,
        client: Arc<dyn CoordClient>,
        root: impl Into<String>,
    ) -> Self {
        let state_rx = client.state_events();
        let shared = Arc::new(Shared {
            client,
            entries: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
            connected: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
        });
        let shutdown = Arc::new(AtomicBool::new(false));
        let state_handle = {
            let shared = Arc::clone(&shared);
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || state_loop(shared, state_rx, shutdown))
        };
        Self {
            endpoint,
            root: root.into(),
            shared,
            shutdown,
            state_handle: Mutex::new(Some(state_handle)),
        }
    }

    pub fn endpoint(&self) -> &RegistryEndpoint {
        &self.endpoint
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// True iff the coordination client reports connected and
    /// [`destroy`](Self::destroy) has not been called. False forever after
    /// destroy.
    pub fn is_available(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
            && !self.shared.destroyed.load(Ordering::Acquire)
    }

    /// Publish `url` under the category its role selects. Idempotent: a
    /// URL that encodes identically to an existing registration is a
    /// no-op success.
    pub fn register(&self, url: &ServiceUrl) -> Result<()> {
        self.ensure_open()?;
        if !self.shared.connected.load(Ordering::Acquire) {
            return Err(Error::Connection("registry is disconnected".into()));
        }
        let category = self.category_for(url)?;
        let dir = paths::service_dir(&self.root, url, category);
        let node_path = format!("{dir}/{}", codec::encode(url));

        // Lock held across the node creation: registrations are
        // single-writer, so two concurrent registers of the same URL
        // cannot both create.
        let mut entries = lock(&self.shared.entries);
        if entries.contains_key(&node_path) {
            return Ok(());
        }
        self.shared.client.ensure_path(&dir)?;
        upsert_ephemeral(&*self.shared.client, &node_path, &[])?;
        log::debug!("registered {url} as {category} under {dir}");
        entries.insert(
            node_path.clone(),
            RegisteredEntry {
                dir,
                node_path,
                url: url.clone(),
            },
        );
        Ok(())
    }

    /// Remove the registration for `url`.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when no matching entry exists. The registry
    /// itself stays available.
    pub fn unregister(&self, url: &ServiceUrl) -> Result<()> {
        self.ensure_open()?;
        let category = self.category_for(url)?;
        let dir = paths::service_dir(&self.root, url, category);
        let node_path = format!("{dir}/{}", codec::encode(url));

        let mut entries = lock(&self.shared.entries);
        let entry = entries
            .remove(&node_path)
            .ok_or_else(|| Error::NotFound(format!("no registration for {url}")))?;
        self.shared.client.delete(&entry.node_path)?;
        log::debug!("unregistered {url}");
        Ok(())
    }

    /// Subscribe to the providers of the service `url` describes. Returns
    /// a listener whose first [`next`](ServiceListener::next) calls yield
    /// one `Add` per provider already present.
    ///
    /// At most one listener is retained per registry: a new subscribe
    /// closes and replaces the previous one.
    pub fn subscribe(&self, url: &ServiceUrl) -> Result<Arc<ServiceListener>> {
        self.ensure_open()?;
        if !self.shared.connected.load(Ordering::Acquire) {
            return Err(Error::Connection("registry is disconnected".into()));
        }
        let dir = paths::service_dir(&self.root, url, Category::Providers);
        self.shared.client.ensure_path(&dir)?;
        let listener = ServiceListener::spawn(Arc::clone(&self.shared.client), dir)?;
        let mut slot = lock(&self.shared.listener);
        if let Some(old) = slot.replace(Arc::clone(&listener)) {
            old.close();
        }
        Ok(listener)
    }

    /// Detach and close the retained listener, whichever URL it was
    /// created for; the registry keeps at most one. Idempotent.
    pub fn unsubscribe(&self, _url: &ServiceUrl) {
        let old = lock(&self.shared.listener).take();
        if let Some(listener) = old {
            listener.close();
        }
    }

    /// The retained listener, if any.
    pub fn current_listener(&self) -> Option<Arc<ServiceListener>> {
        lock(&self.shared.listener).clone()
    }

    /// Tear everything down: best-effort unregistration of every entry
    /// (failures logged, never raised), listener close, client close.
    /// Idempotent and terminal; availability is false forever after.
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("destroying registry bound to {}", self.endpoint.address());

        let old = lock(&self.shared.listener).take();
        if let Some(listener) = old {
            listener.close();
        }

        let drained: Vec<RegisteredEntry> =
            lock(&self.shared.entries).drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            if let Err(err) = self.shared.client.delete(&entry.node_path) {
                log::warn!("cleanup of {} failed: {err}", entry.node_path);
            }
        }

        self.shutdown.store(true, Ordering::Release);
        self.shared.client.close();
        if let Some(handle) = lock(&self.state_handle).take() {
            let _ = handle.join();
        }
        self.shared.connected.store(false, Ordering::Release);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.destroyed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Category from the URL's own role parameter, falling back to the
    /// endpoint's role.
    fn category_for(&self, url: &ServiceUrl) -> Result<Category> {
        match url.param(Role::KEY) {
            Some(value) => Role::from_param(value).map(Category::from),
            None => Ok(Category::from(self.endpoint.role)),
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Idempotent-create wrapper over the create-only primitive: an existing
/// node (a leftover from a previous session that has not timed out yet)
/// is deleted and re-created.
fn upsert_ephemeral(client: &dyn CoordClient, path: &str, data: &[u8]) -> Result<()> {
    match client.create_ephemeral(path, data) {
        Err(Error::AlreadyExists(_)) => {
            client.delete(path)?;
            client.create_ephemeral(path, data)
        }
        other => other,
    }
}

fn state_loop(shared: Arc<Shared>, state_rx: Receiver<ConnState>, shutdown: Arc<AtomicBool>) {
    let mut session_lost = false;
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        match state_rx.recv_timeout(POLL_INTERVAL) {
            Ok(ConnState::SessionExpired) => {
                log::warn!("coordination session expired");
                shared.connected.store(false, Ordering::Release);
                session_lost = true;
                if let Some(listener) = lock(&shared.listener).clone() {
                    listener.suspend();
                }
            }
            Ok(ConnState::Disconnected) => {
                shared.connected.store(false, Ordering::Release);
            }
            Ok(ConnState::Connected) => {
                if session_lost {
                    recover(&shared);
                    session_lost = false;
                }
                // Recovery completes before availability flips back.
                shared.connected.store(true, Ordering::Release);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Re-create every outstanding ephemeral node exactly once, then resync
/// the retained listener against its pre-expiry snapshot.
fn recover(shared: &Shared) {
    let entries: Vec<RegisteredEntry> = lock(&shared.entries).values().cloned().collect();
    for entry in entries {
        let result = shared
            .client
            .ensure_path(&entry.dir)
            .and_then(|_| upsert_ephemeral(&*shared.client, &entry.node_path, &[]));
        match result {
            Ok(()) => log::info!("re-registered {} after session loss", entry.url),
            Err(err) => log::warn!("re-registration of {} failed: {err}", entry.url),
        }
    }
    if let Some(listener) = lock(&shared.listener).clone() {
        listener.resync();
    }
}
