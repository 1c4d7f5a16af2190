//! Service-registry client over a ZooKeeper-style coordination tree.
//!
//! A provider process advertises itself by creating an ephemeral node
//! under the service's `providers` path; a consumer discovers providers by
//! listing that path and subscribing to a live stream of add/delete events
//! as they come and go. Ephemeral nodes vanish with the creating session,
//! so registrations are re-established automatically after session expiry.
//!
//! ```no_run
//! use std::sync::Arc;
//! use zkregistry::{MemoryClient, Registry, RegistryEndpoint, ServiceUrl};
//!
//! let endpoint = RegistryEndpoint::parse("registry://127.0.0.1:2181?role=1")?;
//! let client = Arc::new(MemoryClient::new());
//! let registry = Registry::new(endpoint, client);
//!
//! let url = ServiceUrl::new("dubbo", "10.0.0.5", 20000, "com.example.UserProvider")
//!     .with_param("methods", "GetUser,AddUser");
//! registry.register(&url)?;
//!
//! let listener = registry.subscribe(&url)?;
//! let event = listener.next()?; // Add event for the provider above
//! # drop(event);
//! # Ok::<(), zkregistry::Error>(())
//! ```

pub mod client;
pub mod codec;
pub mod diff;
pub mod error;
pub mod listener;
pub mod memory;
pub mod paths;
pub mod registry;
pub mod url;

pub use client::{ConnState, CoordClient, WatchEvent};
pub use error::{Error, Result};
pub use listener::{Action, ServiceEvent, ServiceListener};
pub use memory::MemoryClient;
pub use paths::{Category, DEFAULT_ROOT};
pub use registry::Registry;
pub use url::{RegistryEndpoint, Role, ServiceUrl};
