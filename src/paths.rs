//! Coordination-tree layout for registered services.
//!
//! ```text
//! {root}/
//! └── {group?}/{interface}/{version?}/
//!     ├── providers/{encoded-url}      ← ephemeral, one per provider
//!     ├── consumers/{encoded-url}      ← ephemeral, one per consumer
//!     ├── configurators/...
//!     └── routers/...
//! ```
//!
//! Group and version segments appear only when the URL carries the
//! corresponding parameter; the common case is
//! `/dubbo/com.ikurento.user.UserProvider/providers`.

use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::url::{Role, ServiceUrl};

/// Default tree root.
pub const DEFAULT_ROOT: &str = "/dubbo";

/// Sub-path classifying entries under a service. Closed set: an unknown
/// category is unrepresentable rather than a runtime condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Providers,
    Consumers,
    Configurators,
    Routers,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Providers => "providers",
            Category::Consumers => "consumers",
            Category::Configurators => "configurators",
            Category::Routers => "routers",
        }
    }
}

impl From<Role> for Category {
    fn from(role: Role) -> Self {
        match role {
            Role::Provider => Category::Providers,
            Role::Consumer => Category::Consumers,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a single path segment cannot contain, `/` included.
const SEGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'%').add(b'/').add(b'?');

/// Directory that holds the nodes of `category` for the service `url`
/// describes: `{root}/{group?}/{interface}/{version?}/{category}`.
///
/// Deterministic, no I/O.
pub fn service_dir(root: &str, url: &ServiceUrl, category: Category) -> String {
    let mut path = String::from(root.trim_end_matches('/'));
    if let Some(group) = url.group() {
        push_segment(&mut path, group);
    }
    push_segment(&mut path, url.service());
    if let Some(version) = url.version() {
        push_segment(&mut path, version);
    }
    push_segment(&mut path, category.as_str());
    path
}

fn push_segment(path: &mut String, segment: &str) {
    path.push('/');
    path.push_str(&utf8_percent_encode(segment, SEGMENT).to_string());
}
