//! Service-descriptor URL value type and registry-endpoint parsing.
//!
//! A [`ServiceUrl`] identifies one provider or consumer of a service:
//! scheme, address, interface identifier, and a parameter bag. Parameters
//! are kept in a sorted map so that re-encoding the same URL always yields
//! byte-identical output.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::codec;
use crate::error::{Error, Result};

/// The role a process plays against the registry.
///
/// The wire value of the `role` parameter is `0` for consumers and `1`
/// for providers. These integers are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Consumer,
    Provider,
}

impl Role {
    /// Parameter key carrying the role on `registry://` and service URLs.
    pub const KEY: &'static str = "role";

    pub fn from_param(value: &str) -> Result<Self> {
        match value {
            "0" => Ok(Role::Consumer),
            "1" => Ok(Role::Provider),
            other => Err(Error::Registration(format!("unknown role: {other}"))),
        }
    }

    pub fn as_param(self) -> &'static str {
        match self {
            Role::Consumer => "0",
            Role::Provider => "1",
        }
    }
}

/// Immutable-by-convention service descriptor.
///
/// Mutating a published URL via [`set_param`](Self::set_param) is a logical
/// change: the result encodes differently and requires re-registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceUrl {
    scheme: String,
    host: String,
    port: u16,
    service: String,
    params: BTreeMap<String, String>,
}

impl ServiceUrl {
    /// Build a URL for `service` (the interface identifier, e.g.
    /// `com.ikurento.user.UserProvider`). A leading slash is stripped.
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        service: impl Into<String>,
    ) -> Self {
        let service: String = service.into();
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            service: service.trim_start_matches('/').to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Interface identifier without a leading slash.
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    /// Builder-style parameter insertion.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_param(key, value);
        self
    }

    pub fn group(&self) -> Option<&str> {
        self.param("group")
    }

    pub fn version(&self) -> Option<&str> {
        self.param("version")
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&codec::canonical(self))
    }
}

impl FromStr for ServiceUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        codec::parse_canonical(s)
    }
}

/// One coordination-service endpoint a registry binds to, parsed from a
/// `registry://host:port?role={0|1}` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEndpoint {
    pub host: String,
    pub port: u16,
    pub role: Role,
    pub params: BTreeMap<String, String>,
}

impl RegistryEndpoint {
    pub fn parse(s: &str) -> Result<Self> {
        let url: ServiceUrl = s.parse()?;
        if url.scheme() != "registry" {
            return Err(Error::Registration(format!(
                "expected registry:// URL, got scheme {:?}",
                url.scheme()
            )));
        }
        let role = url
            .param(Role::KEY)
            .ok_or_else(|| Error::Registration("registry URL missing role parameter".into()))?;
        let role = Role::from_param(role)?;
        Ok(Self {
            host: url.host().to_string(),
            port: url.port(),
            role,
            params: url.params.clone(),
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
