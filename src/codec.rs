//! Node-name codec: a [`ServiceUrl`] to and from the percent-escaped
//! string stored as a coordination-tree node name.
//!
//! Encoding is layered. The canonical URL string escapes each path segment
//! and each parameter key/value individually, so values may contain `/`,
//! `&`, `%` or `=` without breaking the structure. The node name then
//! escapes the canonical string as a whole, covering every reserved
//! character and the percent sign itself. Both layers emit uppercase hex,
//! and parameters are written in sorted order, so equal URLs always encode
//! byte-identically.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::{Error, Result};
use crate::url::ServiceUrl;

/// Escapes for a parameter key or value inside the canonical string.
const QUERY: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'=')
    .add(b'?');

/// Escapes for the interface path inside the canonical string.
const PATH: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'%').add(b'?');

/// Escapes for the node name as a whole: the reserved set
/// `: / ? # [ ] @ ! $ & ' ( ) * + , ; =` plus `%` and space.
const NODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'!')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'=')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b']');

/// Encode a URL as a coordination-tree node name.
pub fn encode(url: &ServiceUrl) -> String {
    utf8_percent_encode(&canonical(url), NODE).to_string()
}

/// Decode a node name back into a URL. Exact inverse of [`encode`].
///
/// # Errors
///
/// `Error::Decode` on malformed percent escapes, missing scheme, missing
/// host or an unparseable port.
pub fn decode(name: &str) -> Result<ServiceUrl> {
    parse_canonical(&unescape(name)?)
}

/// Canonical string form: `scheme://host:port/path?k1=v1&k2=v2` with
/// parameters in sorted order.
pub(crate) fn canonical(url: &ServiceUrl) -> String {
    let mut out = format!("{}://{}:{}", url.scheme(), url.host(), url.port());
    if !url.service().is_empty() {
        out.push('/');
        out.push_str(&utf8_percent_encode(url.service(), PATH).to_string());
    }
    let mut first = true;
    for (key, value) in url.params() {
        out.push(if first { '?' } else { '&' });
        first = false;
        out.push_str(&utf8_percent_encode(key, QUERY).to_string());
        out.push('=');
        out.push_str(&utf8_percent_encode(value, QUERY).to_string());
    }
    out
}

pub(crate) fn parse_canonical(s: &str) -> Result<ServiceUrl> {
    let (scheme, rest) = s
        .split_once("://")
        .ok_or_else(|| Error::Decode(format!("missing scheme: {s}")))?;
    if scheme.is_empty() {
        return Err(Error::Decode(format!("missing scheme: {s}")));
    }
    let end = rest.find(['/', '?']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(end);
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| Error::Decode(format!("missing port: {s}")))?;
    if host.is_empty() {
        return Err(Error::Decode(format!("missing host: {s}")));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| Error::Decode(format!("invalid port: {port}")))?;

    let (path, query) = match tail.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (tail, None),
    };
    let service = unescape(path.trim_start_matches('/'))?;
    let mut url = ServiceUrl::new(scheme, host, port, service);
    if let Some(query) = query {
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            url.set_param(unescape(key)?, unescape(value)?);
        }
    }
    Ok(url)
}

/// Strict percent-unescape: `%` must be followed by exactly two hex digits.
fn unescape(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(Error::Decode(format!("truncated percent escape in {s:?}")));
            }
            let hi = hex_value(bytes[i + 1])
                .ok_or_else(|| Error::Decode(format!("invalid percent escape in {s:?}")))?;
            let lo = hex_value(bytes[i + 2])
                .ok_or_else(|| Error::Decode(format!("invalid percent escape in {s:?}")))?;
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Error::Decode(format!("invalid utf-8 after unescape of {s:?}")))
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
