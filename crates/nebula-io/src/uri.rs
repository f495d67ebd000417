//! Uniform resource identifiers for streams and files
//!
//! The accepted grammar is
//! `scheme://[host[:port]]/local/path[?key=value&...][#fragment]` or the
//! opaque form `scheme:local-path`. Assign tokens (`home:`) must be resolved
//! before parsing, see [`crate::AssignRegistry`].
//!
//! Components are stored decoded. [`Uri::as_string`] percent-encodes the
//! characters that would otherwise end the path or split a query pair, and
//! [`Uri::parse`] decodes them again.

use crate::{IoError, Result};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Escaped in local paths and fragments.
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Query keys and values also escape the pair separators.
const QUERY: &AsciiSet = &PATH.add(b'&').add(b'=').add(b'+');

/// A parsed URI. The default value is the empty, invalid URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Uri {
    scheme: String,
    host: String,
    port: Option<u16>,
    local_path: String,
    query: Vec<(String, String)>,
    fragment: Option<String>,
}

impl Uri {
    /// Parse a URI string.
    ///
    /// The scheme ends at the first `:`; an authority follows when the next
    /// two characters are `//`. Fails when there is no `:`, or when the
    /// scheme is empty or not made of `[A-Za-z0-9+.-]`. Single-letter
    /// schemes are rejected so that `C:/dir` is never taken for a URI.
    pub fn parse(s: &str) -> Result<Self> {
        let Some((scheme, after)) = s.split_once(':') else {
            return Err(IoError::InvalidUri(format!("missing scheme separator in '{s}'")));
        };
        let (rest, has_authority) = match after.strip_prefix("//") {
            Some(rest) => (rest, true),
            None => (after, false),
        };

        if scheme.len() < 2
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(IoError::InvalidUri(format!("invalid scheme in '{s}'")));
        }

        let (rest, fragment) = match rest.split_once('#') {
            Some((head, frag)) => (head, Some(decode(frag))),
            None => (rest, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((head, q)) => (head, parse_query(q)),
            None => (rest, Vec::new()),
        };

        let (host, port, local_path) = if has_authority {
            let (authority, path) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, ""),
            };
            let (host, port) = split_port(authority, s)?;
            (host, port, decode(path))
        } else {
            (String::new(), None, decode(rest))
        };

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host,
            port,
            local_path,
            query,
            fragment,
        })
    }

    /// Assemble a URI from its parts.
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, local_path: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.into(),
            port: None,
            local_path: local_path.into(),
            query: Vec::new(),
            fragment: None,
        }
    }

    /// Build a `file:` URI from a native filesystem path.
    ///
    /// Relative paths are made absolute against the current directory first.
    pub fn from_native_path(path: &Path) -> Self {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mut local = path.to_string_lossy().replace('\\', "/");
        if !local.starts_with('/') {
            // Drive letter paths become "/C:/..."
            local.insert(0, '/');
        }
        Self::new("file", "", local)
    }

    /// Convert the local path back to a native filesystem path.
    pub fn to_native_path(&self) -> PathBuf {
        let local = self.local_path.as_str();
        if cfg!(windows) {
            let bytes = local.as_bytes();
            if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' {
                return PathBuf::from(&local[1..]);
            }
        }
        PathBuf::from(local)
    }

    /// Returns true for the empty, invalid URI.
    pub fn is_empty(&self) -> bool {
        self.scheme.is_empty()
    }

    /// Scheme, always lower case.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host component, empty when absent.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port component.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Local path component.
    pub fn local_path(&self) -> &str {
        &self.local_path
    }

    /// Query pairs in their original order.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// First value for a query key.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Fragment component.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Append a query pair.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Replace the port.
    #[must_use]
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Replace the local path.
    #[must_use]
    pub fn with_local_path(mut self, local_path: impl Into<String>) -> Self {
        self.local_path = local_path.into();
        self
    }

    /// Append a path segment, inserting a separator when needed.
    #[must_use]
    pub fn append_local_path(&self, segment: &str) -> Self {
        let mut uri = self.clone();
        let segment = segment.trim_start_matches('/');
        if !uri.local_path.is_empty() && !uri.local_path.ends_with('/') {
            uri.local_path.push('/');
        }
        uri.local_path.push_str(segment);
        uri
    }

    /// The URI of the containing directory, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        let trimmed = self.local_path.trim_end_matches('/');
        let idx = trimmed.rfind('/')?;
        let parent = if idx == 0 { "/" } else { &trimmed[..idx] };
        if parent == self.local_path {
            return None;
        }
        let mut uri = Self::new(self.scheme.clone(), self.host.clone(), parent);
        uri.port = self.port;
        Some(uri)
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        let trimmed = self.local_path.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// Render the URI back to a string.
    pub fn as_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut out = String::with_capacity(self.scheme.len() + self.local_path.len() + 8);
        out.push_str(&self.scheme);
        let authority = !self.host.is_empty()
            || self.port.is_some()
            || self.local_path.is_empty()
            || self.local_path.starts_with('/');
        if authority {
            out.push_str("://");
            out.push_str(&self.host);
            if let Some(port) = self.port {
                out.push(':');
                out.push_str(&port.to_string());
            }
        } else {
            out.push(':');
        }
        out.extend(utf8_percent_encode(&self.local_path, PATH));

        for (i, (key, value)) in self.query.iter().enumerate() {
            out.push(if i == 0 { '?' } else { '&' });
            out.extend(utf8_percent_encode(key, QUERY));
            out.push('=');
            out.extend(utf8_percent_encode(value, QUERY));
        }
        if let Some(fragment) = &self.fragment {
            out.push('#');
            out.extend(utf8_percent_encode(fragment, PATH));
        }
        out
    }
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn parse_query(q: &str) -> Vec<(String, String)> {
    q.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(pair), String::new()),
        })
        .collect()
}

fn split_port(authority: &str, original: &str) -> Result<(String, Option<u16>)> {
    match authority.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| IoError::InvalidUri(format!("invalid port in '{original}'")))?;
            Ok((host.to_string(), Some(port)))
        }
        Some((host, _)) => Ok((host.to_string(), None)),
        None => Ok((authority.to_string(), None)),
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl FromStr for Uri {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
