use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{Error, Result};

/// Which router tier a prefix host lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    /// A concrete host name or address, matched exactly.
    Exact,
    /// `+`: any host, tried after exact hosts.
    Strong,
    /// `*`: any host, tried last.
    Weak,
}

/// A registered `scheme://host[:port]/path/` pattern.
///
/// Two prefixes are equal when their original strings are equal.
#[derive(Debug, Clone)]
pub struct ListenerPrefix {
    original: String,
    secure: bool,
    host: String,
    port: u16,
    path: String,
}

impl ListenerPrefix {
    /// Parse and validate a prefix.
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |why: &str| Error::InvalidPrefix(format!("{}: {}", uri, why));

        let lower = uri.to_ascii_lowercase();
        let (secure, rest) = if lower.starts_with("http://") {
            (false, &uri["http://".len()..])
        } else if lower.starts_with("https://") {
            (true, &uri["https://".len()..])
        } else {
            return Err(invalid("scheme must be http or https"));
        };

        let (authority, path) = match rest.find('/') {
            Some(slash) => rest.split_at(slash),
            None => return Err(invalid("missing path")),
        };

        let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
            let end = v6.find(']').ok_or_else(|| invalid("unterminated IPv6 host"))?;
            let host = &authority[..end + 2];
            let port = match &v6[end + 1..] {
                "" => None,
                port => Some(
                    port.strip_prefix(':')
                        .ok_or_else(|| invalid("junk after IPv6 host"))?,
                ),
            };
            (host, port)
        } else {
            match authority.rfind(':') {
                Some(colon) => (&authority[..colon], Some(&authority[colon + 1..])),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            None if secure => 443,
            None => 80,
        };

        if path.contains('%') {
            return Err(invalid("path may not contain '%'"));
        }
        if path.contains("//") {
            return Err(invalid("path may not contain '//'"));
        }
        if !path.ends_with('/') {
            return Err(invalid("path must end with '/'"));
        }

        Ok(Self {
            original: uri.to_string(),
            secure,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// The string the prefix was parsed from.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Whether the scheme is `https`.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Host as written, including `*`, `+` or IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, defaulted from the scheme when absent.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path, always ending in `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Router tier for the host.
    pub fn host_kind(&self) -> HostKind {
        match self.host.as_str() {
            "+" => HostKind::Strong,
            "*" => HostKind::Weak,
            _ => HostKind::Exact,
        }
    }
}

impl PartialEq for ListenerPrefix {
    fn eq(&self, other: &Self) -> bool {
        self.original == other.original
    }
}

impl Eq for ListenerPrefix {}

impl Hash for ListenerPrefix {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.original.hash(state);
    }
}

impl fmt::Display for ListenerPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}
