//! Fallback destination used by the single connection retry
//!
//! Accepted forms are `host:port` and `host=port`. The value is parsed only
//! when a retry actually fires; missing or unparseable parts fall back to the
//! original destination.

use std::fmt;

use super::protocol::{Host, Target};

const DELIMITERS: &[char] = &[':', '='];

/// Operator-supplied alternate destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackTarget {
    raw: String,
}

impl FallbackTarget {
    /// Wrap a raw value; blank input means "no fallback"
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self {
            raw: trimmed.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Strict check used for operator configuration: both halves must be present
    /// and the port must be a valid u16.
    pub fn validate(&self) -> Result<(), String> {
        let (host, port) = self.split();
        if host.is_empty() {
            return Err(format!("fallback '{}' has no host", self.raw));
        }
        match port {
            Some(p) if p.parse::<u16>().is_ok() => Ok(()),
            Some(p) => Err(format!("fallback '{}' has invalid port '{}'", self.raw, p)),
            None => Err(format!(
                "fallback '{}' must be host:port or host=port",
                self.raw
            )),
        }
    }

    /// Resolve against the session's original destination
    pub fn resolve(&self, original: &Target) -> Target {
        let (host, port) = self.split();

        let host = if host.is_empty() {
            original.host.clone()
        } else {
            Host::parse(host)
        };
        let port = port
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(original.port);

        Target::new(host, port)
    }

    /// Host before the first delimiter, port up to the next one. A bracketed
    /// IPv6 literal is taken whole as the host.
    fn split(&self) -> (&str, Option<&str>) {
        let raw = self.raw.as_str();
        if raw.starts_with('[') {
            if let Some(end) = raw.find(']') {
                let port = raw[end + 1..]
                    .strip_prefix(DELIMITERS)
                    .and_then(|rest| rest.split(DELIMITERS).next())
                    .filter(|p| !p.is_empty());
                return (&raw[..=end], port);
            }
        }
        let mut parts = raw.split(DELIMITERS);
        let host = parts.next().unwrap_or("");
        let port = parts.next().filter(|p| !p.is_empty());
        (host, port)
    }
}

impl fmt::Display for FallbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Pick the destination for a retry: the fallback if configured, else the original
pub fn retry_target(fallback: Option<&FallbackTarget>, original: &Target) -> Target {
    match fallback {
        Some(fallback) => fallback.resolve(original),
        None => original.clone(),
    }
}
