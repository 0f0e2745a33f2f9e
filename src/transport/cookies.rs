//! Account credentials and the cookie jar sent with every request.
//!
//! Cookie values are secrets: `Debug` output and logs only ever show
//! [`Credential::redacted`] or cookie names.

use crate::constants::{COOKIE_PRIMARY, COOKIE_SECONDARY};
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

const REDACTED_PREFIX_CHARS: usize = 6;

/// One account's credential: the primary session cookie plus an optional
/// secondary (rotating) token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub primary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

impl Credential {
    pub fn new(primary: impl Into<String>, secondary: Option<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.filter(|s| !s.is_empty()),
        }
    }

    /// First characters of the primary token followed by an ellipsis.
    pub fn redacted(&self) -> String {
        let head: String = self.primary.chars().take(REDACTED_PREFIX_CHARS).collect();
        format!("{}…", head)
    }

    /// Stable, non-reversible identifier of the primary token (hex SHA-256 prefix).
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.primary.as_bytes());
        digest
            .iter()
            .take(8)
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("primary", &self.redacted())
            .field("secondary", &self.secondary.as_ref().map(|_| "…"))
            .finish()
    }
}

/// Name → value cookie jar.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CookieSet {
    cookies: BTreeMap<String, String>,
}

impl CookieSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_credential(credential: &Credential) -> Self {
        let mut set = Self::new();
        set.insert(COOKIE_PRIMARY, credential.primary.clone());
        if let Some(secondary) = &credential.secondary {
            set.insert(COOKIE_SECONDARY, secondary.clone());
        }
        set
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.cookies.remove(name)
    }

    /// Copy every cookie of `other` that is not set here yet.
    pub fn fill_from(&mut self, other: &CookieSet) {
        for (k, v) in &other.cookies {
            self.cookies.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cookies.keys().map(String::as_str)
    }

    /// Value for the `Cookie` request header.
    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Record every cookie from the response's `Set-Cookie` headers.
    /// Returns the number of cookies stored.
    pub fn absorb_set_cookie(&mut self, headers: &HeaderMap) -> usize {
        let mut stored = 0;
        for value in headers.get_all(SET_COOKIE) {
            let Ok(line) = value.to_str() else {
                continue;
            };
            if let Some((name, val)) = parse_set_cookie(line) {
                self.insert(name, val);
                stored += 1;
            }
        }
        stored
    }
}

impl fmt::Debug for CookieSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// `name=value` pair of one `Set-Cookie` header line; attributes are ignored.
pub fn parse_set_cookie(line: &str) -> Option<(String, String)> {
    let pair = line.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().trim_matches('"').to_string()))
}

/// Value of `name` among a response's `Set-Cookie` headers.
pub fn find_set_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(parse_set_cookie)
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
}
