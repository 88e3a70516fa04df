//! Limiter key generation.
//!
//! A [`Scope`] names the dimensions a quota is counted over. Keys are built
//! from a fixed tag per scope followed by escaped components, so keys of
//! different scopes can never collide and no component can forge a
//! separator.

use std::borrow::Cow;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Components longer than this are replaced by their SHA-256 digest.
const MAX_COMPONENT_LEN: usize = 128;

/// The identity dimensions a limiter counts requests over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Per caller address.
    Ip,
    /// Per authenticated user; anonymous callers are counted per address.
    User,
    /// Per endpoint and method, shared by all callers.
    Endpoint,
    /// Per user, endpoint and method; anonymous callers are counted per
    /// address, endpoint and method.
    UserEndpoint,
}

/// The request attributes a key may be derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyParts<'a> {
    /// Apparent client address. See [`crate::http::client_ip`].
    pub client_ip: &'a str,
    /// Authenticated user, if any. An empty id counts as anonymous.
    pub user_id: Option<&'a str>,
    /// Logical endpoint name.
    pub endpoint: &'a str,
    /// HTTP method.
    pub method: &'a str,
}

impl Scope {
    /// Short name used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Ip => "ip",
            Scope::User => "user",
            Scope::Endpoint => "endpoint",
            Scope::UserEndpoint => "user_endpoint",
        }
    }

    /// Build the scope key for a request.
    ///
    /// Deterministic: equal parts always produce equal keys. A user-scoped
    /// key for an anonymous caller is exactly the IP-scoped key, so missing
    /// identity never leaves a caller unlimited.
    pub fn key(&self, parts: &KeyParts<'_>) -> String {
        let user = parts.user_id.filter(|id| !id.is_empty());
        let method = parts.method.to_ascii_uppercase();

        match (self, user) {
            (Scope::Ip, _) | (Scope::User, None) => {
                format!("ip:{}", component(parts.client_ip))
            }
            (Scope::User, Some(user)) => format!("user:{}", component(user)),
            (Scope::Endpoint, _) => format!(
                "endpoint:{}:{}",
                component(&method),
                component(parts.endpoint)
            ),
            (Scope::UserEndpoint, Some(user)) => format!(
                "user_endpoint:{}:{}:{}",
                component(user),
                component(&method),
                component(parts.endpoint)
            ),
            (Scope::UserEndpoint, None) => format!(
                "ip_endpoint:{}:{}:{}",
                component(parts.client_ip),
                component(&method),
                component(parts.endpoint)
            ),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escape one key component.
///
/// `:` and `%` and anything outside printable ASCII are percent-encoded.
/// Oversized values are hashed; the digest form contains a bare `:` that no
/// escaped component can produce.
fn component(raw: &str) -> Cow<'_, str> {
    if raw.len() > MAX_COMPONENT_LEN {
        return Cow::Owned(format!("sha256:{}", hex::encode(Sha256::digest(raw.as_bytes()))));
    }

    if raw.bytes().all(is_plain) {
        return Cow::Borrowed(raw);
    }

    let mut escaped = String::with_capacity(raw.len() + 8);
    for byte in raw.bytes() {
        if is_plain(byte) {
            escaped.push(byte as char);
        } else {
            let _ = write!(escaped, "%{byte:02X}");
        }
    }
    Cow::Owned(escaped)
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_graphic() && byte != b':' && byte != b'%'
}
