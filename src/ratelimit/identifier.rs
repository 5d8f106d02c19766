//! Identifier validation and derivation from request context.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use http::{HeaderMap, HeaderName};

use crate::error::{QuotaError, Result};

/// Longest identifier accepted, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 512;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// The key under which a quota is tracked.
///
/// Opaque to the limiter: an IP address, user id, API key, or any composite
/// of these. Must be non-empty and free of control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Validate and wrap an identifier.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();

        if value.trim().is_empty() {
            return Err(QuotaError::InvalidIdentifier(
                "identifier must not be empty".to_string(),
            ));
        }
        if value.len() > MAX_IDENTIFIER_LEN {
            return Err(QuotaError::InvalidIdentifier(format!(
                "identifier is {} bytes, maximum is {}",
                value.len(),
                MAX_IDENTIFIER_LEN
            )));
        }
        if value.chars().any(char::is_control) {
            return Err(QuotaError::InvalidIdentifier(
                "identifier must not contain control characters".to_string(),
            ));
        }

        Ok(Self(value))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The store key for this identifier under `prefix`.
    pub fn store_key(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Identifier {
    type Error = QuotaError;

    fn try_from(value: &str) -> Result<Self> {
        Identifier::new(value)
    }
}

impl TryFrom<String> for Identifier {
    type Error = QuotaError;

    fn try_from(value: String) -> Result<Self> {
        Identifier::new(value)
    }
}

/// What an admission point knows about an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Address of the directly connected peer, if known
    pub peer_addr: Option<SocketAddr>,
    /// Request headers
    pub headers: HeaderMap,
}

impl RequestContext {
    /// Create a context from a peer address and headers.
    pub fn new(peer_addr: Option<SocketAddr>, headers: HeaderMap) -> Self {
        Self { peer_addr, headers }
    }

    /// Create a context with only a peer address.
    pub fn from_peer(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr: Some(peer_addr),
            headers: HeaderMap::new(),
        }
    }

    fn header_str(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// The client address, preferring proxy headers over the peer address.
    ///
    /// Order: left-most `X-Forwarded-For` entry, then `X-Real-IP`, then the
    /// direct peer IP.
    pub fn client_address(&self) -> Option<String> {
        if let Some(xff) = self.header_str(FORWARDED_FOR) {
            if let Some(first) = xff.split(',').map(str::trim).find(|s| !s.is_empty()) {
                return Some(first.to_string());
            }
        }

        if let Some(real_ip) = self.header_str(REAL_IP) {
            return Some(real_ip.to_string());
        }

        self.peer_addr.map(|addr| addr.ip().to_string())
    }
}

/// Custom identifier derivation function.
pub type IdentifierFn = Arc<dyn Fn(&RequestContext) -> Result<Identifier> + Send + Sync>;

/// How the limiter derives an [`Identifier`] from a [`RequestContext`].
#[derive(Clone, Default)]
pub enum IdentifierStrategy {
    /// Client network address (proxy-aware)
    #[default]
    ClientAddress,
    /// Value of a named header, falling back to the client address
    Header(HeaderName),
    /// Caller-supplied pure function
    Custom(IdentifierFn),
}

impl IdentifierStrategy {
    /// Build a custom strategy from a closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> Result<Identifier> + Send + Sync + 'static,
    {
        IdentifierStrategy::Custom(Arc::new(f))
    }

    /// Resolve the identifier for a request.
    pub fn resolve(&self, ctx: &RequestContext) -> Result<Identifier> {
        match self {
            IdentifierStrategy::ClientAddress => Self::from_client_address(ctx),
            IdentifierStrategy::Header(name) => match ctx.header_str(name.as_str()) {
                Some(value) => Identifier::new(value),
                None => Self::from_client_address(ctx),
            },
            IdentifierStrategy::Custom(f) => f(ctx),
        }
    }

    fn from_client_address(ctx: &RequestContext) -> Result<Identifier> {
        let addr = ctx.client_address().ok_or_else(|| {
            QuotaError::InvalidIdentifier("no client address in request context".to_string())
        })?;
        Identifier::new(addr)
    }
}

impl fmt::Debug for IdentifierStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierStrategy::ClientAddress => f.write_str("ClientAddress"),
            IdentifierStrategy::Header(name) => f.debug_tuple("Header").field(name).finish(),
            IdentifierStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
