//! Ketama Key Locator
//!
//! Consistent hashing over a set of endpoints. Every endpoint contributes
//! 160 points to a `u32` ring (40 MD5 digests of `"{address}-{i}"`, four
//! little-endian words each). A key is owned by the first point at or after
//! the key's hash, wrapping around to the start of the ring.
//!
//! ```text
//!        0 ─────────── a ─── b ──── a ───── c ─── b ────── u32::MAX
//!                   ▲                  ▲
//!        hash(key) ─┘                  └─ hash(other) -> c
//! ```
//!
//! Removing an endpoint deletes only its own points, so only the keys it
//! owned move; every other key keeps its owner.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Digests per endpoint. Each digest yields four ring points.
const DIGESTS_PER_ENDPOINT: usize = 40;

/// Network address of one memcached server (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(String);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EndpointError {
    #[error("endpoint '{0}' must be host:port")]
    MissingPort(String),

    #[error("endpoint '{0}' has an invalid port")]
    InvalidPort(String),

    #[error("endpoint '{0}' has an empty host")]
    EmptyHost(String),
}

impl Endpoint {
    pub fn address(&self) -> &str {
        &self.0
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(EndpointError::EmptyHost(s.to_string()));
        }
        port.parse::<u16>()
            .map_err(|_| EndpointError::InvalidPort(s.to_string()))?;
        Ok(Endpoint(s.to_string()))
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        Endpoint(addr.to_string())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashes a key onto the ring.
pub fn hash_key(key: &[u8]) -> u32 {
    let digest = md5::compute(key);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// An immutable ring built from one membership snapshot.
///
/// The server pool rebuilds a new locator whenever a node dies or comes back,
/// so lookups never need to lock.
#[derive(Debug, Clone, Default)]
pub struct KetamaLocator {
    /// (point, index into `endpoints`), sorted by point.
    ring: Vec<(u32, usize)>,
    endpoints: Vec<Endpoint>,
}

impl KetamaLocator {
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        let mut seen = HashSet::new();
        let mut endpoints: Vec<Endpoint> = endpoints
            .into_iter()
            .filter(|e| seen.insert(e.clone()))
            .collect();
        endpoints.sort();

        let mut ring = Vec::with_capacity(endpoints.len() * DIGESTS_PER_ENDPOINT * 4);
        for (index, endpoint) in endpoints.iter().enumerate() {
            for i in 0..DIGESTS_PER_ENDPOINT {
                let digest = md5::compute(format!("{}-{}", endpoint, i));
                for word in digest.0.chunks_exact(4) {
                    let point = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                    ring.push((point, index));
                }
            }
        }
        // Ties resolve by endpoint order, which is sorted, so the ring does not
        // depend on the order endpoints were supplied in.
        ring.sort_unstable();

        Self { ring, endpoints }
    }

    /// Returns the endpoint owning `key`, or `None` if the ring is empty.
    pub fn locate(&self, key: &str) -> Option<&Endpoint> {
        if self.ring.is_empty() {
            return None;
        }
        let hash = hash_key(key.as_bytes());
        let position = self.ring.partition_point(|(point, _)| *point < hash);
        let (_, index) = self.ring[position % self.ring.len()];
        self.endpoints.get(index)
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
