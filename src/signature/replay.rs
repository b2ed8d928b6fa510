//! Replay bounds for signed requests.
//!
//! [`ReplayWindow`] rejects timestamps too far from the verifier clock.
//! Within the window a captured request can be replayed verbatim unless a
//! [`NonceCache`] is installed, which remembers each accepted nonce until
//! its request timestamp leaves the window.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::warn;

use super::SignatureError;

/// Default tolerance, in seconds, either side of the verifier clock.
pub const DEFAULT_WINDOW_SECS: u64 = 600;

/// Symmetric timestamp tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayWindow {
    window_secs: i64,
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECS)
    }
}

impl ReplayWindow {
    /// A window of `window_secs` either side of now.
    #[must_use]
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs: i64::try_from(window_secs).unwrap_or(i64::MAX),
        }
    }

    /// Window size in seconds.
    #[must_use]
    pub fn secs(&self) -> i64 {
        self.window_secs
    }

    /// Parse `timestamp` and check it against `now`.
    ///
    /// A skew of exactly the window size is accepted. Returns the parsed
    /// timestamp.
    pub fn check(&self, timestamp: &str, now: i64) -> Result<i64, SignatureError> {
        let ts: i64 = timestamp
            .parse()
            .map_err(|e: std::num::ParseIntError| SignatureError::MalformedTimestamp(e.to_string()))?;
        let skew = now.saturating_sub(ts);
        if skew < -self.window_secs || skew > self.window_secs {
            return Err(SignatureError::TimestampOutOfWindow { skew });
        }
        Ok(ts)
    }
}

/// Bounded set of recently accepted nonces, keyed per caller.
///
/// An entry lives until `timestamp + window`, after which the timestamp
/// check alone rejects the request. When the cache is full and nothing has
/// expired, new requests are refused rather than admitted unchecked.
#[derive(Debug)]
pub struct NonceCache {
    entries: DashMap<(String, String), i64>,
    capacity: usize,
    window: ReplayWindow,
}

impl NonceCache {
    /// Create a cache holding at most `capacity` nonces.
    #[must_use]
    pub fn new(capacity: usize, window: ReplayWindow) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            window,
        }
    }

    /// Record `nonce` sent by `caller` for a request stamped `timestamp`.
    ///
    /// Fails with [`SignatureError::MissingNonce`] for an empty nonce,
    /// [`SignatureError::NonceReused`] when the caller's nonce is still
    /// live, and [`SignatureError::NonceCacheFull`] when there is no room.
    pub fn check_and_insert(
        &self,
        caller: &str,
        nonce: &str,
        timestamp: i64,
        now: i64,
    ) -> Result<(), SignatureError> {
        if nonce.is_empty() {
            return Err(SignatureError::MissingNonce);
        }

        if self.entries.len() >= self.capacity {
            self.purge_expired(now);
            if self.entries.len() >= self.capacity {
                warn!(capacity = self.capacity, "Nonce cache full, refusing request");
                return Err(SignatureError::NonceCacheFull);
            }
        }

        let expires_at = timestamp.saturating_add(self.window.secs());
        match self.entries.entry((caller.to_owned(), nonce.to_owned())) {
            Entry::Occupied(mut entry) => {
                if *entry.get() >= now {
                    return Err(SignatureError::NonceReused);
                }
                entry.insert(expires_at);
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
            }
        }
        Ok(())
    }

    /// Drop entries whose request can no longer pass the window check.
    pub fn purge_expired(&self, now: i64) {
        self.entries.retain(|_, expires_at| *expires_at >= now);
    }

    /// Live entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no nonce is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
