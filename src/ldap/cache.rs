//! Worker-local connection cache.
//!
//! Each worker owns one cache, so the map needs no locking. Entries are
//! keyed on everything that makes two connections interchangeable: the
//! anonymity of the bind, the server list, and the open options. The idle
//! timeout deliberately stays out of the key; it governs eviction, not
//! identity.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::Result;
use crate::ldap::connection::LdapConnection;

/// Identity of a cacheable connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    anonymous: bool,
    servers: Vec<String>,
    options: OpenOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OpenOptions {
    port: u16,
    use_ssl: bool,
    use_starttls: bool,
    verify_peer: bool,
    timeout: Option<u64>,
}

impl ConnectionKey {
    /// Derives the key for a bind of the given anonymity under `cfg`.
    pub fn new(cfg: &Config, anonymous: bool) -> Self {
        Self {
            anonymous,
            servers: cfg.servers.clone(),
            options: OpenOptions {
                port: cfg.port,
                use_ssl: cfg.use_ssl,
                use_starttls: cfg.use_starttls,
                verify_peer: cfg.ssl_options.verify_peer,
                timeout: cfg.timeout,
            },
        }
    }
}

struct CacheEntry {
    conn: LdapConnection,
    expires_at: Option<Instant>,
}

/// Cache of live connections for one worker.
pub struct ConnectionCache {
    entries: HashMap<ConnectionKey, CacheEntry>,
    idle_timeout: Option<Duration>,
}

impl ConnectionCache {
    /// Creates an empty cache; `idle_timeout = None` disables eviction.
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            idle_timeout,
        }
    }

    /// Returns the cached connection for `key`, opening one if there is
    /// none. Reuse refreshes the idle deadline; a cached connection whose
    /// transport is already closed is dropped and replaced.
    pub async fn acquire(
        &mut self,
        key: &ConnectionKey,
        cfg: &Config,
    ) -> Result<&mut LdapConnection> {
        let state = match self.entries.get_mut(key) {
            Some(entry) => {
                if entry.conn.is_closed() {
                    CachedState::Stale
                } else {
                    entry.expires_at = self.idle_timeout.map(|idle| Instant::now() + idle);
                    CachedState::Live
                }
            }
            None => CachedState::Absent,
        };

        match state {
            CachedState::Live => {}
            CachedState::Stale => {
                debug!("cached LDAP connection already closed by peer, reopening");
                self.entries.remove(key);
                self.open_into(key, cfg).await?;
            }
            CachedState::Absent => {
                self.open_into(key, cfg).await?;
            }
        }

        match self.entries.get_mut(key) {
            Some(entry) => Ok(&mut entry.conn),
            None => unreachable!("entry inserted above"),
        }
    }

    async fn open_into(&mut self, key: &ConnectionKey, cfg: &Config) -> Result<()> {
        let conn = LdapConnection::open(cfg).await?;
        self.entries.insert(
            key.clone(),
            CacheEntry {
                conn,
                expires_at: self.idle_timeout.map(|idle| Instant::now() + idle),
            },
        );
        Ok(())
    }

    /// Tears an entry down without a graceful unbind. Used after an
    /// operation observed a closed transport, where an unbind would itself
    /// fail.
    pub fn purge(&mut self, key: &ConnectionKey) {
        if self.entries.remove(key).is_some() {
            warn!("purged LDAP connection after transport fault");
        }
    }

    /// The earliest idle deadline across all entries.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter_map(|entry| entry.expires_at)
            .min()
    }

    /// Gracefully closes and removes every entry whose idle deadline has
    /// passed.
    pub async fn evict_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<ConnectionKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at.is_some_and(|at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(mut entry) = self.entries.remove(&key) {
                debug!("evicting idle LDAP connection");
                let _ = entry.conn.unbind().await;
            }
        }
    }

    /// Gracefully closes every cached connection.
    pub async fn close_all(&mut self) {
        for (_, mut entry) in self.entries.drain() {
            let _ = entry.conn.unbind().await;
        }
    }

    /// Number of live entries; one physical connection per key at most.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no connections.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

enum CachedState {
    Live,
    Stale,
    Absent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_config;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_key_distinguishes_anonymity() {
        let cfg = test_config();
        assert_ne!(ConnectionKey::new(&cfg, true), ConnectionKey::new(&cfg, false));
        assert_eq!(ConnectionKey::new(&cfg, true), ConnectionKey::new(&cfg, true));
    }

    #[test]
    fn test_key_ignores_idle_timeout() {
        let mut a = test_config();
        let mut b = test_config();
        a.idle_timeout = Some(30);
        b.idle_timeout = None;
        assert_eq!(ConnectionKey::new(&a, false), ConnectionKey::new(&b, false));
    }

    #[test]
    fn test_key_tracks_open_options() {
        let plain = test_config();
        let mut tls = test_config();
        tls.use_starttls = true;
        assert_ne!(
            ConnectionKey::new(&plain, false),
            ConnectionKey::new(&tls, false)
        );

        let mut deadline = test_config();
        deadline.timeout = Some(5);
        assert_ne!(
            ConnectionKey::new(&plain, false),
            ConnectionKey::new(&deadline, false)
        );
    }

    #[test]
    fn test_empty_cache_has_no_expiry() {
        let cache = ConnectionCache::new(Some(Duration::from_secs(30)));
        assert!(cache.next_expiry().is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
    }
}
