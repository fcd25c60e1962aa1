//! A single LDAP connection.
//!
//! Opens the configured servers in order until one accepts, optionally
//! negotiating TLS or StartTLS, and wraps bind and search with the logging
//! and result classification the rest of the backend relies on.

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, SearchEntry};
use tracing::{debug, error, instrument, warn};

use crate::config::{Config, LogMode};
use crate::errors::{Error, Result};
use crate::ldap::{Directory, LdapEntry, SearchScope};
use crate::scrub;

/// LDAP result code for invalidCredentials.
const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code for noSuchObject.
const RC_NO_SUCH_OBJECT: u32 = 32;

/// A live connection to one of the configured directory servers.
pub struct LdapConnection {
    ldap: Ldap,
    log: LogMode,
    op_timeout: Option<std::time::Duration>,
}

impl LdapConnection {
    /// Opens a connection, trying the configured servers in order.
    #[instrument(skip(cfg), fields(servers = cfg.servers.len()))]
    pub async fn open(cfg: &Config) -> Result<Self> {
        if cfg.servers.is_empty() {
            return Err(Error::NoServersDefined);
        }

        for url in cfg.server_urls() {
            match Self::try_connect(cfg, &url).await {
                Ok(ldap) => {
                    if cfg.log.chatty() {
                        debug!(%url, "LDAP connection established");
                    }
                    return Ok(Self {
                        ldap,
                        log: cfg.log,
                        op_timeout: cfg.op_timeout(),
                    });
                }
                Err(e) => {
                    warn!(%url, error = %e, "could not connect to LDAP server");
                }
            }
        }

        Err(Error::ConnectError)
    }

    async fn try_connect(cfg: &Config, url: &str) -> Result<Ldap> {
        let mut settings = LdapConnSettings::new().set_starttls(cfg.use_starttls);
        if let Some(timeout) = cfg.op_timeout() {
            settings = settings.set_conn_timeout(timeout);
        }
        if !cfg.ssl_options.verify_peer {
            settings = settings.set_no_tls_verify(true);
        }

        let (conn, ldap) = LdapConnAsync::with_settings(settings, url).await?;

        // Drive the connection until the handle side goes away.
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                error!(error = %e, "LDAP connection error");
            }
        });

        Ok(ldap)
    }

    /// Whether the peer (or the driver task) has closed the transport.
    pub fn is_closed(&mut self) -> bool {
        self.ldap.is_closed()
    }

    /// Performs a simple bind and classifies the outcome: invalid
    /// credentials become [`Error::Refused`], anything else a generic
    /// [`Error::BindError`] with the detail logged here only. Transport
    /// faults propagate raw so the session runner can retry them.
    #[instrument(skip(self, password), fields(dn = %scrub::dn(dn, self.log)))]
    pub async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        if self.log.chatty() {
            debug!("binding");
        }

        let res = self.handle().simple_bind(dn, password).await?;
        match res.rc {
            0 => Ok(()),
            RC_INVALID_CREDENTIALS => Err(Error::Refused { dn: dn.to_string() }),
            rc => {
                warn!(rc, dn = %scrub::dn(dn, self.log), "LDAP bind failed");
                Err(Error::BindError)
            }
        }
    }

    /// Gracefully terminates the session.
    pub async fn unbind(&mut self) -> Result<()> {
        self.ldap.unbind().await?;
        Ok(())
    }

    fn handle(&mut self) -> &mut Ldap {
        match self.op_timeout {
            Some(timeout) => self.ldap.with_timeout(timeout),
            None => &mut self.ldap,
        }
    }
}

#[async_trait]
impl Directory for LdapConnection {
    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<LdapEntry>> {
        if self.log.chatty() {
            match self.log {
                // Filters may embed DN values; only the unsafe mode prints them.
                LogMode::NetworkUnsafe => debug!(base, filter, ?scope, "searching"),
                _ => debug!(base = %scrub::dn(base, self.log), ?scope, "searching"),
            }
        }

        let result = self
            .handle()
            .search(base, scope.into(), filter, attrs.to_vec())
            .await?
            .success();

        match result {
            Ok((entries, _res)) => Ok(entries
                .into_iter()
                .map(|entry| {
                    let entry = SearchEntry::construct(entry);
                    LdapEntry {
                        dn: entry.dn,
                        attributes: entry.attrs,
                    }
                })
                .collect()),
            // A missing base means "does not exist", not a directory fault.
            Err(LdapError::LdapResult { result }) if result.rc == RC_NO_SUCH_OBJECT => {
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}
