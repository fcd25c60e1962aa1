//! The session runner.
//!
//! Everything that needs a directory goes through [`with_ldap`]: it picks
//! the connection for the credential, binds (or not, for anonymous work),
//! hands the connection to the caller, and turns whatever went wrong into
//! one of the opaque error kinds. A first failure on a closed transport
//! purges the cached connection and retries once on a fresh one.

use tracing::{debug, warn};

use crate::auth::credential::Credential;
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::ldap::cache::{ConnectionCache, ConnectionKey};
use crate::ldap::connection::LdapConnection;
use crate::scrub;

/// Which step of a session attempt failed; bind faults and caller faults
/// map to different opaque kinds.
enum SessionFailure {
    Acquire(Error),
    Bind(Error),
    Call(Error),
}

impl SessionFailure {
    fn inner(&self) -> &Error {
        match self {
            SessionFailure::Acquire(e) | SessionFailure::Bind(e) | SessionFailure::Call(e) => e,
        }
    }
}

/// Runs `f` against a connection bound for `credential`.
///
/// The caller function may be invoked twice: once on the cached connection
/// and, if that attempt dies on a closed transport, once more on a fresh
/// one. Its non-protocol errors pass through verbatim; protocol errors are
/// logged and collapsed to [`Error::EvaluateError`].
pub async fn with_ldap<T, F>(
    cache: &mut ConnectionCache,
    cfg: &Config,
    credential: &Credential,
    mut f: F,
) -> Result<T>
where
    F: for<'c> AsyncFnMut(&'c mut LdapConnection) -> Result<T>,
{
    if credential.is_anonymous() && !cfg.anon_auth {
        warn!("anonymous bind requested but anon_auth is disabled");
        return Err(Error::BindError);
    }

    let key = ConnectionKey::new(cfg, credential.is_anonymous());

    let mut retried = false;
    loop {
        match attempt(cache, cfg, &key, credential, &mut f).await {
            Ok(value) => return Ok(value),
            Err(failure) => {
                if !retried && failure.inner().is_transport_closed() {
                    debug!("LDAP transport closed, retrying on a fresh connection");
                    cache.purge(&key);
                    retried = true;
                    continue;
                }
                return Err(classify(failure, cfg));
            }
        }
    }
}

async fn attempt<T, F>(
    cache: &mut ConnectionCache,
    cfg: &Config,
    key: &ConnectionKey,
    credential: &Credential,
    f: &mut F,
) -> std::result::Result<T, SessionFailure>
where
    F: for<'c> AsyncFnMut(&'c mut LdapConnection) -> Result<T>,
{
    let conn = cache
        .acquire(key, cfg)
        .await
        .map_err(SessionFailure::Acquire)?;

    if let Credential::Simple { dn, password } = credential {
        conn.simple_bind(dn, password)
            .await
            .map_err(SessionFailure::Bind)?;
    }

    f(conn).await.map_err(SessionFailure::Call)
}

fn classify(failure: SessionFailure, cfg: &Config) -> Error {
    let err = match failure {
        SessionFailure::Acquire(e) => e,
        // Refused and BindError come pre-classified from the connection;
        // residual protocol faults during bind stay opaque.
        SessionFailure::Bind(Error::Protocol(e)) => {
            warn!(error = %e, "LDAP bind failed");
            Error::BindError
        }
        SessionFailure::Bind(e) => e,
        SessionFailure::Call(Error::Protocol(e)) => {
            warn!(error = %e, "LDAP operation failed during evaluation");
            Error::EvaluateError
        }
        SessionFailure::Call(e) => e,
    };

    if let Error::Refused { dn } = &err {
        if cfg.log.chatty() {
            debug!(dn = %scrub::dn(dn, cfg.log), "login refused");
        }
    }
    err
}
