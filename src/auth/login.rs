//! The login pipeline.
//!
//! Resolves the username to a DN (by pattern, prebind search, or postbind
//! search), authenticates with a simple bind, runs the configured tag
//! queries, and packages the result. The authenticating bind itself is the
//! proof of identity; an `invalidCredentials` result surfaces as
//! [`Error::Refused`], never as a generic failure.

use tracing::{debug, warn};

use crate::auth::credential::{self, Credential};
use crate::auth::{AuthProps, AuthUser};
use crate::config::{BindIdentity, Config, DnLookupMode};
use crate::errors::{Error, Result};
use crate::ldap::cache::ConnectionCache;
use crate::ldap::connection::LdapConnection;
use crate::ldap::{eq_filter, session, Directory, SearchScope, NO_ATTRS};
use crate::query::{Evaluator, Value};
use crate::scrub;
use crate::template::{self, vars, VariableMap};

/// Authenticates `username` and returns the principal with its tags.
pub(crate) async fn authenticate(
    cfg: &Config,
    cache: &mut ConnectionCache,
    username: &str,
    props: &AuthProps,
) -> Result<AuthUser> {
    // The LDAP protocol treats an empty password as a successful anonymous
    // bind; it must never be conflated with authentication.
    if props.password.as_deref() == Some("") {
        warn!(username, "empty password rejected, unauthenticated bind not allowed");
        return Err(Error::Refused {
            dn: username.to_string(),
        });
    }

    let mut fill_vars = VariableMap::new();
    fill_vars.set(vars::USERNAME, username);
    let pattern_dn = template::fill(&cfg.user_dn_pattern, &fill_vars);

    let user_dn = match cfg.dn_lookup_mode() {
        DnLookupMode::Pattern | DnLookupMode::Postbind => pattern_dn,
        DnLookupMode::Prebind => prebind_lookup(cfg, cache, username).await?,
    };

    match &props.password {
        Some(password) => {
            login_with_password(cfg, cache, username, user_dn, password, props).await
        }
        None => login_without_password(cfg, cache, username, user_dn, props).await,
    }
}

/// The passwordless flow with no extra properties; used by the broker's
/// `user_login_authorization` entry point.
pub(crate) async fn authorize(
    cfg: &Config,
    cache: &mut ConnectionCache,
    username: &str,
) -> Result<AuthUser> {
    authenticate(cfg, cache, username, &AuthProps::default()).await
}

async fn login_with_password(
    cfg: &Config,
    cache: &mut ConnectionCache,
    username: &str,
    user_dn: String,
    password: &str,
    props: &AuthProps,
) -> Result<AuthUser> {
    let user_cred = Credential::Simple {
        dn: user_dn.clone(),
        password: password.to_string(),
    };

    if cfg.other_bind == BindIdentity::AsUser {
        // The authenticated session does everything: postbind resolution
        // and the tag sweep.
        let (dn, tags) = session::with_ldap(cache, cfg, &user_cred, async move |conn| {
            let user_dn = user_dn.clone();
            let dn = resolve_postbind(conn, cfg, username, user_dn).await?;
            let tags = run_tag_queries(cfg, conn, username, &dn, props.vhost.as_deref()).await?;
            Ok((dn, tags))
        })
        .await?;

        return Ok(AuthUser::new(
            username.to_string(),
            Some(dn),
            Some(password.to_string()),
            tags,
        ));
    }

    // Authenticate (and re-resolve) as the user, then sweep tags in a
    // separate session under the dedicated identity.
    let dn = session::with_ldap(cache, cfg, &user_cred, async move |conn| {
        let user_dn = user_dn.clone();
        resolve_postbind(conn, cfg, username, user_dn).await
    })
    .await?;

    let other_cred = credential::select(&cfg.other_bind, Some(&dn), Some(password))?;
    let resolved = dn.clone();
    let tags = session::with_ldap(cache, cfg, &other_cred, async move |conn| {
        let dn = resolved.clone();
        run_tag_queries(cfg, conn, username, &dn, props.vhost.as_deref()).await
    })
    .await?;

    Ok(AuthUser::new(
        username.to_string(),
        Some(dn),
        Some(password.to_string()),
        tags,
    ))
}

async fn login_without_password(
    cfg: &Config,
    cache: &mut ConnectionCache,
    username: &str,
    user_dn: String,
    props: &AuthProps,
) -> Result<AuthUser> {
    // No authenticating bind: the upstream mechanism already vouched for
    // the principal. `as_user` cannot work here and fails the selection.
    let credential = credential::select(&cfg.other_bind, Some(&user_dn), None)?;

    let (dn, tags) = session::with_ldap(cache, cfg, &credential, async move |conn| {
        let user_dn = user_dn.clone();
        let dn = resolve_postbind(conn, cfg, username, user_dn).await?;
        let tags = run_tag_queries(cfg, conn, username, &dn, props.vhost.as_deref()).await?;
        Ok((dn, tags))
    })
    .await?;

    Ok(AuthUser::new(username.to_string(), Some(dn), None, tags))
}

/// Resolves the DN by searching as a configured identity before the
/// authenticating bind. A username with no directory entry is refused.
async fn prebind_lookup(
    cfg: &Config,
    cache: &mut ConnectionCache,
    username: &str,
) -> Result<String> {
    let (Some(attribute), Some(base)) = (
        cfg.dn_lookup_attribute.as_deref(),
        cfg.dn_lookup_base.as_deref(),
    ) else {
        return Err(Error::Config(
            "prebind lookup requires dn_lookup_attribute and dn_lookup_base".into(),
        ));
    };

    let credential = credential::select(&cfg.dn_lookup_bind, None, None)?;
    let found = session::with_ldap(cache, cfg, &credential, async move |conn| {
        lookup_dn(conn, base, attribute, username).await
    })
    .await?;

    match found {
        Some(dn) => {
            if cfg.log.chatty() {
                debug!(username, dn = %scrub::dn(&dn, cfg.log), "resolved DN");
            }
            Ok(dn)
        }
        None => {
            if cfg.log.chatty() {
                debug!(username, "DN lookup found no entry");
            }
            Err(Error::Refused {
                dn: username.to_string(),
            })
        }
    }
}

/// Re-resolves the DN on the already-authenticated session when postbind
/// lookup is configured. A miss keeps the pattern-synthesized DN.
async fn resolve_postbind(
    conn: &mut LdapConnection,
    cfg: &Config,
    username: &str,
    current_dn: String,
) -> Result<String> {
    if cfg.dn_lookup_mode() != DnLookupMode::Postbind {
        return Ok(current_dn);
    }
    let (Some(attribute), Some(base)) = (
        cfg.dn_lookup_attribute.as_deref(),
        cfg.dn_lookup_base.as_deref(),
    ) else {
        return Ok(current_dn);
    };

    match lookup_dn(conn, base, attribute, username).await? {
        Some(dn) => Ok(dn),
        None => {
            warn!(username, "postbind DN lookup found no entry, keeping pattern DN");
            Ok(current_dn)
        }
    }
}

async fn lookup_dn(
    dir: &mut dyn Directory,
    base: &str,
    attribute: &str,
    username: &str,
) -> Result<Option<String>> {
    let filter = eq_filter(attribute, username);
    let mut entries = dir
        .search(base, SearchScope::Subtree, &filter, &[NO_ATTRS])
        .await?;
    if entries.len() > 1 {
        warn!(
            count = entries.len(),
            username, "DN lookup matched multiple entries, using the first"
        );
    }
    if entries.is_empty() {
        Ok(None)
    } else {
        Ok(Some(entries.remove(0).dn))
    }
}

/// Evaluates the configured tag queries in order; a tag is granted only for
/// an exact boolean true. A fault at the top of any tag query fails the
/// login.
async fn run_tag_queries(
    cfg: &Config,
    conn: &mut LdapConnection,
    username: &str,
    user_dn: &str,
    vhost: Option<&str>,
) -> Result<Vec<String>> {
    if cfg.tag_queries.is_empty() {
        return Ok(Vec::new());
    }

    let mut map = VariableMap::new();
    map.set(vars::USERNAME, username).set(vars::USER_DN, user_dn);
    if let Some(vhost) = vhost {
        map.set(vars::VHOST, vhost);
    }

    let mut tags = Vec::new();
    for tag_query in &cfg.tag_queries {
        let value = Evaluator::new(cfg, &map, Some(user_dn), conn)
            .evaluate(&tag_query.query)
            .await;
        match value {
            Value::Bool(true) => {
                if cfg.log.chatty() {
                    debug!(tag = %tag_query.tag, username, "tag granted");
                }
                tags.push(tag_query.tag.clone());
            }
            Value::Error(fault) => {
                warn!(tag = %tag_query.tag, ?fault, "tag query failed");
                return Err(Error::EvaluateError);
            }
            _ => {}
        }
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_config;

    fn cache() -> ConnectionCache {
        ConnectionCache::new(None)
    }

    #[tokio::test]
    async fn test_empty_password_refused_without_directory_contact() {
        let cfg = test_config();
        let mut cache = cache();
        let props = AuthProps {
            password: Some(String::new()),
            vhost: None,
        };
        let err = authenticate(&cfg, &mut cache, "alice", &props)
            .await
            .expect_err("empty password must be refused");
        assert!(matches!(err, Error::Refused { dn } if dn == "alice"));
        // No connection was ever opened.
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_passwordless_flow_needs_non_as_user_identity() {
        // other_bind defaults to as_user; without a password the
        // credential selection fails before any directory contact.
        let cfg = test_config();
        let mut cache = cache();
        let err = authorize(&cfg, &mut cache, "alice")
            .await
            .expect_err("as_user without password must fail");
        assert!(matches!(err, Error::CredentialsUnavailable));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_anonymous_sessions_gated_by_anon_auth() {
        let mut cfg = test_config();
        cfg.other_bind = BindIdentity::Anonymous;
        // anon_auth stays false.
        let mut cache = cache();
        let err = authorize(&cfg, &mut cache, "alice")
            .await
            .expect_err("anonymous bind must be gated");
        assert!(matches!(err, Error::BindError));
        assert!(cache.is_empty());
    }
}
