//! Authorization entry points.
//!
//! Each check binds the request's facts into a variable map, selects the
//! `other_bind` credential, and evaluates the configured query. A query
//! fault surfaces as [`Error::EvaluateError`]; the broker treats any
//! non-true outcome as a denial.

use tracing::{debug, warn};

use crate::auth::credential;
use crate::auth::{AuthUser, Permission, Resource, TopicContext};
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::ldap::cache::ConnectionCache;
use crate::ldap::session;
use crate::query::{Evaluator, Query, Value};
use crate::template::{vars, VariableMap};

/// May the principal enter the virtual host?
pub(crate) async fn check_vhost_access(
    cfg: &Config,
    cache: &mut ConnectionCache,
    user: &AuthUser,
    vhost: &str,
) -> Result<bool> {
    let map = vhost_vars(user, vhost);
    run_query(cfg, cache, user, &cfg.vhost_access_query, &map).await
}

/// May the principal exercise `permission` on the resource?
pub(crate) async fn check_resource_access(
    cfg: &Config,
    cache: &mut ConnectionCache,
    user: &AuthUser,
    resource: &Resource,
    permission: Permission,
) -> Result<bool> {
    let map = resource_vars(user, resource, permission);
    run_query(cfg, cache, user, &cfg.resource_access_query, &map).await
}

/// May the principal exercise `permission` on the topic, given the routing
/// context?
pub(crate) async fn check_topic_access(
    cfg: &Config,
    cache: &mut ConnectionCache,
    user: &AuthUser,
    resource: &Resource,
    permission: Permission,
    context: &TopicContext,
) -> Result<bool> {
    let map = topic_vars(user, resource, permission, context);
    run_query(cfg, cache, user, &cfg.topic_access_query, &map).await
}

fn base_vars(user: &AuthUser) -> VariableMap {
    let mut map = VariableMap::new();
    map.set(vars::USERNAME, user.username())
        .set(vars::USER_DN, user.display_dn());
    map
}

fn vhost_vars(user: &AuthUser, vhost: &str) -> VariableMap {
    let mut map = base_vars(user);
    map.set(vars::VHOST, vhost);
    map
}

fn resource_vars(user: &AuthUser, resource: &Resource, permission: Permission) -> VariableMap {
    let mut map = base_vars(user);
    map.set(vars::VHOST, resource.vhost.as_str())
        .set(vars::RESOURCE, resource.kind.to_string())
        .set(vars::NAME, resource.name.as_str())
        .set(vars::PERMISSION, permission.to_string());
    map
}

fn topic_vars(
    user: &AuthUser,
    resource: &Resource,
    permission: Permission,
    context: &TopicContext,
) -> VariableMap {
    let mut map = resource_vars(user, resource, permission);
    for (key, value) in context {
        if vars::RESERVED.contains(&key.as_str()) {
            debug!(key, "dropping topic context key shadowing a fixed variable");
            continue;
        }
        map.set(key.clone(), value.clone());
    }
    map
}

async fn run_query(
    cfg: &Config,
    cache: &mut ConnectionCache,
    user: &AuthUser,
    query: &Query,
    map: &VariableMap,
) -> Result<bool> {
    if query.reads_user_dn() && user.dn().is_none() {
        warn!(
            username = user.username(),
            "access query reads user_dn but the principal has no resolved DN"
        );
        return Err(Error::EvaluateError);
    }

    let credential = credential::select(&cfg.other_bind, user.dn(), user.password())?;
    let value = session::with_ldap(cache, cfg, &credential, |conn| {
        async move {
            Ok(Evaluator::new(cfg, map, user.dn(), conn)
                .evaluate(query)
                .await)
        }
    })
    .await?;

    match value {
        Value::Bool(true) => Ok(true),
        Value::Error(fault) => {
            warn!(?fault, "access query failed");
            Err(Error::EvaluateError)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ResourceKind;
    use crate::test_support::test_config;
    use pretty_assertions::assert_eq;

    fn alice() -> AuthUser {
        AuthUser::new(
            "alice".into(),
            Some("uid=alice,ou=People,dc=x".into()),
            Some("s3cret".into()),
            vec![],
        )
    }

    #[test]
    fn test_vhost_vars() {
        let map = vhost_vars(&alice(), "prod");
        assert_eq!(map.get("username"), Some("alice"));
        assert_eq!(map.get("user_dn"), Some("uid=alice,ou=People,dc=x"));
        assert_eq!(map.get("vhost"), Some("prod"));
    }

    #[test]
    fn test_unresolved_dn_binds_sentinel() {
        let user = AuthUser::new("alice".into(), None, None, vec![]);
        let map = vhost_vars(&user, "prod");
        assert_eq!(map.get("user_dn"), Some("unknown"));
    }

    #[test]
    fn test_resource_vars() {
        let resource = Resource::new("prod", ResourceKind::Queue, "orders");
        let map = resource_vars(&alice(), &resource, Permission::Write);
        assert_eq!(map.get("vhost"), Some("prod"));
        assert_eq!(map.get("resource"), Some("queue"));
        assert_eq!(map.get("name"), Some("orders"));
        assert_eq!(map.get("permission"), Some("write"));
    }

    #[test]
    fn test_topic_vars_merge_and_collision() {
        let resource = Resource::new("prod", ResourceKind::Topic, "events");
        let mut context = TopicContext::new();
        context.insert("routing_key".into(), "orders.eu".into());
        // Colliding keys are dropped, not overwritten.
        context.insert("username".into(), "mallory".into());
        context.insert("permission".into(), "configure".into());

        let map = topic_vars(&alice(), &resource, Permission::Read, &context);
        assert_eq!(map.get("routing_key"), Some("orders.eu"));
        assert_eq!(map.get("username"), Some("alice"));
        assert_eq!(map.get("permission"), Some("read"));
    }

    #[tokio::test]
    async fn test_user_dn_query_refused_for_unresolved_principal() {
        let cfg = test_config();
        let mut cache = ConnectionCache::new(None);
        let user = AuthUser::new("alice".into(), None, None, vec![]);
        let query: Query =
            serde_json::from_value(serde_json::json!({"in_group": {"dn": "cn=g,dc=x"}}))
                .expect("query");
        let map = vhost_vars(&user, "prod");

        let err = run_query(&cfg, &mut cache, &user, &query, &map)
            .await
            .expect_err("must refuse user_dn query without a DN");
        assert!(matches!(err, Error::EvaluateError));
        assert!(cache.is_empty());
    }
}
