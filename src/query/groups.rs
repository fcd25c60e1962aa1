//! Nested-group membership traversal.
//!
//! Walks the chain of "group contains X" edges upwards from the principal's
//! DN until the target group is found or the reachable set is exhausted. A
//! DN already on the current root-to-node path is never re-expanded, so
//! membership cycles terminate after visiting each distinct DN once.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::config::LogMode;
use crate::ldap::{eq_filter, Directory, SearchScope, NO_ATTRS};
use crate::query::GroupScope;
use crate::scrub;

impl From<GroupScope> for SearchScope {
    fn from(scope: GroupScope) -> Self {
        match scope {
            GroupScope::Subtree => SearchScope::Subtree,
            GroupScope::OneLevel => SearchScope::OneLevel,
        }
    }
}

/// True iff a chain of membership edges connects `user_dn` to `target_dn`.
///
/// Each step searches `base` for entries whose `attribute` equals the
/// current DN; every hit is a parent group. Failed searches are silent and
/// contribute no parents, so a flaky directory can only shrink the
/// reachable set.
pub(crate) async fn is_member_nested(
    dir: &mut dyn Directory,
    base: &str,
    scope: GroupScope,
    attribute: &str,
    target_dn: &str,
    user_dn: &str,
    log: LogMode,
) -> bool {
    let mut path = Vec::new();
    expand(dir, base, scope, attribute, target_dn, user_dn, &mut path, log).await
}

#[allow(clippy::too_many_arguments)]
fn expand<'f>(
    dir: &'f mut dyn Directory,
    base: &'f str,
    scope: GroupScope,
    attribute: &'f str,
    target_dn: &'f str,
    current_dn: &'f str,
    path: &'f mut Vec<String>,
    log: LogMode,
) -> Pin<Box<dyn Future<Output = bool> + Send + 'f>> {
    Box::pin(async move {
        if path.iter().any(|dn| dn == current_dn) {
            warn!(
                dn = %scrub::dn(current_dn, log),
                "cycle detected in nested group membership"
            );
            return false;
        }

        let filter = eq_filter(attribute, current_dn);
        let parents = match dir.search(base, scope.into(), &filter, &[NO_ATTRS]).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "nested group search failed, treating as no parents");
                Vec::new()
            }
        };

        if parents.iter().any(|entry| entry.dn == target_dn) {
            return true;
        }

        path.push(current_dn.to_string());
        for parent in &parents {
            if expand(dir, base, scope, attribute, target_dn, &parent.dn, path, log).await {
                return true;
            }
        }
        path.pop();
        false
    })
}
