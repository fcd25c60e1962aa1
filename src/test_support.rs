//! In-memory directory and configuration helpers shared across unit tests.

use async_trait::async_trait;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::ldap::{Directory, LdapEntry, SearchScope};

/// Builds a minimal valid configuration for tests.
pub(crate) fn test_config() -> Config {
    serde_json::from_value(serde_json::json!({
        "servers": ["ldap.example.com"],
        "dn_lookup_base": "dc=x",
        "group_lookup_base": "ou=Groups,dc=x"
    }))
    .expect("test config")
}

/// One recorded search, for asserting evaluation order and counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SearchRecord {
    pub base: String,
    pub scope: SearchScope,
    pub filter: String,
}

/// An in-memory [`Directory`] understanding the two filter shapes the
/// backend emits: presence (`(objectClass=*)`) and equality
/// (`(attr=value)`).
#[derive(Debug, Default)]
pub(crate) struct FakeDirectory {
    pub entries: Vec<LdapEntry>,
    /// Every search fails when set.
    pub fail_all: bool,
    /// Searches in issue order.
    pub searches: Vec<SearchRecord>,
}

impl FakeDirectory {
    pub fn add(&mut self, entry: LdapEntry) {
        self.entries.push(entry);
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        _attrs: &[&str],
    ) -> Result<Vec<LdapEntry>> {
        self.searches.push(SearchRecord {
            base: base.to_string(),
            scope,
            filter: filter.to_string(),
        });
        if self.fail_all {
            return Err(Error::Internal("simulated directory failure".into()));
        }

        let (attribute, value) = parse_filter(filter);
        Ok(self
            .entries
            .iter()
            .filter(|entry| in_scope(&entry.dn, base, scope) && matches(entry, &attribute, &value))
            .cloned()
            .collect())
    }
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => dn == base,
        SearchScope::Subtree => dn == base || dn.ends_with(&format!(",{}", base)),
        SearchScope::OneLevel => {
            let suffix = format!(",{}", base);
            dn.ends_with(&suffix) && !dn[..dn.len() - suffix.len()].contains(',')
        }
    }
}

fn matches(entry: &LdapEntry, attribute: &str, value: &str) -> bool {
    if value == "*" {
        // Presence; every object has an objectClass.
        return attribute.eq_ignore_ascii_case("objectClass") || !entry.values(attribute).is_empty();
    }
    entry.values(attribute).iter().any(|v| v == value)
}

fn parse_filter(filter: &str) -> (String, String) {
    let inner = filter.trim_start_matches('(').trim_end_matches(')');
    match inner.split_once('=') {
        Some((attribute, value)) => (attribute.to_string(), unescape(value)),
        None => (inner.to_string(), String::new()),
    }
}

// Reverses ldap3::ldap_escape for the handful of escaped characters.
fn unescape(value: &str) -> String {
    value
        .replace("\\2a", "*")
        .replace("\\28", "(")
        .replace("\\29", ")")
        .replace("\\00", "\0")
        .replace("\\5c", "\\")
}
