//! Directory access layer.
//!
//! This module owns everything that talks LDAP: the [`Directory`] trait seam
//! the evaluator searches through, the ldap3-backed [`connection`], the
//! worker-local connection [`cache`], and the [`session`] runner that binds
//! and classifies faults.

pub mod cache;
pub mod connection;
pub mod session;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::Result;

/// Presence filter used for existence and attribute reads.
pub(crate) const PRESENCE_FILTER: &str = "(objectClass=*)";

/// Attribute selector asking the server for no attributes at all.
pub(crate) const NO_ATTRS: &str = "1.1";

/// Builds an equality filter with a properly escaped value.
pub(crate) fn eq_filter(attribute: &str, value: &str) -> String {
    format!("({}={})", attribute, ldap3::ldap_escape(value))
}

/// Search scope for directory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Only the base object.
    Base,
    /// Immediate children of the base.
    OneLevel,
    /// The entire subtree.
    Subtree,
}

impl From<SearchScope> for ldap3::Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => ldap3::Scope::Base,
            SearchScope::OneLevel => ldap3::Scope::OneLevel,
            SearchScope::Subtree => ldap3::Scope::Subtree,
        }
    }
}

/// An entry returned from a directory search.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LdapEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attributes and their values, in directory order.
    pub attributes: HashMap<String, Vec<String>>,
}

impl LdapEntry {
    /// Creates an entry with no attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Default::default()
        }
    }

    /// Adds an attribute with its values.
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        values: Vec<impl Into<String>>,
    ) -> Self {
        self.attributes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Values of an attribute, matched case-insensitively as LDAP attribute
    /// names are.
    pub fn values(&self, attribute: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }
}

/// Search capability the query evaluator runs against.
///
/// [`connection::LdapConnection`] is the production implementation; tests
/// substitute an in-memory directory.
#[async_trait]
pub trait Directory: Send {
    /// Runs a search and returns the matching entries. A base that does not
    /// exist yields an empty result, not an error.
    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<LdapEntry>>;
}
