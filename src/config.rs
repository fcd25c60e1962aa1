//! Backend configuration.
//!
//! The whole surface is a serde struct: defaults are encoded here, values
//! come from an optional file plus `CERBERUS_LDAP_*` environment overrides,
//! and the query options deserialize straight into the [`Query`] AST so that
//! malformed query shapes are rejected at load time rather than during
//! evaluation.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use crate::errors::{Error, Result};
use crate::query::Query;

/// Log verbosity and scrubbing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    /// Only warnings and errors.
    #[default]
    Off,
    /// Chatty logs, no wire-level detail.
    On,
    /// Wire-level logs with credential scrubbing and partial DN redaction.
    Network,
    /// Wire-level logs with DNs intact. Passwords are still never logged.
    NetworkUnsafe,
}

impl LogMode {
    /// Whether chatty (debug-level) logs should be emitted at all.
    pub fn chatty(self) -> bool {
        self != LogMode::Off
    }
}

// Accepts `log = false`, `log = true`, `log = "network"`,
// `log = "network_unsafe"` like the broker's configuration does.
impl<'de> Deserialize<'de> for LogMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LogModeVisitor;

        impl Visitor<'_> for LogModeVisitor {
            type Value = LogMode;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a boolean, \"network\" or \"network_unsafe\"")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<LogMode, E> {
                Ok(if v { LogMode::On } else { LogMode::Off })
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<LogMode, E> {
                match v {
                    "false" => Ok(LogMode::Off),
                    "true" => Ok(LogMode::On),
                    "network" => Ok(LogMode::Network),
                    "network_unsafe" => Ok(LogMode::NetworkUnsafe),
                    other => Err(E::unknown_variant(
                        other,
                        &["false", "true", "network", "network_unsafe"],
                    )),
                }
            }
        }

        deserializer.deserialize_any(LogModeVisitor)
    }
}

/// Identity to bind as for a class of directory operations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindIdentity {
    /// Rebind with the DN and password of the principal being checked.
    #[default]
    AsUser,
    /// Anonymous bind.
    Anonymous,
    /// A dedicated service identity.
    Creds {
        /// Bind DN of the service identity.
        dn: String,
        /// Password of the service identity.
        password: String,
    },
}

/// TLS settings applied when opening connections.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsOptions {
    /// Verify the server certificate chain.
    #[serde(default = "default_true")]
    pub verify_peer: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self { verify_peer: true }
    }
}

/// How the login pipeline resolves a username to a DN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnLookupMode {
    /// Fill `user_dn_pattern` and use the result directly.
    Pattern,
    /// Bind as a configured identity, search for the DN, then authenticate.
    Prebind,
    /// Authenticate with the pattern-filled DN, then re-resolve by search.
    Postbind,
}

/// A named tag paired with the query that grants it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagQuery {
    /// Tag name (e.g. `administrator`, `monitoring`).
    pub tag: String,
    /// Query that must evaluate to exactly `true` for the tag to be granted.
    pub query: Query,
}

/// Full backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Ordered list of `host` or `host:port` endpoints, tried in order.
    pub servers: Vec<String>,

    /// Port used for servers that do not carry an explicit one.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Template for direct DN synthesis.
    #[serde(default = "default_user_dn_pattern")]
    pub user_dn_pattern: String,

    /// Attribute to search on when resolving usernames to DNs; `None`
    /// disables lookup and the pattern is used alone.
    #[serde(default)]
    pub dn_lookup_attribute: Option<String>,

    /// Base DN for the username-to-DN lookup.
    #[serde(default)]
    pub dn_lookup_base: Option<String>,

    /// Base DN for nested-group searches; falls back to `dn_lookup_base`.
    #[serde(default)]
    pub group_lookup_base: Option<String>,

    /// Identity to bind as during the prebind DN lookup. `as_user` selects
    /// postbind resolution instead.
    #[serde(default)]
    pub dn_lookup_bind: BindIdentity,

    /// Identity for non-login directory operations (authorization checks,
    /// tag queries).
    #[serde(default)]
    pub other_bind: BindIdentity,

    /// Whether anonymous connections are permitted at all.
    #[serde(default)]
    pub anon_auth: bool,

    /// Query run for vhost access checks.
    #[serde(default = "default_query")]
    pub vhost_access_query: Query,

    /// Query run for resource access checks.
    #[serde(default = "default_query")]
    pub resource_access_query: Query,

    /// Query run for topic access checks.
    #[serde(default = "default_query")]
    pub topic_access_query: Query,

    /// Ordered tag queries; evaluation order is the configured order.
    #[serde(default)]
    pub tag_queries: Vec<TagQuery>,

    /// Connect over LDAPS from the outset.
    #[serde(default)]
    pub use_ssl: bool,

    /// Connect in the clear, then upgrade with StartTLS.
    #[serde(default)]
    pub use_starttls: bool,

    /// TLS settings for either secure mode.
    #[serde(default)]
    pub ssl_options: TlsOptions,

    /// Per-operation deadline in seconds; `None` means no deadline.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Idle seconds after which a cached connection is evicted; `None`
    /// disables eviction.
    #[serde(default)]
    pub idle_timeout: Option<u64>,

    /// Worker pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Log verbosity and scrubbing.
    #[serde(default)]
    pub log: LogMode,
}

fn default_port() -> u16 {
    389
}

fn default_user_dn_pattern() -> String {
    "${username}".to_string()
}

fn default_query() -> Query {
    Query::Constant(true)
}

fn default_pool_size() -> usize {
    64
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Loads configuration from an optional file plus `CERBERUS_LDAP_*`
    /// environment overrides, then validates it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let cfg: Config = builder
            .add_source(config::Environment::with_prefix("CERBERUS_LDAP").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::NoServersDefined);
        }
        if self.servers.iter().any(|s| s.is_empty()) {
            return Err(Error::Config("empty server endpoint".into()));
        }
        if self.use_ssl && self.use_starttls {
            return Err(Error::Config(
                "use_ssl and use_starttls are mutually exclusive".into(),
            ));
        }
        if self.dn_lookup_attribute.is_some() && self.dn_lookup_base.is_none() {
            return Err(Error::Config(
                "dn_lookup_base is required when dn_lookup_attribute is set".into(),
            ));
        }
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be greater than 0".into()));
        }
        Ok(())
    }

    /// The DN-resolution mode implied by the lookup options.
    pub fn dn_lookup_mode(&self) -> DnLookupMode {
        match (&self.dn_lookup_attribute, &self.dn_lookup_bind) {
            (None, _) => DnLookupMode::Pattern,
            (Some(_), BindIdentity::AsUser) => DnLookupMode::Postbind,
            (Some(_), _) => DnLookupMode::Prebind,
        }
    }

    /// Base DN for nested-group searches.
    pub fn group_search_base(&self) -> Option<&str> {
        self.group_lookup_base
            .as_deref()
            .or(self.dn_lookup_base.as_deref())
    }

    /// Connection URLs in configured server order.
    pub(crate) fn server_urls(&self) -> Vec<String> {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        self.servers
            .iter()
            .map(|server| {
                if server.contains(':') {
                    format!("{}://{}", scheme, server)
                } else {
                    format!("{}://{}:{}", scheme, server, self.port)
                }
            })
            .collect()
    }

    /// Per-operation deadline as a `Duration`.
    pub(crate) fn op_timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// Idle eviction deadline as a `Duration`.
    pub(crate) fn idle(&self) -> Option<Duration> {
        self.idle_timeout.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn minimal() -> Config {
        serde_json::from_value(serde_json::json!({
            "servers": ["ldap.example.com"]
        }))
        .expect("minimal config")
    }

    #[test]
    fn test_defaults() {
        let cfg = minimal();
        assert_eq!(cfg.port, 389);
        assert_eq!(cfg.user_dn_pattern, "${username}");
        assert_eq!(cfg.dn_lookup_bind, BindIdentity::AsUser);
        assert_eq!(cfg.other_bind, BindIdentity::AsUser);
        assert_eq!(cfg.vhost_access_query, Query::Constant(true));
        assert_eq!(cfg.pool_size, 64);
        assert_eq!(cfg.log, LogMode::Off);
        assert_eq!(cfg.timeout, None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_no_servers_defined() {
        let mut cfg = minimal();
        cfg.servers.clear();
        assert!(matches!(cfg.validate(), Err(Error::NoServersDefined)));
    }

    #[test]
    fn test_ssl_and_starttls_conflict() {
        let mut cfg = minimal();
        cfg.use_ssl = true;
        cfg.use_starttls = true;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_lookup_attribute_requires_base() {
        let mut cfg = minimal();
        cfg.dn_lookup_attribute = Some("uid".into());
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
        cfg.dn_lookup_base = Some("ou=People,dc=x".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_dn_lookup_mode() {
        let mut cfg = minimal();
        assert_eq!(cfg.dn_lookup_mode(), DnLookupMode::Pattern);

        cfg.dn_lookup_attribute = Some("uid".into());
        cfg.dn_lookup_base = Some("ou=People,dc=x".into());
        assert_eq!(cfg.dn_lookup_mode(), DnLookupMode::Postbind);

        cfg.dn_lookup_bind = BindIdentity::Creds {
            dn: "cn=lookup,dc=x".into(),
            password: "s3cret".into(),
        };
        assert_eq!(cfg.dn_lookup_mode(), DnLookupMode::Prebind);

        cfg.dn_lookup_bind = BindIdentity::Anonymous;
        assert_eq!(cfg.dn_lookup_mode(), DnLookupMode::Prebind);
    }

    #[test]
    fn test_group_search_base_fallback() {
        let mut cfg = minimal();
        assert_eq!(cfg.group_search_base(), None);
        cfg.dn_lookup_base = Some("ou=People,dc=x".into());
        assert_eq!(cfg.group_search_base(), Some("ou=People,dc=x"));
        cfg.group_lookup_base = Some("ou=Groups,dc=x".into());
        assert_eq!(cfg.group_search_base(), Some("ou=Groups,dc=x"));
    }

    #[test]
    fn test_server_urls() {
        let mut cfg = minimal();
        cfg.servers = vec!["a.example.com".into(), "b.example.com:10389".into()];
        assert_eq!(
            cfg.server_urls(),
            vec!["ldap://a.example.com:389", "ldap://b.example.com:10389"]
        );
        cfg.use_ssl = true;
        assert!(cfg.server_urls()[0].starts_with("ldaps://"));
    }

    #[test]
    fn test_log_mode_accepts_bool_and_string() {
        let parse = |v: serde_json::Value| -> LogMode {
            serde_json::from_value(v).expect("log mode")
        };
        assert_eq!(parse(serde_json::json!(false)), LogMode::Off);
        assert_eq!(parse(serde_json::json!(true)), LogMode::On);
        assert_eq!(parse(serde_json::json!("network")), LogMode::Network);
        assert_eq!(
            parse(serde_json::json!("network_unsafe")),
            LogMode::NetworkUnsafe
        );
        assert!(serde_json::from_value::<LogMode>(serde_json::json!("loud")).is_err());
    }

    #[test]
    fn test_bind_identity_shapes() {
        let as_user: BindIdentity = serde_json::from_value(serde_json::json!("as_user")).unwrap();
        assert_eq!(as_user, BindIdentity::AsUser);

        let creds: BindIdentity = serde_json::from_value(serde_json::json!({
            "creds": {"dn": "cn=svc,dc=x", "password": "pw"}
        }))
        .unwrap();
        assert!(matches!(creds, BindIdentity::Creds { .. }));
    }

    #[test]
    fn test_full_config_with_queries() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "servers": ["ldap.example.com"],
            "dn_lookup_attribute": "uid",
            "dn_lookup_base": "ou=People,dc=x",
            "vhost_access_query": {"exists": "ou=${vhost},ou=vhosts,dc=x"},
            "tag_queries": [
                {"tag": "administrator",
                 "query": {"in_group": {"dn": "cn=admins,ou=Groups,dc=x"}}},
                {"tag": "monitoring", "query": {"constant": false}}
            ]
        }))
        .expect("full config");
        assert_eq!(cfg.tag_queries.len(), 2);
        assert_eq!(cfg.tag_queries[0].tag, "administrator");
        assert!(cfg.validate().is_ok());
    }
}
