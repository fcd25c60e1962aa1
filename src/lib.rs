//! # Cerberus LDAP
//!
//! LDAP authentication and authorization backend for message brokers.
//!
//! This crate provides:
//! - A declarative access-query language (group membership, nested groups,
//!   attribute lookups, regex matches, boolean combinators) evaluated
//!   against a live directory
//! - Worker-local LDAP connection caching with idle eviction and
//!   transport-fault recovery
//! - A login pipeline with pattern, prebind, and postbind DN resolution and
//!   capability-tag queries
//!
//! ## Example
//!
//! ```rust,no_run
//! use cerberus_ldap::{AuthProps, Config, LdapAuthBackend};
//!
//! #[tokio::main]
//! async fn main() -> cerberus_ldap::Result<()> {
//!     let config = Config::load(Some(std::path::Path::new("cerberus.toml")))?;
//!     let backend = LdapAuthBackend::new(config)?;
//!
//!     let props = AuthProps {
//!         password: Some("s3cret".into()),
//!         vhost: None,
//!     };
//!     let user = backend.authenticate("alice", props).await?;
//!     println!("{} may log in, tags: {:?}", user.username(), user.tags());
//!
//!     let allowed = backend.check_vhost_access(&user, "prod").await?;
//!     println!("vhost access: {}", allowed);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod backend;
pub mod config;
pub mod errors;
pub mod ldap;
pub mod query;
pub mod scrub;
pub mod template;

pub(crate) mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{AuthProps, AuthUser, Permission, Resource, ResourceKind, TopicContext};
pub use backend::LdapAuthBackend;
pub use config::Config;
pub use errors::{Error, Result};
pub use query::Query;

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
