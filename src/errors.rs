//! Error types for Cerberus LDAP.
//!
//! Callers only ever see opaque error kinds; protocol-level details are
//! logged and stripped before an error crosses the backend boundary, so a
//! schema mismatch and a transport fault are indistinguishable downstream.

use thiserror::Error;

/// Result type alias for Cerberus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the LDAP backend.
#[derive(Error, Debug)]
pub enum Error {
    /// Authentic failure: invalid credentials, empty password, policy denial.
    #[error("login refused for {dn}")]
    Refused {
        /// The DN (or username, when no DN was ever resolved) the refusal
        /// applies to.
        dn: String,
    },

    /// No configured server accepted a connection.
    #[error("could not connect to any configured LDAP server")]
    ConnectError,

    /// Bind failed for a reason other than invalid credentials.
    #[error("LDAP bind failed")]
    BindError,

    /// A directory search used during evaluation failed.
    #[error("LDAP evaluation failed")]
    EvaluateError,

    /// The `servers` configuration entry is empty.
    #[error("no LDAP servers defined")]
    NoServersDefined,

    /// `as_user` bind requested on a flow that carries no password.
    #[error("credentials unavailable for directory bind")]
    CredentialsUnavailable,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),

    /// Raw ldap3 error. Never surfaced to callers: the session runner maps
    /// it to one of the opaque kinds above after logging the detail.
    #[error("LDAP protocol error: {0}")]
    Protocol(#[from] ldap3::LdapError),
}

impl Error {
    /// True when the underlying transport was found closed and a retry on a
    /// fresh connection is worthwhile.
    pub(crate) fn is_transport_closed(&self) -> bool {
        match self {
            Error::Protocol(e) => matches!(
                e,
                ldap3::LdapError::EndOfStream
                    | ldap3::LdapError::Io { .. }
                    | ldap3::LdapError::OpSend { .. }
                    | ldap3::LdapError::ResultRecv { .. }
                    | ldap3::LdapError::IdScrubSend { .. }
            ),
            _ => false,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
