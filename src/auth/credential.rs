//! Bind credential selection.
//!
//! Maps a configured [`BindIdentity`] plus the state of the current flow to
//! the concrete credential a session will bind with. `as_user` is the only
//! mode that can fail here: a passwordless flow has nothing to rebind with.

use std::fmt;

use crate::config::BindIdentity;
use crate::errors::{Error, Result};

/// A concrete bind identity for one session.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Anonymous bind.
    Anonymous,
    /// Simple bind with a DN and password.
    Simple {
        /// Bind DN.
        dn: String,
        /// Cleartext password.
        password: String,
    },
}

impl Credential {
    /// Whether this credential binds anonymously.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Credential::Anonymous)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Anonymous => f.write_str("Anonymous"),
            Credential::Simple { dn, .. } => f
                .debug_struct("Simple")
                .field("dn", dn)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Selects the credential for a configured identity.
///
/// `user_dn` and `password` describe the principal of the current flow and
/// are only consulted for `as_user`.
pub(crate) fn select(
    identity: &BindIdentity,
    user_dn: Option<&str>,
    password: Option<&str>,
) -> Result<Credential> {
    match identity {
        BindIdentity::Anonymous => Ok(Credential::Anonymous),
        BindIdentity::Creds { dn, password } => Ok(Credential::Simple {
            dn: dn.clone(),
            password: password.clone(),
        }),
        BindIdentity::AsUser => match (user_dn, password) {
            (Some(dn), Some(password)) => Ok(Credential::Simple {
                dn: dn.to_string(),
                password: password.to_string(),
            }),
            _ => Err(Error::CredentialsUnavailable),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous() {
        let cred = select(&BindIdentity::Anonymous, None, None).unwrap();
        assert!(cred.is_anonymous());
    }

    #[test]
    fn test_dedicated_identity_ignores_principal() {
        let identity = BindIdentity::Creds {
            dn: "cn=svc,dc=x".into(),
            password: "pw".into(),
        };
        let cred = select(&identity, None, None).unwrap();
        assert_eq!(
            cred,
            Credential::Simple {
                dn: "cn=svc,dc=x".into(),
                password: "pw".into(),
            }
        );
    }

    #[test]
    fn test_as_user_needs_dn_and_password() {
        let cred = select(&BindIdentity::AsUser, Some("uid=a,dc=x"), Some("pw")).unwrap();
        assert!(!cred.is_anonymous());

        assert!(matches!(
            select(&BindIdentity::AsUser, Some("uid=a,dc=x"), None),
            Err(Error::CredentialsUnavailable)
        ));
        assert!(matches!(
            select(&BindIdentity::AsUser, None, Some("pw")),
            Err(Error::CredentialsUnavailable)
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let cred = select(&BindIdentity::AsUser, Some("uid=a,dc=x"), Some("pw")).unwrap();
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("pw"));
    }
}
