//! Principals, resources, and the authentication/authorization flows.

pub mod authz;
pub mod credential;
pub mod login;

use std::collections::HashMap;
use std::fmt;

/// Sentinel rendered for a DN that was never resolved.
pub const UNKNOWN_DN: &str = "unknown";

/// Inputs accompanying an authentication request.
///
/// Absence of `password` selects the passwordless flow (the upstream
/// authenticator already vouched for the principal).
#[derive(Debug, Clone, Default)]
pub struct AuthProps {
    /// Cleartext password, when the broker received one.
    pub password: Option<String>,
    /// Virtual host, for vhost-scoped tag queries.
    pub vhost: Option<String>,
}

/// An authenticated principal.
///
/// Carried by the broker through subsequent authorization calls. The
/// password is held only so `other_bind = as_user` can rebind for later
/// directory operations; it never appears in `Debug` output or logs.
#[derive(Clone)]
pub struct AuthUser {
    username: String,
    user_dn: Option<String>,
    password: Option<String>,
    tags: Vec<String>,
}

impl AuthUser {
    pub(crate) fn new(
        username: String,
        user_dn: Option<String>,
        password: Option<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            username,
            user_dn,
            password,
            tags,
        }
    }

    /// The username as presented at login.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The resolved DN, when resolution happened.
    pub fn dn(&self) -> Option<&str> {
        self.user_dn.as_deref()
    }

    /// The DN for display and variable binding; `"unknown"` when never
    /// resolved.
    pub fn display_dn(&self) -> &str {
        self.user_dn.as_deref().unwrap_or(UNKNOWN_DN)
    }

    /// Tags whose queries evaluated to exactly true, in configured order.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether the principal carries the given tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub(crate) fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl fmt::Debug for AuthUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthUser")
            .field("username", &self.username)
            .field("user_dn", &self.user_dn)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tags", &self.tags)
            .finish()
    }
}

/// Broker resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A queue.
    Queue,
    /// An exchange.
    Exchange,
    /// A topic (exchange with routing-key authorization).
    Topic,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Queue => "queue",
            ResourceKind::Exchange => "exchange",
            ResourceKind::Topic => "topic",
        })
    }
}

/// Broker operation class on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Create/delete/alter the resource.
    Configure,
    /// Publish or bind into it.
    Write,
    /// Consume or bind out of it.
    Read,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Permission::Configure => "configure",
            Permission::Write => "write",
            Permission::Read => "read",
        })
    }
}

/// A broker resource inside a virtual host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Virtual host the resource lives in.
    pub vhost: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name.
    pub name: String,
}

impl Resource {
    /// Creates a resource handle.
    pub fn new(vhost: impl Into<String>, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            vhost: vhost.into(),
            kind,
            name: name.into(),
        }
    }
}

/// Extra key-value context accompanying a topic access check (routing key,
/// variable headers). Keys colliding with the fixed variable names are
/// silently dropped.
pub type TopicContext = HashMap<String, String>;
