//! The backend API the broker consumes.
//!
//! Thin dispatch layer: every call clones what it needs, submits a job to
//! the worker pool, and awaits the outcome. All directory traffic for one
//! call happens on a single worker.

use std::sync::Arc;

use crate::auth::{authz, login, AuthProps, AuthUser, Permission, Resource, TopicContext};
use crate::config::Config;
use crate::errors::Result;
use crate::worker::WorkerPool;

/// LDAP authentication and authorization backend.
pub struct LdapAuthBackend {
    config: Arc<Config>,
    pool: WorkerPool,
}

impl LdapAuthBackend {
    /// Validates the configuration and spawns the worker pool.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let pool = WorkerPool::new(&config);
        Ok(Self { config, pool })
    }

    /// The configuration the backend runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Authenticates a user. Absence of `password` in the props selects the
    /// passwordless flow.
    pub async fn authenticate(&self, username: &str, props: AuthProps) -> Result<AuthUser> {
        let cfg = Arc::clone(&self.config);
        let username = username.to_string();
        self.pool
            .run(move |cache| {
                Box::pin(async move { login::authenticate(&cfg, cache, &username, &props).await })
            })
            .await?
    }

    /// Resolves a user without authenticating, for broker-internal
    /// authorization of pre-trusted principals.
    pub async fn authorize(&self, username: &str) -> Result<AuthUser> {
        let cfg = Arc::clone(&self.config);
        let username = username.to_string();
        self.pool
            .run(move |cache| Box::pin(async move { login::authorize(&cfg, cache, &username).await }))
            .await?
    }

    /// Checks access to a virtual host.
    pub async fn check_vhost_access(&self, user: &AuthUser, vhost: &str) -> Result<bool> {
        let cfg = Arc::clone(&self.config);
        let user = user.clone();
        let vhost = vhost.to_string();
        self.pool
            .run(move |cache| {
                Box::pin(async move { authz::check_vhost_access(&cfg, cache, &user, &vhost).await })
            })
            .await?
    }

    /// Checks a permission on a resource.
    pub async fn check_resource_access(
        &self,
        user: &AuthUser,
        resource: &Resource,
        permission: Permission,
    ) -> Result<bool> {
        let cfg = Arc::clone(&self.config);
        let user = user.clone();
        let resource = resource.clone();
        self.pool
            .run(move |cache| {
                Box::pin(async move {
                    authz::check_resource_access(&cfg, cache, &user, &resource, permission).await
                })
            })
            .await?
    }

    /// Checks a permission on a topic, with routing context.
    pub async fn check_topic_access(
        &self,
        user: &AuthUser,
        resource: &Resource,
        permission: Permission,
        context: &TopicContext,
    ) -> Result<bool> {
        let cfg = Arc::clone(&self.config);
        let user = user.clone();
        let resource = resource.clone();
        let context = context.clone();
        self.pool
            .run(move |cache| {
                Box::pin(async move {
                    authz::check_topic_access(&cfg, cache, &user, &resource, permission, &context)
                        .await
                })
            })
            .await?
    }

    /// Drains the worker pool and closes every cached connection.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}
