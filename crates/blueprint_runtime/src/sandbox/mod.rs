//! Sandbox - resource accounting, permission checks and rate limiting
//!
//! A [`Sandbox`] is the per-execution descriptor wrapped around every node
//! context. The security checker and rate limiter are process-wide; the
//! resource monitor belongs to one execution (and its inlined functions).

mod ratelimit;
mod resource;
mod security;

use std::sync::Arc;

pub use ratelimit::*;
pub use resource::*;
pub use security::*;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Sandbox {
    user_id: String,
    blueprint_id: String,
    permission: PermissionLevel,
    monitor: Arc<ResourceMonitor>,
    security: Arc<SecurityChecker>,
    rate_limiter: Arc<RateLimiter>,
}

impl Sandbox {
    pub fn new(
        user_id: &str,
        blueprint_id: &str,
        permission: PermissionLevel,
        monitor: Arc<ResourceMonitor>,
        security: Arc<SecurityChecker>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            blueprint_id: blueprint_id.to_string(),
            permission,
            monitor,
            security,
            rate_limiter,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn blueprint_id(&self) -> &str {
        &self.blueprint_id
    }

    pub fn permission(&self) -> PermissionLevel {
        self.permission
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    pub fn security(&self) -> &SecurityChecker {
        &self.security
    }

    /// Permission and rate checks run before a node executes
    pub fn check_node(&self, node_type: &str, capabilities: &[Capability]) -> Result<()> {
        self.security
            .check_node_type(node_type, capabilities, self.permission)?;
        if capabilities.is_empty() {
            return Ok(());
        }
        for scope in [RateScope::Global, RateScope::User, RateScope::Api] {
            let key = scope.key(&self.user_id, &self.blueprint_id, node_type);
            self.rate_limiter.check(scope, &key)?;
        }
        Ok(())
    }

    pub fn check_url(&self, url: &str) -> Result<url::Url> {
        self.security.check_url(url, self.permission)
    }

    pub fn check_path(&self, path: &str) -> Result<()> {
        self.security.check_path(path, self.permission)
    }

    pub fn check_command(&self, command: &str) -> Result<()> {
        self.security.check_command(command, self.permission)
    }

    pub fn check_literal(&self, text: &str) -> Result<()> {
        self.security.check_literal(text)
    }

    pub fn charge_network(&self, bytes: u64) -> Result<()> {
        self.monitor.charge_network(bytes)
    }

    pub fn charge_disk(&self, bytes: u64) -> Result<()> {
        self.monitor.charge_disk(bytes)
    }
}
