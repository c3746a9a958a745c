//! Engine configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `BLUEPRINT_`-prefixed environment variables (`__` separates nested keys,
//! e.g. `BLUEPRINT_LIMITS__MAX_NODE_EXECUTIONS=500`).

use std::collections::HashMap;
use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::recovery::RecoveryConfig;
use crate::sandbox::{PermissionLevel, RateLimitConfig, ResourceLimits, SecurityConfig};

/// Per-principal permission overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Level used when nothing more specific applies
    pub default_level: PermissionLevel,
    /// user id -> level
    pub users: HashMap<String, PermissionLevel>,
    /// blueprint id -> level (wins over the user level)
    pub blueprints: HashMap<String, PermissionLevel>,
}

impl PermissionConfig {
    /// Blueprint-specific level, else user level, else the default
    pub fn resolve(&self, user_id: &str, blueprint_id: &str) -> PermissionLevel {
        self.blueprints
            .get(blueprint_id)
            .or_else(|| self.users.get(user_id))
            .copied()
            .unwrap_or(self.default_level)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub permissions: PermissionConfig,
    pub limits: ResourceLimits,
    pub rate_limits: RateLimitConfig,
    pub recovery: RecoveryConfig,
    pub security: SecurityConfig,
}

impl EngineConfig {
    const ENV_PREFIX: &'static str = "BLUEPRINT_";

    fn base() -> Figment {
        Figment::from(Serialized::defaults(EngineConfig::default()))
    }

    /// Defaults overlaid with the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::base()
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
            .extract::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the TOML file, then the environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Invalid(format!(
                "config file '{}' does not exist",
                path.display()
            )));
        }
        let config = Self::base()
            .merge(Toml::file(path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
            .extract::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string on top of the defaults (no environment)
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config = Self::base()
            .merge(Toml::string(toml))
            .extract::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recovery.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "recovery.max_attempts must be at least 1".into(),
            ));
        }
        if self.limits.max_execution_time_ms == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_execution_time_ms must be positive".into(),
            ));
        }
        if let Some(rule) = self.rate_limits.rules.iter().find(|r| r.capacity == 0) {
            return Err(ConfigError::Invalid(format!(
                "rate limit for {:?} has zero capacity",
                rule.scope
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::RateScope;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.permissions.default_level, PermissionLevel::Standard);
        assert_eq!(config.recovery.max_attempts, 3);
        assert!(config.rate_limits.rules.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_permission_resolution_order() {
        let mut perms = PermissionConfig::default();
        assert_eq!(perms.resolve("u", "bp"), PermissionLevel::Standard);

        perms.users.insert("u".into(), PermissionLevel::Trusted);
        assert_eq!(perms.resolve("u", "bp"), PermissionLevel::Trusted);

        perms.blueprints.insert("bp".into(), PermissionLevel::Restricted);
        assert_eq!(perms.resolve("u", "bp"), PermissionLevel::Restricted);
        assert_eq!(perms.resolve("u", "other"), PermissionLevel::Trusted);
    }

    #[test]
    fn test_toml_overlay() {
        let config = EngineConfig::from_toml_str(
            r#"
            [permissions]
            default_level = "restricted"

            [limits]
            max_node_executions = 50

            [[rate_limits.rules]]
            scope = "user+blueprint"
            capacity = 2
            period_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.permissions.default_level, PermissionLevel::Restricted);
        assert_eq!(config.limits.max_node_executions, 50);
        // Untouched fields keep their defaults
        assert_eq!(config.limits.max_execution_time_ms, 30_000);
        assert_eq!(config.rate_limits.rules[0].scope, RateScope::UserBlueprint);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[recovery]\nmax_attempts = 5\njitter = false").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.recovery.max_attempts, 5);
        assert!(!config.recovery.jitter);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_toml_str("[recovery]\nmax_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(EngineConfig::load("/definitely/not/here.toml").is_err());
    }
}
