//! Security checks for node types, URLs, filesystem paths and commands.
//!
//! Every answer depends on the caller's [`PermissionLevel`]. `admin` bypasses
//! host, path and command lists; everything below it is held to them.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use url::{Host, Url};
use wildmatch::WildMatch;

use crate::error::{BlueprintError, ErrorCode, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Permission Levels and Capabilities
// ─────────────────────────────────────────────────────────────────────────────

/// Trust level of the principal running an execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Restricted,
    #[default]
    Standard,
    Trusted,
    Admin,
}

impl PermissionLevel {
    /// Whether nodes requiring this capability may run at this level
    pub fn allows(&self, capability: Capability) -> bool {
        match self {
            PermissionLevel::Restricted => false,
            PermissionLevel::Standard => capability != Capability::Command,
            PermissionLevel::Trusted | PermissionLevel::Admin => true,
        }
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PermissionLevel::Restricted => "restricted",
            PermissionLevel::Standard => "standard",
            PermissionLevel::Trusted => "trusted",
            PermissionLevel::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// Potentially expensive or dangerous things a node type may do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Network,
    Filesystem,
    Command,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Host patterns that may never be contacted
    pub blocked_hosts: Vec<String>,
    /// Block loopback, private (RFC1918), link-local and unspecified addresses
    pub block_private_networks: bool,
    /// If non-empty, only paths under these prefixes are accessible
    pub allowed_paths: Vec<String>,
    /// Paths (or `*` patterns) that are never accessible
    pub blocked_paths: Vec<String>,
    /// Programs that may never be run
    pub blocked_commands: Vec<String>,
    /// If non-empty, only node types matching these patterns may run
    pub allowed_node_types: Vec<String>,
    /// Node types matching these patterns never run
    pub denied_node_types: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            blocked_hosts: vec![
                "localhost".into(),
                "*.localhost".into(),
                "*.local".into(),
                "*.internal".into(),
            ],
            block_private_networks: true,
            allowed_paths: Vec::new(),
            blocked_paths: vec![
                "/etc".into(),
                "/root".into(),
                "/proc".into(),
                "/sys".into(),
                "/dev".into(),
                "/boot".into(),
                "/var/log".into(),
                "/home/*/.ssh".into(),
            ],
            blocked_commands: vec![
                "rm".into(),
                "dd".into(),
                "mkfs".into(),
                "shutdown".into(),
                "reboot".into(),
                "sudo".into(),
                "su".into(),
                "chmod".into(),
                "chown".into(),
                "kill".into(),
            ],
            allowed_node_types: Vec::new(),
            denied_node_types: Vec::new(),
        }
    }
}

/// Substrings that almost always indicate an injection attempt
const INJECTION_PATTERNS: &[&str] = &[
    "$(",
    "`",
    "; rm ",
    "&& rm ",
    "| sh",
    "| bash",
    "<script",
    "javascript:",
    "' or '1'='1",
    "union select",
    "drop table",
    "../../",
    "\0",
];

// ─────────────────────────────────────────────────────────────────────────────
// Security Checker
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SecurityChecker {
    config: SecurityConfig,
    blocked_hosts: Vec<WildMatch>,
    allowed_node_types: Vec<WildMatch>,
    denied_node_types: Vec<WildMatch>,
}

fn compile(patterns: &[String]) -> Vec<WildMatch> {
    patterns.iter().map(|p| WildMatch::new(p)).collect()
}

impl SecurityChecker {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            blocked_hosts: compile(&config.blocked_hosts),
            allowed_node_types: compile(&config.allowed_node_types),
            denied_node_types: compile(&config.denied_node_types),
            config,
        }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Is this node type allowed to run at this level?
    pub fn check_node_type(
        &self,
        node_type: &str,
        capabilities: &[Capability],
        level: PermissionLevel,
    ) -> Result<()> {
        if self.denied_node_types.iter().any(|p| p.matches(node_type)) {
            return Err(BlueprintError::permission_denied(format!(
                "node type '{}' is denied",
                node_type
            )));
        }
        if !self.allowed_node_types.is_empty()
            && !self.allowed_node_types.iter().any(|p| p.matches(node_type))
        {
            return Err(BlueprintError::permission_denied(format!(
                "node type '{}' is not in the allowed list",
                node_type
            )));
        }
        if let Some(cap) = capabilities.iter().find(|c| !level.allows(**c)) {
            return Err(BlueprintError::permission_denied(format!(
                "node type '{}' requires {:?} access, not permitted at level '{}'",
                node_type, cap, level
            ))
            .with_detail("nodeType", node_type));
        }
        Ok(())
    }

    /// Is this URL allowed? Returns the parsed URL on success.
    pub fn check_url(&self, raw: &str, level: PermissionLevel) -> Result<Url> {
        if !level.allows(Capability::Network) {
            return Err(BlueprintError::permission_denied(format!(
                "network access is not permitted at level '{}'",
                level
            )));
        }
        let url = Url::parse(raw).map_err(|e| {
            BlueprintError::validation(ErrorCode::InvalidInput, format!("invalid URL '{}'", raw))
                .with_cause(e)
        })?;
        if level == PermissionLevel::Admin {
            return Ok(url);
        }
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BlueprintError::permission_denied(format!(
                "URL scheme '{}' is not allowed",
                url.scheme()
            )));
        }

        let blocked = match url.host() {
            None => true,
            Some(Host::Domain(domain)) => {
                let domain = domain.to_ascii_lowercase();
                self.blocked_hosts.iter().any(|p| p.matches(&domain))
            }
            Some(Host::Ipv4(ip)) => self.is_blocked_ip(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => self.is_blocked_ip(IpAddr::V6(ip)),
        };
        if blocked {
            return Err(BlueprintError::permission_denied(format!(
                "host of '{}' is blocked",
                raw
            )));
        }
        Ok(url)
    }

    fn is_blocked_ip(&self, ip: IpAddr) -> bool {
        if self.blocked_hosts.iter().any(|p| p.matches(&ip.to_string())) {
            return true;
        }
        self.config.block_private_networks && is_internal_ip(ip)
    }

    /// Is this filesystem path allowed?
    pub fn check_path(&self, raw: &str, level: PermissionLevel) -> Result<()> {
        if !level.allows(Capability::Filesystem) {
            return Err(BlueprintError::permission_denied(format!(
                "filesystem access is not permitted at level '{}'",
                level
            )));
        }
        if level == PermissionLevel::Admin {
            return Ok(());
        }

        let path = Path::new(raw);
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(BlueprintError::permission_denied(format!(
                "path '{}' contains parent traversal",
                raw
            )));
        }

        if !self.config.allowed_paths.is_empty() {
            let allowed = self
                .config
                .allowed_paths
                .iter()
                .any(|allowed| path.starts_with(allowed));
            if !allowed {
                return Err(BlueprintError::permission_denied(format!(
                    "path '{}' is not in the allowed paths list",
                    raw
                )));
            }
            return Ok(());
        }

        for blocked in &self.config.blocked_paths {
            let hit = if blocked.contains('*') {
                path.ancestors()
                    .any(|a| WildMatch::new(blocked).matches(&a.to_string_lossy()))
            } else {
                path.starts_with(blocked)
            };
            if hit {
                return Err(BlueprintError::permission_denied(format!(
                    "path '{}' is blocked (matches '{}')",
                    raw, blocked
                )));
            }
        }
        Ok(())
    }

    /// Is this command line allowed?
    pub fn check_command(&self, command: &str, level: PermissionLevel) -> Result<()> {
        if !level.allows(Capability::Command) {
            return Err(BlueprintError::permission_denied(format!(
                "command execution is not permitted at level '{}'",
                level
            )));
        }
        if level == PermissionLevel::Admin {
            return Ok(());
        }

        let program = command
            .split_whitespace()
            .next()
            .map(|p| p.rsplit('/').next().unwrap_or(p))
            .unwrap_or_default();
        if program.is_empty() {
            return Err(BlueprintError::validation(
                ErrorCode::InvalidInput,
                "empty command",
            ));
        }
        if self.config.blocked_commands.iter().any(|c| c == program) {
            return Err(BlueprintError::permission_denied(format!(
                "command '{}' is blocked",
                program
            )));
        }
        self.check_literal(command)
    }

    /// Scan a literal for injection patterns
    pub fn scan_injection(text: &str) -> Option<&'static str> {
        let lowered = text.to_lowercase();
        INJECTION_PATTERNS
            .iter()
            .copied()
            .find(|pattern| lowered.contains(pattern))
    }

    pub fn check_literal(&self, text: &str) -> Result<()> {
        match Self::scan_injection(text) {
            Some(pattern) => Err(BlueprintError::security(
                ErrorCode::InjectionDetected,
                format!("literal contains suspicious pattern '{}'", pattern.escape_debug()),
            )),
            None => Ok(()),
        }
    }
}

fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_internal_v4(v4),
            None => is_internal_v6(v6),
        },
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}
