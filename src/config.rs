//! Gateway configuration loaded from TOML and command-line overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main gateway configuration.
///
/// Built once at startup and shared read-only (behind an `Arc`) with every
/// connection and session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// SSH server listen address (default: "0.0.0.0:2222")
    pub listen_addr: String,

    /// Path to the private host key. A missing or unreadable file means an
    /// ephemeral key is generated for this process.
    pub host_key_path: PathBuf,

    /// Path to the authorized_keys allow-list, re-read on every auth attempt.
    pub authorized_keys_path: PathBuf,

    /// Interpreter used for both interactive and one-shot sessions.
    pub shell: PathBuf,

    /// Seconds to wait for a process after its client hung up (and for output
    /// to drain after it exited) before killing/abandoning it.
    pub hangup_grace_secs: u64,

    /// Seconds russh waits before answering a rejected auth attempt.
    pub auth_rejection_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let ssh_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ssh");

        Self {
            listen_addr: "0.0.0.0:2222".to_string(),
            host_key_path: ssh_dir.join("single_user_host_key"),
            authorized_keys_path: ssh_dir.join("authorized_keys"),
            shell: default_shell(),
            hangup_grace_secs: 5,
            auth_rejection_secs: 1,
        }
    }
}

/// `$SHELL` if set and non-empty, otherwise `/bin/sh`.
pub fn default_shell() -> PathBuf {
    match std::env::var_os("SHELL") {
        Some(shell) if !shell.is_empty() => PathBuf::from(shell),
        _ => PathBuf::from("/bin/sh"),
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from a file, or return defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn hangup_grace(&self) -> Duration {
        Duration::from_secs(self.hangup_grace_secs)
    }

    pub fn auth_rejection_time(&self) -> Duration {
        Duration::from_secs(self.auth_rejection_secs)
    }
}
