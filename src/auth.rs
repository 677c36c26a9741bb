//! Public key allow-list backed by an `authorized_keys` file.
//!
//! The file is the single source of truth: it is read fresh on every check,
//! so edits take effect on the next connection attempt without a restart.

use std::path::{Path, PathBuf};

use russh::keys::PublicKey;
use tracing::{debug, warn};

/// Decision applied when the allow-list cannot be read: reject everyone.
pub const UNREADABLE_ALLOW_LIST_POLICY: bool = false;

/// Answers "is this key allowed in?" against an `authorized_keys` file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check a candidate key against the allow-list as it is on disk right now.
    ///
    /// Keys are compared by key material, so comments and options on the
    /// stored entry do not matter. Never logs which keys were compared.
    pub async fn is_authorized(&self, candidate: &PublicKey) -> bool {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) => {
                warn!("Auth error: could not read {}: {}", self.path.display(), e);
                return UNREADABLE_ALLOW_LIST_POLICY;
            }
        };

        allow_list_contains(&String::from_utf8_lossy(&data), candidate)
    }
}

/// Scan `authorized_keys` text for `candidate`.
///
/// Stops at the first record that fails to parse: entries before it are
/// honored, entries after it are not.
pub fn allow_list_contains(contents: &str, candidate: &PublicKey) -> bool {
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_authorized_key(line) {
            Some(allowed) => {
                if allowed.key_data() == candidate.key_data() {
                    return true;
                }
            }
            None => {
                debug!("Stopping allow-list scan at unparseable record on line {}", lineno + 1);
                return false;
            }
        }
    }
    false
}

/// Parse one `authorized_keys` record, with or without a leading options field.
fn parse_authorized_key(line: &str) -> Option<PublicKey> {
    if let Ok(key) = PublicKey::from_openssh(line) {
        return Some(key);
    }

    let rest = strip_options(line)?;
    PublicKey::from_openssh(rest).ok()
}

/// Skip the options field (`no-pty,command="a b" ssh-ed25519 ...`).
/// Whitespace inside double quotes does not end the field.
fn strip_options(line: &str) -> Option<&str> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                let rest = line[idx..].trim_start();
                return (!rest.is_empty()).then_some(rest);
            }
            _ => {}
        }
    }
    None
}
