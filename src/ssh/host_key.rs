//! Server identity key.

use std::path::Path;

use anyhow::{Context, Result};
use russh::keys::PrivateKey;
use russh::keys::ssh_key::Algorithm;
use russh::keys::ssh_key::rand_core::OsRng;
use tracing::{info, warn};

/// Load the host key from `path`, or fall back to an ephemeral Ed25519 key.
///
/// The ephemeral key is never written to disk, so the server fingerprint
/// changes on every restart until a real key file is provided.
pub fn load_or_ephemeral(path: &Path) -> Result<PrivateKey> {
    if path.exists() {
        match russh::keys::load_secret_key(path, None) {
            Ok(key) => {
                info!("Using host key: {}", path.display());
                return Ok(key);
            }
            Err(e) => {
                warn!(
                    "Could not load host key from {}: {}. Using ephemeral key.",
                    path.display(),
                    e
                );
            }
        }
    } else {
        info!("Host key not found at {}. Using ephemeral key.", path.display());
    }

    PrivateKey::random(&mut OsRng, Algorithm::Ed25519).context("Failed to generate ephemeral host key")
}
