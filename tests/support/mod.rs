// Shared helpers for session and gateway integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use solo_gateway::config::GatewayConfig;
use solo_gateway::error::SessionError;
use solo_gateway::session::SessionSink;

/// Config running sessions under `/bin/sh` with a short hangup grace.
pub fn sh_config() -> GatewayConfig {
    GatewayConfig {
        shell: "/bin/sh".into(),
        hangup_grace_secs: 2,
        ..GatewayConfig::default()
    }
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: Option<u32>,
    pub closed: bool,
}

/// A sink that remembers everything a session sent to its client.
#[derive(Clone, Default)]
pub struct RecordingSink {
    recorded: Arc<Mutex<Recorded>>,
    refuse_data: bool,
}

impl RecordingSink {
    /// A sink whose client has gone away: every write fails.
    pub fn refusing() -> Self {
        Self {
            refuse_data: true,
            ..Self::default()
        }
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.recorded.lock().unwrap().stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.recorded.lock().unwrap().stderr).into_owned()
    }

    pub fn exit_status(&self) -> Option<u32> {
        self.recorded.lock().unwrap().exit_status
    }

    pub fn closed(&self) -> bool {
        self.recorded.lock().unwrap().closed
    }

    /// Poll until stdout contains `needle` or `timeout` passes.
    pub async fn wait_for_stdout(&self, needle: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.stdout().contains(needle) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.stdout().contains(needle)
    }

    /// Poll until stdout carries a `pid=<n>.` marker and return `<n>`.
    pub async fn wait_for_pid(&self, timeout: Duration) -> Option<u32> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pid) = find_pid(&self.stdout()) {
                return Some(pid);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// The first `pid=<digits>.` marker in `text`. A terminal echoes the typed
/// `pid=$$.` too, which has no digits and is skipped.
pub fn find_pid(text: &str) -> Option<u32> {
    text.split("pid=").skip(1).find_map(|rest| {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if rest[digits..].starts_with('.') {
            rest[..digits].parse().ok()
        } else {
            None
        }
    })
}

/// Whether `pid` is still a live process. Zombies count as gone: they only
/// wait to be reaped.
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .is_none_or(|(_, fields)| !fields.starts_with('Z')),
        Err(_) => false,
    }
}

/// Poll until `pid` is gone or `timeout` passes.
pub async fn wait_until_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    !process_alive(pid)
}

impl SessionSink for RecordingSink {
    async fn data(&self, bytes: &[u8]) -> Result<(), SessionError> {
        if self.refuse_data {
            return Err(SessionError::ChannelClosed);
        }
        self.recorded.lock().unwrap().stdout.extend_from_slice(bytes);
        Ok(())
    }

    async fn stderr(&self, bytes: &[u8]) -> Result<(), SessionError> {
        if self.refuse_data {
            return Err(SessionError::ChannelClosed);
        }
        self.recorded.lock().unwrap().stderr.extend_from_slice(bytes);
        Ok(())
    }

    async fn exit_status(&self, code: u32) {
        self.recorded.lock().unwrap().exit_status = Some(code);
    }

    async fn close(&self) {
        self.recorded.lock().unwrap().closed = true;
    }
}
