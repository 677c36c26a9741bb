//! Session dispatch and the plumbing shared by both session handlers.
//!
//! A session channel ends up in exactly one of two handlers:
//! - [`interactive`]: a shell on a pseudo-terminal, with resize events
//! - [`command`]: a single command (or a stdin-driven shell) on plain pipes

pub mod command;
pub mod interactive;
mod state;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

use crate::error::Result;

pub use state::SessionState;

/// Terminal used when the client negotiated a PTY without naming one.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Bytes typed by the client. Closed when the client sends EOF or goes away.
/// Unbounded: the transport must never wait on a process that is not
/// reading, or window changes queue up behind the input.
pub type SessionInput = mpsc::UnboundedReceiver<Vec<u8>>;

/// Window size changes reported by the client, in arrival order.
pub type ResizeEvents = mpsc::UnboundedReceiver<WindowSize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

impl WindowSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Convert SSH wire dimensions (u32 columns/rows), saturating at u16::MAX.
    pub fn from_wire(col_width: u32, row_height: u32) -> Self {
        Self {
            rows: u16::try_from(row_height).unwrap_or(u16::MAX),
            cols: u16::try_from(col_width).unwrap_or(u16::MAX),
        }
    }
}

/// A client's pseudo-terminal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub size: WindowSize,
}

impl PtyRequest {
    pub fn new(term: &str, size: WindowSize) -> Self {
        let term = if term.is_empty() { DEFAULT_TERM } else { term };
        Self {
            term: term.to_string(),
            size,
        }
    }
}

/// What the client asked for when it started the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    pub pty: Option<PtyRequest>,
    /// Command tokens; empty means "the default shell".
    pub command: Vec<String>,
}

impl SessionRequest {
    /// A `shell` request.
    pub fn shell(pty: Option<PtyRequest>) -> Self {
        Self {
            pty,
            command: Vec::new(),
        }
    }

    /// An `exec` request. The raw command line is kept as one token so the
    /// shell sees the client's quoting untouched; a blank line is no command.
    pub fn exec(pty: Option<PtyRequest>, command_line: &str) -> Self {
        let command = if command_line.trim().is_empty() {
            Vec::new()
        } else {
            vec![command_line.to_string()]
        };
        Self { pty, command }
    }
}

/// Which handler a session goes to.
#[derive(Debug, PartialEq, Eq)]
pub enum Route<'a> {
    Interactive(&'a PtyRequest),
    OneShot(&'a [String]),
}

/// Route a session: a PTY with no command is interactive, everything else
/// (no PTY, or any command even with a PTY) is one-shot.
pub fn dispatch(request: &SessionRequest) -> Route<'_> {
    match &request.pty {
        Some(pty) if request.command.is_empty() => Route::Interactive(pty),
        _ => Route::OneShot(&request.command),
    }
}

/// The client-facing half of a session: where output, exit status and
/// channel teardown go.
pub trait SessionSink: Clone + Send + Sync + 'static {
    /// Process output, or a diagnostic for the client's terminal.
    fn data(&self, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Process standard error.
    fn stderr(&self, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;

    fn exit_status(&self, code: u32) -> impl Future<Output = ()> + Send;

    /// Send EOF and close the channel.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// A task handle that aborts the task when dropped.
///
/// Sessions hold their relay tasks (and the transport holds each session task)
/// through this, so tearing a session down never leaves a relay running.
#[derive(Debug)]
pub struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    pub fn new(handle: JoinHandle<T>) -> Self {
        Self(handle)
    }

    pub fn abort(&self) {
        self.0.abort();
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = std::result::Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
