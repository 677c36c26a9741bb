//! Interactive shell sessions on a pseudo-terminal.
//!
//! Handles:
//! - Spawning the configured shell on a fresh PTY with `TERM` set
//! - Relaying client input into the PTY and PTY output back to the client
//! - Applying window size changes as they arrive
//! - Tearing down once the shell exits or the client hangs up

use std::io;
use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use pty_process::{OwnedReadPty, OwnedWritePty, Pty, Size};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{AbortOnDrop, PtyRequest, ResizeEvents, SessionInput, SessionSink, SessionState, WindowSize};
use crate::config::GatewayConfig;
use crate::error::{Result, SessionError};

/// Run an interactive shell for one session.
///
/// No exit status is sent to the client on this path: the channel is simply
/// closed once the shell is gone. A PTY or spawn failure writes a one-line
/// diagnostic to the client and reports exit status 1 instead.
pub async fn run<S: SessionSink>(
    config: &GatewayConfig,
    request: &PtyRequest,
    input: SessionInput,
    resizes: ResizeEvents,
    sink: S,
) -> SessionState {
    let mut state = SessionState::Created;
    state.advance(SessionState::Spawning);

    let (mut child, pty) = match spawn_shell(&config.shell, request) {
        Ok(spawned) => spawned,
        Err(e) => {
            warn!("Interactive session failed to start: {}", e);
            let message = format!("Error allocating PTY: {}\r\n", e);
            let _ = sink.data(message.as_bytes()).await;
            sink.exit_status(1).await;
            sink.close().await;
            state.advance(SessionState::Failed);
            return state;
        }
    };
    state.advance(SessionState::Running);

    info!(
        pid = child.id(),
        shell = %config.shell.display(),
        term = %request.term,
        rows = request.size.rows,
        cols = request.size.cols,
        "Interactive shell started"
    );

    let (reader, writer) = pty.into_split();
    let (hangup_tx, hangup_rx) = mpsc::channel(1);
    let mut input_task = AbortOnDrop::new(tokio::spawn(relay_input(input, resizes, writer, hangup_tx)));
    let mut output_task = AbortOnDrop::new(tokio::spawn(relay_output(reader, sink.clone(), hangup_rx)));
    let grace = config.hangup_grace();

    let status = tokio::select! {
        status = child.wait() => {
            input_task.abort();
            status
        }
        _ = &mut input_task => {
            debug!("Client input closed, hanging up the terminal");
            reap_after_hangup(&mut child, grace).await
        }
    };

    // Output normally drains as soon as the last holder of the PTY peer is
    // gone; a background job that kept it open must not pin the session.
    if tokio::time::timeout(grace, &mut output_task).await.is_err() {
        debug!("PTY output still open {:?} after shell exit, dropping it", grace);
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("Failed to wait for shell: {}", e);
            None
        }
    };
    info!(?code, "Interactive shell exited");
    state.advance(SessionState::Exited(code));

    sink.close().await;
    state
}

/// Allocate a PTY and start `shell` on it. The PTY's peer end is only held
/// by the child once this returns. The child is killed if it is dropped.
fn spawn_shell(shell: &Path, request: &PtyRequest) -> Result<(Child, Pty)> {
    let (pty, pts) = pty_process::open().map_err(|e| SessionError::Pty {
        reason: e.to_string(),
    })?;

    let child = pty_process::Command::new(shell)
        .env("TERM", &request.term)
        .kill_on_drop(true)
        .spawn(pts)
        .map_err(|e| SessionError::Spawn {
            program: shell.display().to_string(),
            reason: e.to_string(),
        })?;

    // Sizing only sticks once the child holds the terminal on some platforms.
    if let Err(e) = pty.resize(to_pty_size(request.size)) {
        warn!("Failed to set initial PTY size: {}", e);
    }

    Ok((child, pty))
}

fn to_pty_size(size: WindowSize) -> Size {
    Size::new(size.rows, size.cols)
}

/// Client → PTY. Also applies resize events: both need the write half.
///
/// A resize is applied as soon as it arrives, even while a write is stuck on
/// a terminal nobody reads; the write resumes afterwards.
async fn relay_input(
    mut input: SessionInput,
    mut resizes: ResizeEvents,
    mut writer: OwnedWritePty,
    hangup: mpsc::Sender<()>,
) {
    let mut resizes_open = true;
    // Client bytes the PTY has not taken yet.
    let mut pending: Vec<u8> = Vec::new();
    let mut written = 0;

    loop {
        tokio::select! {
            biased;
            size = resizes.recv(), if resizes_open => match size {
                Some(size) => apply_resize(&writer, size),
                None => resizes_open = false,
            },
            // `write` is cancel safe, so losing the race to a resize drops no input.
            result = writer.write(&pending[written..]), if written < pending.len() => match result {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) => {
                    debug!("PTY write failed: {}", e);
                    break;
                }
            },
            data = input.recv(), if written == pending.len() => match data {
                Some(data) => {
                    pending = data;
                    written = 0;
                }
                None => break,
            },
        }
    }

    drop(writer);
    let _ = hangup.try_send(());
}

fn apply_resize(writer: &OwnedWritePty, size: WindowSize) {
    match writer.resize(to_pty_size(size)) {
        Ok(()) => debug!(rows = size.rows, cols = size.cols, "PTY resized"),
        Err(e) => warn!("Failed to resize PTY to {}x{}: {}", size.cols, size.rows, e),
    }
}

/// PTY → client, until the PTY closes, the client stops accepting data, or
/// the input side hangs up.
async fn relay_output<S: SessionSink>(
    mut reader: OwnedReadPty,
    sink: S,
    mut hangup: mpsc::Receiver<()>,
) {
    let mut buf = vec![0u8; 32768];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    if sink.data(&buf[..n]).await.is_err() {
                        break;
                    }
                }
                // EIO once the shell and everything it started closed the peer.
                Err(e) => {
                    debug!("PTY read ended: {}", e);
                    break;
                }
            },
            Some(()) = hangup.recv() => break,
        }
    }
}

/// The client is gone and the PTY is closing: give the shell `grace` to act
/// on the hangup, then kill it.
async fn reap_after_hangup(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(pid = child.id(), "Shell still running {:?} after hangup, killing it", grace);
            child.kill().await?;
            child.wait().await
        }
    }
}
