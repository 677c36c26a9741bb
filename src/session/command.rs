//! One-shot command sessions: no PTY, process stdio wired to the channel.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{AbortOnDrop, SessionInput, SessionSink, SessionState};
use crate::config::GatewayConfig;

/// Exit status reported when the process gave us no code of its own.
pub const FALLBACK_EXIT_STATUS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Build the process for a command: `shell -c "<tokens joined by spaces>"`,
/// or the bare shell (reading commands from stdin) when there are none.
pub fn shell_command(shell: &Path, command: &[String]) -> Command {
    let mut cmd = Command::new(shell);
    if !command.is_empty() {
        cmd.arg("-c").arg(command.join(" "));
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Map how the process ended to the exit status sent to the client.
pub fn exit_status_code(status: &io::Result<ExitStatus>) -> u32 {
    match status {
        Ok(status) => status
            .code()
            .and_then(|code| u32::try_from(code).ok())
            .unwrap_or(FALLBACK_EXIT_STATUS),
        Err(_) => FALLBACK_EXIT_STATUS,
    }
}

/// Run one command to completion and report its exit status.
pub async fn run<S: SessionSink>(
    config: &GatewayConfig,
    command: &[String],
    input: SessionInput,
    sink: S,
) -> SessionState {
    let mut state = SessionState::Created;
    state.advance(SessionState::Spawning);

    let mut child = match shell_command(&config.shell, command).spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to start {}: {}", config.shell.display(), e);
            sink.exit_status(FALLBACK_EXIT_STATUS).await;
            sink.close().await;
            state.advance(SessionState::Failed);
            return state;
        }
    };
    state.advance(SessionState::Running);
    debug!(pid = child.id(), ?command, "Command started");

    let stdin_task = AbortOnDrop::new(tokio::spawn(feed_stdin(input, child.stdin.take())));

    // Each relay holds a sender; a message means the client stopped taking
    // output, a closed channel means both relays finished normally.
    let (gone_tx, mut gone_rx) = mpsc::channel::<()>(1);
    let mut relays = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        relays.push(AbortOnDrop::new(tokio::spawn(relay_output(
            stdout,
            sink.clone(),
            OutputStream::Stdout,
            gone_tx.clone(),
        ))));
    }
    if let Some(stderr) = child.stderr.take() {
        relays.push(AbortOnDrop::new(tokio::spawn(relay_output(
            stderr,
            sink.clone(),
            OutputStream::Stderr,
            gone_tx.clone(),
        ))));
    }
    drop(gone_tx);

    let status = tokio::select! {
        status = child.wait() => status,
        Some(()) = gone_rx.recv() => {
            debug!("Client stopped reading output, killing command");
            if let Err(e) = child.start_kill() {
                debug!("Kill failed: {}", e);
            }
            child.wait().await
        }
    };

    drain(relays, config.hangup_grace()).await;
    drop(stdin_task);

    let code = exit_status_code(&status);
    match &status {
        Ok(status) => {
            info!(code, "Command exited");
            state.advance(SessionState::Exited(status.code()));
        }
        Err(e) => {
            warn!("Failed to wait for command: {}", e);
            state.advance(SessionState::Failed);
        }
    }

    sink.exit_status(code).await;
    sink.close().await;
    state
}

/// Client → process stdin. Dropping the pipe at the end delivers EOF.
async fn feed_stdin(mut input: SessionInput, stdin: Option<ChildStdin>) {
    let Some(mut stdin) = stdin else {
        return;
    };
    while let Some(data) = input.recv().await {
        if stdin.write_all(&data).await.is_err() {
            break;
        }
    }
}

async fn relay_output<R, S>(mut pipe: R, sink: S, stream: OutputStream, gone: mpsc::Sender<()>)
where
    R: AsyncRead + Unpin,
    S: SessionSink,
{
    let mut buf = vec![0u8; 32768];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let sent = match stream {
                    OutputStream::Stdout => sink.data(&buf[..n]).await,
                    OutputStream::Stderr => sink.stderr(&buf[..n]).await,
                };
                if sent.is_err() {
                    let _ = gone.try_send(());
                    break;
                }
            }
            Err(e) => {
                debug!("{:?} read failed: {}", stream, e);
                break;
            }
        }
    }
}

/// Wait for output relays to finish, but not past `grace`: a background job
/// can hold the pipes open long after the command itself exited.
async fn drain(relays: Vec<AbortOnDrop<()>>, grace: Duration) {
    let all = async {
        for relay in relays {
            let _ = relay.await;
        }
    };
    if tokio::time::timeout(grace, all).await.is_err() {
        debug!("Output pipes still open {:?} after exit, dropping them", grace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn exit_code_is_passed_through() {
        assert_eq!(exit_status_code(&Ok(ExitStatus::from_raw(0))), 0);
        assert_eq!(exit_status_code(&Ok(ExitStatus::from_raw(42 << 8))), 42);
        assert_eq!(exit_status_code(&Ok(ExitStatus::from_raw(255 << 8))), 255);
    }

    #[test]
    fn no_code_maps_to_fallback() {
        // Terminated by SIGKILL: no exit code.
        assert_eq!(exit_status_code(&Ok(ExitStatus::from_raw(9))), FALLBACK_EXIT_STATUS);
        assert_eq!(
            exit_status_code(&Err(io::Error::other("wait failed"))),
            FALLBACK_EXIT_STATUS
        );
    }

    #[test]
    fn command_tokens_are_joined_for_the_shell() {
        let cmd = shell_command(Path::new("/bin/sh"), &["echo".to_string(), "hi".to_string()]);
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args, ["-c", "echo hi"]);
    }

    #[test]
    fn empty_command_runs_bare_shell() {
        let cmd = shell_command(Path::new("/bin/sh"), &[]);
        assert_eq!(cmd.as_std().get_program(), "/bin/sh");
        assert_eq!(cmd.as_std().get_args().count(), 0);
    }
}
