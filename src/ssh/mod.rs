//! SSH server implementation using russh.
//!
//! Handles:
//! - Public key authentication against the authorized_keys allow-list
//! - Session channels (shell, exec), routed to the session handlers
//! - Port forwarding requests, all of which are refused

mod host_key;
mod sink;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use russh::keys::PublicKey;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::CredentialStore;
use crate::config::GatewayConfig;
use crate::forward::{allow_local_forward, allow_reverse_forward};
use crate::session::{
    AbortOnDrop, PtyRequest, Route, SessionRequest, WindowSize, command, dispatch, interactive,
};

pub use host_key::load_or_ephemeral as load_host_key;
pub use sink::ChannelSink;

/// Shared state for the SSH server.
pub struct ServerState {
    pub config: Arc<GatewayConfig>,
    pub credentials: CredentialStore,
}

/// Per-connection handler state.
pub struct ConnectionHandler {
    /// Shared server state.
    server: Arc<ServerState>,

    /// Client's socket address.
    peer_addr: SocketAddr,

    /// Open session channels.
    channels: HashMap<ChannelId, SessionChannel>,
}

/// One session channel. Dropping it aborts the session task, and with it the
/// process (spawned with kill-on-drop).
#[derive(Default)]
struct SessionChannel {
    /// Set by pty_request, consumed when the session starts.
    pty: Option<PtyRequest>,

    /// Client input for the running process; `None` after EOF.
    stdin_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,

    /// Window changes for a running interactive session.
    resize_tx: Option<mpsc::UnboundedSender<WindowSize>>,

    task: Option<AbortOnDrop<()>>,
}

impl ConnectionHandler {
    fn new(server: Arc<ServerState>, peer_addr: SocketAddr) -> Self {
        Self {
            server,
            peer_addr,
            channels: HashMap::new(),
        }
    }

    fn reject() -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(MethodSet::from(&[MethodKind::PublicKey][..])),
            partial_success: false,
        }
    }

    async fn is_authorized(&self, public_key: &PublicKey) -> bool {
        self.server.credentials.is_authorized(public_key).await
    }

    /// Start the process for a session channel and wire it to the channel.
    fn start_session(
        &mut self,
        channel_id: ChannelId,
        request: SessionRequest,
        session: &mut Session,
    ) -> Result<()> {
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            warn!("Session request on unknown channel {:?}", channel_id);
            session.channel_failure(channel_id)?;
            return Ok(());
        };

        if channel.task.is_some() {
            warn!(
                "Refusing second process on channel {:?} from {}",
                channel_id, self.peer_addr
            );
            session.channel_failure(channel_id)?;
            return Ok(());
        }

        let config = self.server.config.clone();
        let sink = ChannelSink::new(session.handle(), channel_id);
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let peer_addr = self.peer_addr;

        let task = match dispatch(&request) {
            Route::Interactive(pty) => {
                info!("Interactive session on channel {:?} from {}", channel_id, peer_addr);
                let pty = pty.clone();
                let (resize_tx, resize_rx) = mpsc::unbounded_channel();
                channel.resize_tx = Some(resize_tx);
                tokio::spawn(async move {
                    let outcome = interactive::run(&config, &pty, stdin_rx, resize_rx, sink).await;
                    debug!(?outcome, "Interactive session on channel {:?} ended", channel_id);
                })
            }
            Route::OneShot(tokens) => {
                info!(
                    "Command session on channel {:?} from {}: {:?}",
                    channel_id, peer_addr, tokens
                );
                let tokens = tokens.to_vec();
                tokio::spawn(async move {
                    let outcome = command::run(&config, &tokens, stdin_rx, sink).await;
                    debug!(?outcome, "Command session on channel {:?} ended", channel_id);
                })
            }
        };

        channel.stdin_tx = Some(stdin_tx);
        channel.task = Some(AbortOnDrop::new(task));

        session.channel_success(channel_id)?;
        Ok(())
    }

    fn pending_pty(&mut self, channel_id: ChannelId) -> Option<PtyRequest> {
        self.channels.get_mut(&channel_id).and_then(|c| c.pty.take())
    }
}

impl Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!("Session channel opened: {:?}", channel.id());
        self.channels.insert(channel.id(), SessionChannel::default());
        Ok(true)
    }

    /// Key offered without a signature yet.
    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.is_authorized(public_key).await {
            debug!("Public key offered for '{}' from {} is allowed", user, self.peer_addr);
            Ok(Auth::Accept)
        } else {
            debug!("Rejected public key for '{}' from {}", user, self.peer_addr);
            Ok(Self::reject())
        }
    }

    /// Key with a verified signature. The allow-list is consulted again: it
    /// may have changed since the offer.
    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.is_authorized(public_key).await {
            info!("Accepted public key for '{}' from {}", user, self.peer_addr);
            Ok(Auth::Accept)
        } else {
            debug!("Rejected public key for '{}' from {}", user, self.peer_addr);
            Ok(Self::reject())
        }
    }

    async fn pty_request(
        &mut self,
        channel_id: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(
            "PTY request: channel={:?}, term={}, cols={}, rows={}",
            channel_id, term, col_width, row_height
        );

        match self.channels.get_mut(&channel_id) {
            Some(channel) if channel.task.is_none() => {
                channel.pty = Some(PtyRequest::new(term, WindowSize::from_wire(col_width, row_height)));
                session.channel_success(channel_id)?;
            }
            _ => session.channel_failure(channel_id)?,
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let pty = self.pending_pty(channel_id);
        self.start_session(channel_id, SessionRequest::shell(pty), session)
    }

    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data);
        debug!("Exec request on channel {:?}: {}", channel_id, command);

        let pty = self.pending_pty(channel_id);
        self.start_session(channel_id, SessionRequest::exec(pty, &command), session)
    }

    async fn window_change_request(
        &mut self,
        channel_id: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(
            "Window change: channel={:?}, cols={}, rows={}",
            channel_id, col_width, row_height
        );

        let size = WindowSize::from_wire(col_width, row_height);
        if let Some(channel) = self.channels.get_mut(&channel_id) {
            if let Some(ref tx) = channel.resize_tx {
                let _ = tx.send(size);
            } else if let Some(ref mut pty) = channel.pty {
                pty.size = size;
            }
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(channel) = self.channels.get(&channel_id) {
            if let Some(ref tx) = channel.stdin_tx {
                let _ = tx.send(data.to_vec());
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!("Channel EOF: {:?}", channel_id);
        // Drop the stdin sender to signal EOF to the process
        if let Some(channel) = self.channels.get_mut(&channel_id) {
            channel.stdin_tx = None;
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!("Channel closed: {:?}", channel_id);
        self.channels.remove(&channel_id);
        Ok(())
    }

    /// Handle direct-tcpip (local port forward) request.
    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(allow_local_forward(self.peer_addr, host_to_connect, port_to_connect))
    }

    /// Handle tcpip-forward request (remote port forward).
    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(allow_reverse_forward(self.peer_addr, address, *port))
    }
}

/// A bound, not yet serving, SSH gateway.
pub struct Gateway {
    listener: TcpListener,
    russh_config: Arc<russh::server::Config>,
    server_state: Arc<ServerState>,
}

impl Gateway {
    /// Load the host key and bind the listen address.
    pub async fn bind(config: Arc<GatewayConfig>) -> Result<Self> {
        let key = load_host_key(&config.host_key_path)?;

        let russh_config = Arc::new(russh::server::Config {
            auth_rejection_time: config.auth_rejection_time(),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            methods: MethodSet::from(&[MethodKind::PublicKey][..]),
            keys: vec![key],
            ..Default::default()
        });

        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address: {}", config.listen_addr))?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        let server_state = Arc::new(ServerState {
            credentials: CredentialStore::new(&config.authorized_keys_path),
            config,
        });

        Ok(Self {
            listener,
            russh_config,
            server_state,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped. Each connection runs on
    /// its own task; nothing a single connection does ends the loop.
    pub async fn serve(self) -> Result<()> {
        info!("SSH server listening on {}", self.listener.local_addr()?);

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            debug!("Connection from {}", peer_addr);

            let server_state = self.server_state.clone();
            let russh_config = self.russh_config.clone();

            tokio::spawn(async move {
                let handler = ConnectionHandler::new(server_state, peer_addr);
                match russh::server::run_stream(russh_config, stream, handler).await {
                    Ok(session) => {
                        if let Err(e) = session.await {
                            warn!("SSH session error from {}: {}", peer_addr, e);
                        }
                    }
                    Err(e) => {
                        warn!("SSH connection error from {}: {}", peer_addr, e);
                    }
                }
            });
        }
    }
}

/// Run the SSH server until Ctrl-C.
pub async fn run_server(config: Arc<GatewayConfig>) -> Result<()> {
    let gateway = Gateway::bind(config).await?;

    tokio::select! {
        result = gateway.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
