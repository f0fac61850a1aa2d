//! The per-connection bastion session (§4.8): shell-protocol handshake,
//! channel dispatch, the interactive command loop, and the proxy handoff.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use russh::server::{Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId};
use russh_keys::key::PublicKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use ndg_backend::{shell, HostKeyPolicy};
use ndg_registry::Registry;

use crate::authorized_keys::AuthorizedKeys;
use crate::line_editor::{LineReader, Outcome, SecretReader};

const DEFAULT_PTY_COLS: u32 = 120;
const DEFAULT_PTY_ROWS: u32 = 30;
const HANDOFF_TERM: &str = "xterm-256color";
const HANDOFF_COLS: u32 = 80;
const HANDOFF_ROWS: u32 = 24;

#[derive(Debug, Clone)]
struct PtyInfo {
    term: String,
    cols: u32,
    rows: u32,
}

/// Everything kept per open channel until we know what kind of channel it
/// is (a `pty-req` may arrive before we know whether a `shell` or `exec`
/// follows).
struct ChannelState {
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    input_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    window_change_tx: mpsc::UnboundedSender<(u32, u32)>,
    window_change_rx: Option<mpsc::UnboundedReceiver<(u32, u32)>>,
    pty: Option<PtyInfo>,
}

impl ChannelState {
    fn new() -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (window_change_tx, window_change_rx) = mpsc::unbounded_channel();
        ChannelState {
            input_tx,
            input_rx: Some(input_rx),
            window_change_tx,
            window_change_rx: Some(window_change_rx),
            pty: None,
        }
    }
}

pub struct BastionHandler {
    pub(crate) peer_addr: Option<SocketAddr>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) domain_suffix: String,
    pub(crate) authorized_keys: Arc<AuthorizedKeys>,
    pub(crate) host_key_policy: HostKeyPolicy,
    authenticated_user: Option<String>,
    channels: HashMap<ChannelId, ChannelState>,
}

impl BastionHandler {
    pub(crate) fn new(
        peer_addr: Option<SocketAddr>,
        registry: Arc<Registry>,
        domain_suffix: String,
        authorized_keys: Arc<AuthorizedKeys>,
        host_key_policy: HostKeyPolicy,
    ) -> Self {
        BastionHandler {
            peer_addr,
            registry,
            domain_suffix,
            authorized_keys,
            host_key_policy,
            authenticated_user: None,
            channels: HashMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl russh::server::Handler for BastionHandler {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.authorized_keys.accepts(public_key) {
            tracing::info!(peer = ?self.peer_addr, user, "bastion client authenticated");
            self.authenticated_user = Some(user.to_string());
            Ok(Auth::Accept)
        } else {
            tracing::warn!(peer = ?self.peer_addr, user, "bastion rejected unknown public key");
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), ChannelState::new());
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let cols = if col_width == 0 { DEFAULT_PTY_COLS } else { col_width };
        let rows = if row_height == 0 { DEFAULT_PTY_ROWS } else { row_height };
        if let Some(state) = self.channels.get_mut(&channel) {
            state.pty = Some(PtyInfo {
                term: term.to_string(),
                cols,
                rows,
            });
        }
        session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        let Some(state) = self.channels.get_mut(&channel) else {
            session.channel_failure(channel);
            return Ok(());
        };
        let Some(input_rx) = state.input_rx.take() else {
            session.channel_failure(channel);
            return Ok(());
        };
        let window_change_rx = state.window_change_rx.take();
        let pty = state.pty.clone();

        session.channel_success(channel);

        let handle = session.handle();
        let registry = Arc::clone(&self.registry);
        let domain_suffix = self.domain_suffix.clone();
        let user = self.authenticated_user.clone().unwrap_or_default();
        let host_key_policy = self.host_key_policy.clone();

        tokio::spawn(run_interactive(
            handle,
            channel,
            input_rx,
            window_change_rx,
            registry,
            domain_suffix,
            user,
            host_key_policy,
            pty,
        ));
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        // The shell protocol's `exec` request body carries a four-byte
        // big-endian length prefix ahead of the command text; skip it
        // before decoding (§6 framing).
        let body = if data.len() >= 4 {
            let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
            data.get(4..4 + len).unwrap_or(&data[4..])
        } else {
            data
        };
        let command = String::from_utf8_lossy(body).to_string();

        let Some(state) = self.channels.get_mut(&channel) else {
            session.channel_failure(channel);
            return Ok(());
        };
        let input_rx = state.input_rx.take();
        let window_change_rx = state.window_change_rx.take();
        let pty = state.pty.clone();

        session.channel_success(channel);

        let handle = session.handle();
        let registry = Arc::clone(&self.registry);
        let host_key_policy = self.host_key_policy.clone();
        let user = self.authenticated_user.clone().unwrap_or_default();

        tokio::spawn(run_one_shot(
            handle,
            channel,
            command,
            input_rx,
            window_change_rx,
            registry,
            user,
            host_key_policy,
            pty,
        ));
        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get(&channel) {
            let _ = state.input_tx.send(data.to_vec());
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get(&channel) {
            let _ = state.window_change_tx.send((col_width, row_height));
        }
        Ok(())
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        let mut state = ChannelState::new();
        let input_rx = state.input_rx.take().expect("freshly constructed");
        self.channels.insert(id, state);

        let handle = session.handle();
        let host = host_to_connect.to_string();
        let port = port_to_connect;
        tracing::info!(host, port, "bastion forwarding direct-tcpip channel");
        tokio::spawn(run_direct_tcpip(handle, id, host, port, input_rx));
        Ok(true)
    }
}

async fn write_str(handle: &Handle, channel: ChannelId, text: &str) {
    let _ = handle.data(channel, text.as_bytes().to_vec().into()).await;
}

/// Reads bytes from `input_rx` into `reader`, echoing as directed, until a
/// line-level outcome is produced or the input stream closes.
async fn read_line(
    reader: &mut LineReader,
    input_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    handle: &Handle,
    channel: ChannelId,
) -> Option<Outcome> {
    loop {
        let chunk = input_rx.recv().await?;
        for byte in chunk {
            let feed = reader.feed(byte);
            if !feed.echo.is_empty() {
                let _ = handle.data(channel, feed.echo.into()).await;
            }
            if let Some(outcome) = feed.outcome {
                return Some(outcome);
            }
        }
    }
}

async fn read_secret(
    input_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    handle: &Handle,
    channel: ChannelId,
) -> Option<Outcome> {
    let mut reader = SecretReader::new();
    loop {
        let chunk = input_rx.recv().await?;
        for byte in chunk {
            let feed = reader.feed(byte);
            if !feed.echo.is_empty() {
                let _ = handle.data(channel, feed.echo.into()).await;
            }
            if let Some(outcome) = feed.outcome {
                return Some(outcome);
            }
        }
    }
}

fn device_list_banner(registry: &Registry, domain_suffix: &str) -> String {
    let mut banner = String::from("Devices:\r\n");
    for name in registry.device_names() {
        banner.push_str("  ");
        banner.push_str(name);
        banner.push('.');
        banner.push_str(domain_suffix);
        banner.push_str("\r\n");
    }
    banner
}

#[allow(clippy::too_many_arguments)]
async fn run_interactive(
    handle: Handle,
    channel: ChannelId,
    mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut window_change_rx: Option<mpsc::UnboundedReceiver<(u32, u32)>>,
    registry: Arc<Registry>,
    domain_suffix: String,
    authenticated_user: String,
    host_key_policy: HostKeyPolicy,
    pty: Option<PtyInfo>,
) {
    write_str(&handle, channel, &device_list_banner(&registry, &domain_suffix)).await;

    loop {
        write_str(&handle, channel, "bastion> ").await;
        let mut reader = LineReader::new();
        match read_line(&mut reader, &mut input_rx, &handle, channel).await {
            None => break,
            Some(Outcome::Eof) => {
                write_str(&handle, channel, "exit\r\n").await;
                break;
            }
            Some(Outcome::Interrupted) => continue,
            Some(Outcome::Line(line)) => {
                let trimmed = line.trim();
                match trimmed {
                    "list" | "ls" => {
                        write_str(&handle, channel, &device_list_banner(&registry, &domain_suffix)).await;
                    }
                    "exit" | "quit" => {
                        write_str(&handle, channel, "Goodbye.\r\n").await;
                        break;
                    }
                    "" => {}
                    _ if trimmed.starts_with("ssh ") => {
                        let fqdn = trimmed[4..].trim().to_string();
                        proxy_handoff(
                            &handle,
                            channel,
                            &registry,
                            &fqdn,
                            &authenticated_user,
                            &host_key_policy,
                            pty.clone(),
                            &mut input_rx,
                            window_change_rx.as_mut(),
                        )
                        .await;
                    }
                    _ => {
                        write_str(&handle, channel, "unrecognized command\r\n").await;
                    }
                }
            }
        }
    }

    let _ = handle.close(channel).await;
}

#[allow(clippy::too_many_arguments)]
async fn run_one_shot(
    handle: Handle,
    channel: ChannelId,
    command: String,
    input_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    window_change_rx: Option<mpsc::UnboundedReceiver<(u32, u32)>>,
    registry: Arc<Registry>,
    authenticated_user: String,
    host_key_policy: HostKeyPolicy,
    pty: Option<PtyInfo>,
) {
    let mut input_rx = input_rx.unwrap_or_else(|| mpsc::unbounded_channel().1);
    let mut window_change_rx = window_change_rx;
    let trimmed = command.trim();
    match trimmed {
        "list" | "ls" => {
            write_str(&handle, channel, &device_list_banner(&registry, "")).await;
        }
        _ if trimmed.starts_with("ssh ") => {
            let fqdn = trimmed[4..].trim().to_string();
            proxy_handoff(
                &handle,
                channel,
                &registry,
                &fqdn,
                &authenticated_user,
                &host_key_policy,
                pty,
                &mut input_rx,
                window_change_rx.as_mut(),
            )
            .await;
        }
        "" => {}
        _ => {
            write_str(&handle, channel, "unrecognized command\r\n").await;
        }
    }
    let _ = handle.close(channel).await;
}

#[allow(clippy::too_many_arguments)]
async fn proxy_handoff(
    handle: &Handle,
    channel: ChannelId,
    registry: &Registry,
    fqdn: &str,
    default_user: &str,
    host_key_policy: &HostKeyPolicy,
    pty: Option<PtyInfo>,
    input_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    window_change_rx: Option<&mut mpsc::UnboundedReceiver<(u32, u32)>>,
) {
    let (entry, _device_name) = match registry.resolve(fqdn) {
        Ok(pair) => pair,
        Err(e) => {
            write_str(handle, channel, &format!("{e}\r\n")).await;
            return;
        }
    };

    write_str(handle, channel, "Connecting\u{2026}\r\n").await;

    write_str(handle, channel, &format!("user [{default_user}]: ")).await;
    let user = match read_line(&mut LineReader::new(), input_rx, handle, channel).await {
        Some(Outcome::Line(line)) if !line.trim().is_empty() => line.trim().to_string(),
        Some(Outcome::Line(_)) => default_user.to_string(),
        _ => return,
    };

    write_str(handle, channel, "secret: ").await;
    let secret = match read_secret(input_rx, handle, channel).await {
        Some(Outcome::Line(secret)) => secret,
        _ => return,
    };

    let (term, cols, rows) = match &pty {
        Some(info) => (info.term.clone(), info.cols, info.rows),
        None => (HANDOFF_TERM.to_string(), HANDOFF_COLS, HANDOFF_ROWS),
    };

    match shell::connect_interactive(
        &entry.hostname,
        entry.shell_port,
        &user,
        &secret,
        &term,
        cols,
        rows,
        host_key_policy.clone(),
    )
    .await
    {
        Ok(mut backend) => {
            relay_to_backend(handle, channel, &mut backend, input_rx, window_change_rx).await;
        }
        Err(e) => {
            write_str(handle, channel, &format!("connection failed: {}\r\n", e.message)).await;
        }
    }

    write_str(handle, channel, "Connection closed.\r\n").await;
}

/// Bidirectional relay between the inbound channel and a live backend
/// shell session, forwarding window-change notifications as they arrive.
/// Ends as soon as the backend session ends.
async fn relay_to_backend(
    handle: &Handle,
    channel: ChannelId,
    backend: &mut shell::InteractiveShellSession,
    input_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    window_change_rx: Option<&mut mpsc::UnboundedReceiver<(u32, u32)>>,
) {
    let mut no_resize = mpsc::unbounded_channel().1;
    let window_change_rx = window_change_rx.unwrap_or(&mut no_resize);

    loop {
        tokio::select! {
            biased;

            data = backend.read() => {
                match data {
                    Some(bytes) => {
                        let _ = handle.data(channel, bytes.into()).await;
                    }
                    None => break,
                }
            }
            maybe_bytes = input_rx.recv() => {
                match maybe_bytes {
                    Some(bytes) => {
                        if backend.write(&bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_resize = window_change_rx.recv() => {
                if let Some((cols, rows)) = maybe_resize {
                    let _ = backend.window_change(cols, rows).await;
                }
            }
        }
    }
}

/// Bidirectional byte copy for a `direct-tcpip` forwarding channel (§4.8):
/// dial the forwarded target, then copy until either side closes.
async fn run_direct_tcpip(
    handle: Handle,
    channel: ChannelId,
    host: String,
    port: u32,
    mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let mut stream = match TcpStream::connect((host.as_str(), port as u16)).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(host, port, error = %e, "direct-tcpip forward failed to connect");
            let _ = handle.close(channel).await;
            return;
        }
    };

    let mut buf = [0u8; 8192];
    loop {
        tokio::select! {
            biased;

            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let _ = handle.data(channel, buf[..n].to_vec().into()).await;
                    }
                }
            }
            maybe_bytes = input_rx.recv() => {
                match maybe_bytes {
                    Some(bytes) => {
                        if stream.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    let _ = handle.close(channel).await;
}
