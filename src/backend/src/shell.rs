//! The shell backend adapter (§4.2): run one non-interactive command over
//! the shell protocol and capture its output.

use std::sync::Arc;

use russh::client;
use russh::ChannelMsg;

use crate::common::{AdapterFailure, HostKeyPolicy, InsecureClientHandler, BACKEND_CONNECT_TIMEOUT};

/// Runs `command` on `host:port` as `user`/`secret`, returning concatenated
/// standard output on success.
///
/// On a nonzero remote exit, or on a transport failure partway through, the
/// output accumulated so far is still returned via [`AdapterFailure`].
pub async fn execute(
    host: &str,
    port: u16,
    user: &str,
    secret: &str,
    command: &str,
    host_key_policy: HostKeyPolicy,
) -> Result<String, AdapterFailure> {
    let config = Arc::new(client::Config {
        connection_timeout: Some(BACKEND_CONNECT_TIMEOUT),
        ..Default::default()
    });
    let handler = InsecureClientHandler::new(host_key_policy);

    let mut session = tokio::time::timeout(
        BACKEND_CONNECT_TIMEOUT,
        client::connect(config, (host, port), handler),
    )
    .await
    .map_err(|_| AdapterFailure::new("", format!("connect to {host}:{port} timed out")))?
    .map_err(|e| AdapterFailure::new("", format!("connect to {host}:{port} failed: {e}")))?;

    let authenticated = session
        .authenticate_password(user, secret)
        .await
        .map_err(|e| AdapterFailure::new("", format!("authentication failed: {e}")))?;
    if !authenticated {
        return Err(AdapterFailure::new("", "authentication rejected"));
    }

    let mut channel = session
        .channel_open_session()
        .await
        .map_err(|e| AdapterFailure::new("", format!("failed to open session channel: {e}")))?;
    channel
        .exec(true, command)
        .await
        .map_err(|e| AdapterFailure::new("", format!("failed to exec command: {e}")))?;

    let mut output = String::new();
    let mut exit_status: Option<u32> = None;
    loop {
        let Some(msg) = channel.wait().await else {
            break;
        };
        match msg {
            ChannelMsg::Data { ref data } => {
                output.push_str(&String::from_utf8_lossy(data));
            }
            ChannelMsg::ExtendedData { ref data, .. } => {
                output.push_str(&String::from_utf8_lossy(data));
            }
            ChannelMsg::ExitStatus { exit_status: code } => {
                exit_status = Some(code);
            }
            ChannelMsg::Eof | ChannelMsg::Close => break,
            _ => {}
        }
    }

    match exit_status {
        Some(0) | None => Ok(output),
        Some(code) => Err(AdapterFailure::new(
            output,
            format!("remote command exited with status {code}"),
        )),
    }
}

/// A live interactive shell session opened on a backend device, used by
/// the shell bastion's proxy handoff (§4.8) rather than one-shot command
/// execution.
pub struct InteractiveShellSession {
    // Kept alive only so the underlying connection is not dropped out from
    // under `channel`; never read from directly.
    _session: client::Handle<InsecureClientHandler>,
    channel: russh::Channel<client::Msg>,
}

impl InteractiveShellSession {
    /// Blocks for the next chunk of output, or returns `None` once the
    /// backend session has ended.
    pub async fn read(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.channel.wait().await? {
                ChannelMsg::Data { ref data } => return Some(data.to_vec()),
                ChannelMsg::ExtendedData { ref data, .. } => return Some(data.to_vec()),
                ChannelMsg::Eof | ChannelMsg::Close | ChannelMsg::ExitStatus { .. } => return None,
                _ => continue,
            }
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), russh::Error> {
        self.channel.data(data).await
    }

    pub async fn window_change(&mut self, cols: u32, rows: u32) -> Result<(), russh::Error> {
        self.channel.window_change(cols, rows, 0, 0).await
    }
}

/// Opens an interactive shell session (PTY + `shell` request) rather than
/// running a single command, for the bastion's proxy handoff.
pub async fn connect_interactive(
    host: &str,
    port: u16,
    user: &str,
    secret: &str,
    term: &str,
    cols: u32,
    rows: u32,
    host_key_policy: HostKeyPolicy,
) -> Result<InteractiveShellSession, AdapterFailure> {
    let config = Arc::new(client::Config {
        connection_timeout: Some(BACKEND_CONNECT_TIMEOUT),
        ..Default::default()
    });
    let handler = InsecureClientHandler::new(host_key_policy);

    let mut session = tokio::time::timeout(
        BACKEND_CONNECT_TIMEOUT,
        client::connect(config, (host, port), handler),
    )
    .await
    .map_err(|_| AdapterFailure::new("", format!("connect to {host}:{port} timed out")))?
    .map_err(|e| AdapterFailure::new("", format!("connect to {host}:{port} failed: {e}")))?;

    let authenticated = session
        .authenticate_password(user, secret)
        .await
        .map_err(|e| AdapterFailure::new("", format!("authentication failed: {e}")))?;
    if !authenticated {
        return Err(AdapterFailure::new("", "authentication rejected"));
    }

    let mut channel = session
        .channel_open_session()
        .await
        .map_err(|e| AdapterFailure::new("", format!("failed to open session channel: {e}")))?;
    channel
        .request_pty(false, term, cols, rows, 0, 0, &[])
        .await
        .map_err(|e| AdapterFailure::new("", format!("pty request failed: {e}")))?;
    channel
        .request_shell(true)
        .await
        .map_err(|e| AdapterFailure::new("", format!("shell request failed: {e}")))?;

    Ok(InteractiveShellSession {
        _session: session,
        channel,
    })
}
