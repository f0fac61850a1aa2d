//! The config-protocol backend adapter (§4.4): an XML RPC exchange framed
//! by the `]]>]]>` delimiter, transported over the shell protocol's
//! `netconf` subsystem.
//!
//! The 100/200/500 ms waits below are budgeted quiescence windows, not
//! synchronization primitives (§4.4) — they are kept as literal sleeps
//! rather than replaced with readiness-driven reads, per the explicit
//! instruction that doing so is an optional, per-backend enhancement.

use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::ChannelMsg;

use crate::common::{AdapterFailure, HostKeyPolicy, InsecureClientHandler, BACKEND_CONNECT_TIMEOUT};

/// The NETCONF message delimiter (base:1.0 framing).
pub const DELIMITER: &str = "]]>]]>";

const POST_HELLO_WAIT: Duration = Duration::from_millis(200);
const POST_RPC_WAIT: Duration = Duration::from_millis(500);

const HELLO: &str = concat!(
    "<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">",
    "<capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities>",
    "</hello>",
);

fn wrap_rpc(message_id: &str, body: &str) -> String {
    format!(
        "<rpc message-id=\"{message_id}\" xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">{body}</rpc>"
    )
}

pub async fn execute(
    host: &str,
    port: u16,
    user: &str,
    secret: &str,
    rpc_body: &str,
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
        .request_subsystem(true, "netconf")
        .await
        .map_err(|e| AdapterFailure::new("", format!("failed to request netconf subsystem: {e}")))?;

    let mut output = String::new();

    if let Err(e) = send(&mut channel, &format!("{HELLO}{DELIMITER}")).await {
        return Err(AdapterFailure::new(output, format!("sending hello failed: {e}")));
    }
    tokio::time::sleep(POST_HELLO_WAIT).await;

    let framed_rpc = if rpc_body.contains("<rpc") {
        format!("{rpc_body}{DELIMITER}")
    } else {
        format!("{}{DELIMITER}", wrap_rpc("1", rpc_body))
    };
    if let Err(e) = send(&mut channel, &framed_rpc).await {
        return Err(AdapterFailure::new(output, format!("sending rpc failed: {e}")));
    }
    tokio::time::sleep(POST_RPC_WAIT).await;

    // Best-effort close, even if an earlier send already failed (§7).
    let close_rpc = format!(
        "{}{DELIMITER}",
        wrap_rpc("2", "<close-session/>")
    );
    let _ = send(&mut channel, &close_rpc).await;
    let _ = channel.eof().await;

    loop {
        let Some(msg) = channel.wait().await else {
            break;
        };
        match msg {
            ChannelMsg::Data { ref data } => output.push_str(&String::from_utf8_lossy(data)),
            ChannelMsg::ExtendedData { ref data, .. } => {
                output.push_str(&String::from_utf8_lossy(data))
            }
            ChannelMsg::Eof | ChannelMsg::Close => break,
            _ => {}
        }
    }

    Ok(output)
}

async fn send(channel: &mut russh::Channel<client::Msg>, data: &str) -> Result<(), russh::Error> {
    channel.data(data.as_bytes()).await
}
