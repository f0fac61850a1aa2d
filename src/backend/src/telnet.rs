//! The line-protocol backend adapter (§4.3): a raw-TCP prompt/credential
//! handshake followed by a single command, reading output until
//! quiescence.
//!
//! Every read in this adapter is appended to the returned output, including
//! the banner and the login prompts — that is deliberate (§4.3), to aid
//! debugging a device that rejected the handshake partway through.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use ndg_server_core::Deadline;

use crate::common::{AdapterFailure, BACKEND_CONNECT_TIMEOUT};

const POST_COMMAND_WAIT: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 4096;

/// Opens the connection and runs the whole banner/username/password/command
/// handshake against a single overall deadline (§4.3: "a raw TCP connection
/// with a 30-second overall deadline"), not a per-step one.
pub async fn execute(
    host: &str,
    port: u16,
    user: &str,
    secret: &str,
    command: &str,
) -> Result<String, AdapterFailure> {
    let deadline = Deadline::after(BACKEND_CONNECT_TIMEOUT);

    let mut stream = tokio::time::timeout(deadline.remaining(), TcpStream::connect((host, port)))
        .await
        .map_err(|_| AdapterFailure::new("", format!("connect to {host}:{port} timed out")))?
        .map_err(|e| AdapterFailure::new("", format!("connect to {host}:{port} failed: {e}")))?;

    let mut output = String::new();

    macro_rules! read_phase {
        ($phase:expr) => {
            match read_once(&mut stream, &deadline).await {
                Ok(chunk) => output.push_str(&chunk),
                Err(e) => {
                    return Err(AdapterFailure::new(
                        output,
                        format!("{} failed: {e}", $phase),
                    ))
                }
            }
        };
    }
    macro_rules! write_phase {
        ($phase:expr, $line:expr) => {
            if let Err(e) = tokio::time::timeout(
                deadline.remaining(),
                stream.write_all(format!("{}\r\n", $line).as_bytes()),
            )
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))
            {
                return Err(AdapterFailure::new(
                    output,
                    format!("{} failed: {e}", $phase),
                ));
            }
        };
    }

    read_phase!("reading banner");
    write_phase!("sending username", user);
    read_phase!("reading username prompt");
    write_phase!("sending password", secret);
    read_phase!("reading post-login output");
    write_phase!("sending command", command);

    tokio::time::sleep(POST_COMMAND_WAIT.min(deadline.remaining())).await;
    match read_once(&mut stream, &deadline).await {
        Ok(chunk) => output.push_str(&chunk),
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            // An idle read after the command is end-of-output, not failure (§4.3/§7).
        }
        Err(e) => return Err(AdapterFailure::new(output, format!("reading output failed: {e}"))),
    }

    // Best-effort logout; no read is required to follow it.
    let _ = stream.write_all(b"exit\r\n").await;

    Ok(output)
}

/// A single read, bounded by whatever remains of the handshake's overall
/// deadline so that a device that never responds cannot hang the adapter
/// past the budget for the entire exchange.
async fn read_once(stream: &mut TcpStream, deadline: &Deadline) -> std::io::Result<String> {
    let mut buf = vec![0u8; READ_CHUNK];
    let n = tokio::time::timeout(deadline.remaining(), stream.read(&mut buf))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out"))??;
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}
