//! Outbound backend protocol adapters (§4.2–§4.4): shell, line-protocol
//! (telnet), and config-protocol (netconf). Each adapter is a plain async
//! function rather than a trait object — the three protocols take
//! different inputs (a command string vs. an XML RPC body) and the
//! dispatcher (§4.6) is the only caller that needs to pick between them.

pub mod common;
pub mod netconf;
pub mod shell;
pub mod telnet;

pub use common::{AdapterFailure, HostKeyPolicy};

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A minimal line-protocol stand-in: banner, echoes a fixed prompt
    /// after username/password, then echoes back whatever command it
    /// receives, exercising every read/write step of §4.3 without a real
    /// network device.
    #[tokio::test]
    async fn telnet_adapter_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];

            sock.write_all(b"Welcome\r\nlogin: ").await.unwrap();
            let n = sock.read(&mut buf).await.unwrap(); // username
            assert_eq!(&buf[..n], b"admin\r\n");

            sock.write_all(b"Password: ").await.unwrap();
            let n = sock.read(&mut buf).await.unwrap(); // password
            assert_eq!(&buf[..n], b"p\r\n");

            sock.write_all(b"> ").await.unwrap();
            let n = sock.read(&mut buf).await.unwrap(); // command
            assert_eq!(&buf[..n], b"show version\r\n");

            sock.write_all(b"v1.2.3\r\n").await.unwrap();
            // Let the client's post-command read time out naturally rather
            // than racing a second write.
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        });

        let output = telnet::execute(&addr.ip().to_string(), addr.port(), "admin", "p", "show version")
            .await
            .unwrap();

        assert!(output.contains("Welcome"));
        assert!(output.contains("login:"));
        assert!(output.contains("v1.2.3"));
        server.await.unwrap();
    }
}
