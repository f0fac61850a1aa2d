//! The shell bastion (§4.8): a shell-protocol server that authenticates
//! clients by public key, runs its own interactive command loop, and
//! proxies `ssh <fqdn>` sessions to backend devices.

mod authorized_keys;
mod line_editor;
mod session;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use russh_keys::key::KeyPair;

use ndg_backend::HostKeyPolicy;
use ndg_registry::Registry;

pub use authorized_keys::AuthorizedKeys;
pub use line_editor::{LineReader, Outcome, SecretReader};

use session::BastionHandler;

/// Startup configuration for the bastion listener.
pub struct BastionConfig {
    pub bind_addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub domain_suffix: String,
    pub authorized_keys: Arc<AuthorizedKeys>,
    pub host_key_policy: HostKeyPolicy,
    pub host_key: KeyPair,
}

struct BastionServer {
    registry: Arc<Registry>,
    domain_suffix: String,
    authorized_keys: Arc<AuthorizedKeys>,
    host_key_policy: HostKeyPolicy,
}

impl russh::server::Server for BastionServer {
    type Handler = BastionHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> BastionHandler {
        BastionHandler::new(
            peer_addr,
            Arc::clone(&self.registry),
            self.domain_suffix.clone(),
            Arc::clone(&self.authorized_keys),
            self.host_key_policy.clone(),
        )
    }
}

/// Runs the bastion's accept loop until the process is asked to shut down.
/// Each accepted connection runs for its lifetime in its own task (§5
/// "Scheduling model"), managed internally by `russh::server::run`.
pub async fn run(config: BastionConfig) -> anyhow::Result<()> {
    let server_config = Arc::new(russh::server::Config {
        keys: vec![config.host_key],
        ..Default::default()
    });

    let mut server = BastionServer {
        registry: config.registry,
        domain_suffix: config.domain_suffix,
        authorized_keys: config.authorized_keys,
        host_key_policy: config.host_key_policy,
    };

    tracing::info!(addr = %config.bind_addr, "shell bastion listening");
    russh::server::run(server_config, config.bind_addr, &mut server).await?;
    Ok(())
}

/// Loads the bastion's persistent host identity key. There is no
/// auto-generation fallback: a bastion's identity must be stable across
/// restarts so that returning clients (and anyone who has pinned its host
/// key) keep recognizing it.
pub async fn load_host_key(path: &PathBuf) -> anyhow::Result<KeyPair> {
    let bytes = tokio::fs::read(path).await?;
    let key = russh_keys::decode_secret_key(std::str::from_utf8(&bytes)?, None)?;
    Ok(key)
}
