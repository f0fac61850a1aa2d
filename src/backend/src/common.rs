//! Shared adapter error type and the (deliberately permissive) host-key
//! policy used by every backend adapter that speaks the shell protocol.

use std::sync::Arc;

use russh_keys::key::PublicKey;
use thiserror::Error;
use tokio::time::Duration;

pub const BACKEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// An adapter call failed, but produced some output along the way. Callers
/// (the RPC dispatcher) surface `partial_output` as `CommandResponse::output`
/// and `message` as `CommandResponse::error`, with `exit_code = 1` (§7).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AdapterFailure {
    pub partial_output: String,
    pub message: String,
}

impl AdapterFailure {
    pub fn new(partial_output: impl Into<String>, message: impl Into<String>) -> Self {
        AdapterFailure {
            partial_output: partial_output.into(),
            message: message.into(),
        }
    }
}

/// Per-device accepted host-key fingerprints for the opt-in pinning mode
/// (§9 open question). Empty (the default) means "accept any host key",
/// which is the documented, insecure-by-default behavior of §4.2/§9.
#[derive(Debug, Clone, Default)]
pub struct HostKeyPolicy {
    accepted_fingerprints: Vec<String>,
}

impl HostKeyPolicy {
    pub fn accept_any() -> Self {
        HostKeyPolicy::default()
    }

    pub fn pinned(fingerprints: impl IntoIterator<Item = String>) -> Self {
        HostKeyPolicy {
            accepted_fingerprints: fingerprints.into_iter().collect(),
        }
    }

    pub fn accepts(&self, key: &PublicKey) -> bool {
        if self.accepted_fingerprints.is_empty() {
            return true;
        }
        let fingerprint = key.fingerprint();
        self.accepted_fingerprints.iter().any(|f| f == &fingerprint)
    }
}

/// A `russh::client::Handler` that defers host-key acceptance to a
/// [`HostKeyPolicy`], matching §4.2's "ignores the remote host key" default
/// while leaving room for the pinning mode described in §9.
#[derive(Clone)]
pub struct InsecureClientHandler {
    pub policy: Arc<HostKeyPolicy>,
}

impl InsecureClientHandler {
    pub fn new(policy: HostKeyPolicy) -> Self {
        InsecureClientHandler {
            policy: Arc::new(policy),
        }
    }
}

#[async_trait::async_trait]
impl russh::client::Handler for InsecureClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(self.policy.accepts(server_public_key))
    }
}
