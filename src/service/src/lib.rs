//! Generated protobuf/gRPC stubs for the gateway's two inbound services,
//! plus the small set of wire-level helpers (secret redaction, the
//! `x-gnmi-target` metadata key) that every other crate needs.

pub mod command {
    tonic::include_proto!("ndg.command.v1");
}

pub mod telemetry {
    tonic::include_proto!("ndg.telemetry.v1");
}

/// Metadata field name carrying the telemetry target selector (§6).
pub const GNMI_TARGET_METADATA_KEY: &str = "x-gnmi-target";

const REDACTED: &str = "<redacted>";

/// A credential value that refuses to print itself.
///
/// Every secret (`CommandRequest::password`, the secret half of a parsed
/// telemetry target string, the bastion's interactively-read secret) is
/// wrapped in `Secret` before it is ever attached to a `tracing` field or a
/// `Debug`/`Display` formatter, so that accidentally logging a request or
/// context value cannot leak it (§5, §8 "Secret hygiene").
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// The only way to get the plaintext back out: an explicit, named call
    /// at the point where it is about to be used (e.g. handed to a backend
    /// adapter), never at a logging call site.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_never_prints_plaintext() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), REDACTED);
        assert_eq!(format!("{secret}"), REDACTED);
        assert_eq!(secret.expose(), "hunter2");
    }
}
