//! Entry point: loads configuration, builds the device registry, and runs
//! the command service, telemetry proxy, and shell bastion concurrently
//! until a shutdown signal arrives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use ndg_backend::HostKeyPolicy;
use ndg_bastion::{AuthorizedKeys, BastionConfig};
use ndg_dispatcher::Dispatcher;
use ndg_metrics::MetricsRegistry;
use ndg_registry::{Registry, RegistryDocument};
use ndg_service::command::command_service_server::CommandServiceServer;
use ndg_service::telemetry::telemetry_server::TelemetryServer;
use ndg_telemetry_proxy::TelemetryProxy;
use ndg_tracing::LoggingSettings;

/// Network-device gateway: a command dispatcher, telemetry proxy, and
/// interactive shell bastion in front of a fleet of backend devices.
#[derive(Debug, Parser)]
#[command(name = "gatewayd", about = "Network-device access gateway")]
struct Args {
    /// Path to the YAML device registry document.
    #[arg(long, env = "NDG_REGISTRY")]
    registry: PathBuf,

    /// Address the command service listens on.
    #[arg(long, env = "NDG_COMMAND_ADDR", default_value = "0.0.0.0:50051")]
    command_addr: SocketAddr,

    /// Address the telemetry service listens on.
    #[arg(long, env = "NDG_TELEMETRY_ADDR", default_value = "0.0.0.0:57400")]
    telemetry_addr: SocketAddr,

    /// Address the shell bastion listens on.
    #[arg(long, env = "NDG_BASTION_ADDR", default_value = "0.0.0.0:2222")]
    bastion_addr: SocketAddr,

    /// Path to the bastion's persistent host identity key.
    #[arg(long, env = "NDG_HOST_KEY")]
    host_key: PathBuf,

    /// Path to the bastion's OpenSSH-format authorized_keys file. Missing
    /// or empty means accept-any, logged loudly as insecure.
    #[arg(long, env = "NDG_AUTHORIZED_KEYS")]
    authorized_keys: Option<PathBuf>,

    /// Secret substituted for telemetry target strings that omit one.
    #[arg(long, env = "NDG_DEFAULT_TELEMETRY_SECRET", default_value = "")]
    default_telemetry_secret: String,

    /// Comma-separated accepted backend host-key fingerprints. Empty (the
    /// default) accepts any backend host key (§4.2/§9).
    #[arg(long, env = "NDG_PINNED_HOST_KEYS", value_delimiter = ',')]
    pinned_host_keys: Vec<String>,

    /// Logging level used when `NDG_LOG` is unset.
    #[arg(long, env = "NDG_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    ndg_tracing::init(&LoggingSettings {
        default_level: args.log_level.clone(),
    })?;

    let registry = Arc::new(load_registry(&args.registry).await?);
    let domain_suffix = registry.settings().domain_suffix.clone();
    let metrics = MetricsRegistry::new();

    let host_key_policy = if args.pinned_host_keys.is_empty() {
        HostKeyPolicy::accept_any()
    } else {
        HostKeyPolicy::pinned(args.pinned_host_keys.clone())
    };

    let command_service =
        CommandServiceServer::new(Dispatcher::new(Arc::clone(&registry), host_key_policy.clone(), &metrics));
    let telemetry_service = TelemetryServer::new(TelemetryProxy::new(
        Arc::clone(&registry),
        args.default_telemetry_secret.clone(),
    ));

    let command_listener = ndg_server_core::bind(args.command_addr).await?;
    let telemetry_listener = ndg_server_core::bind(args.telemetry_addr).await?;

    let command_addr = args.command_addr;
    let command_task = tokio::spawn(async move {
        tracing::info!(addr = %command_addr, "command service listening");
        tonic::transport::Server::builder()
            .add_service(command_service)
            .serve_with_incoming(command_listener)
            .await
    });

    let telemetry_addr = args.telemetry_addr;
    let telemetry_task = tokio::spawn(async move {
        tracing::info!(addr = %telemetry_addr, "telemetry service listening");
        tonic::transport::Server::builder()
            .add_service(telemetry_service)
            .serve_with_incoming(telemetry_listener)
            .await
    });

    let authorized_keys = Arc::new(match &args.authorized_keys {
        Some(path) => AuthorizedKeys::load(path).await,
        None => {
            tracing::warn!("no --authorized-keys configured, bastion accepts any client key");
            AuthorizedKeys::empty()
        }
    });
    let host_key = ndg_bastion::load_host_key(&args.host_key).await?;
    let bastion_task = tokio::spawn(ndg_bastion::run(BastionConfig {
        bind_addr: args.bastion_addr,
        registry: Arc::clone(&registry),
        domain_suffix,
        authorized_keys,
        host_key_policy,
        host_key,
    }));

    tokio::select! {
        result = command_task => propagate("command service", result)?,
        result = telemetry_task => propagate("telemetry service", result)?,
        result = bastion_task => propagate("shell bastion", result)?,
        _ = ndg_server_core::shutdown_signal() => {
            tracing::info!("shutting down");
        }
    }

    Ok(())
}

fn propagate(
    name: &str,
    result: Result<Result<(), impl std::fmt::Display>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow::anyhow!("{name} exited with an error: {e}")),
        Err(e) => Err(anyhow::anyhow!("{name} task panicked: {e}")),
    }
}

async fn load_registry(path: &PathBuf) -> anyhow::Result<Registry> {
    let contents = tokio::fs::read_to_string(path).await?;
    let document: RegistryDocument = serde_yaml::from_str(&contents)?;
    Ok(Registry::from_document(document)?)
}
