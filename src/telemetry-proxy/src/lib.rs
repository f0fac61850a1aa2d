//! The telemetry proxy (§4.7): exposes the same four-RPC surface inward as
//! it calls outward, relaying each RPC to whichever backend device the
//! request's target selector names.

mod target;

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status, Streaming};

use ndg_registry::{Registry, RegistryError};
use ndg_server_core::DEFAULT_OPERATION_TIMEOUT;
use ndg_service::telemetry::telemetry_server::Telemetry;
use ndg_service::telemetry::{
    CapabilityRequest, CapabilityResponse, GetRequest, GetResponse, SetRequest, SetResponse,
    SubscribeRequest, SubscribeResponse,
};
use ndg_service::GNMI_TARGET_METADATA_KEY;
use ndg_telemetry_client::TelemetryHandle;

pub use target::{parse_target, Target};

fn registry_status(e: RegistryError) -> Status {
    match e {
        RegistryError::InvalidArgument => Status::invalid_argument(e.to_string()),
        RegistryError::NotFound(_) => Status::not_found(e.to_string()),
    }
}

/// Target-selector extraction (§4.7): metadata wins over the request's own
/// prefix target; absence of both is `invalid-argument`.
fn extract_target(metadata: &MetadataMap, prefix_target: Option<&str>) -> Result<String, Status> {
    if let Some(value) = metadata.get(GNMI_TARGET_METADATA_KEY) {
        let value = value
            .to_str()
            .map_err(|_| Status::invalid_argument("x-gnmi-target metadata is not valid ASCII"))?;
        if !value.is_empty() {
            return Ok(value.to_string());
        }
    }
    match prefix_target {
        Some(target) if !target.is_empty() => Ok(target.to_string()),
        _ => Err(Status::invalid_argument(
            "no target: neither x-gnmi-target metadata nor a prefix target were present",
        )),
    }
}

pub struct TelemetryProxy {
    registry: Arc<Registry>,
    default_secret: String,
}

impl TelemetryProxy {
    pub fn new(registry: Arc<Registry>, default_secret: String) -> Self {
        TelemetryProxy {
            registry,
            default_secret,
        }
    }

    async fn connect_backend(&self, target_str: &str) -> Result<TelemetryHandle, Status> {
        let target = parse_target(target_str, &self.default_secret);
        let (entry, device_name) = self.registry.resolve(&target.fqdn).map_err(registry_status)?;
        tracing::info!(fqdn = %target.fqdn, device_name, user = %target.user, "telemetry proxy dialing backend");
        timeout(
            DEFAULT_OPERATION_TIMEOUT,
            TelemetryHandle::connect(&entry.hostname, entry.telemetry_port, &target.user, target.secret.expose()),
        )
        .await
        .map_err(|_| Status::unavailable("backend connect timed out"))?
        .map_err(|e| Status::unavailable(e.to_string()))
    }
}

#[tonic::async_trait]
impl Telemetry for TelemetryProxy {
    async fn capabilities(
        &self,
        request: Request<CapabilityRequest>,
    ) -> Result<Response<CapabilityResponse>, Status> {
        let target_str = extract_target(request.metadata(), None)?;
        let mut backend = self.connect_backend(&target_str).await?;
        let req = request.into_inner();
        timeout(DEFAULT_OPERATION_TIMEOUT, backend.capabilities(req))
            .await
            .map_err(|_| Status::unavailable("backend capabilities call timed out"))?
    }

    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        let prefix_target = request.get_ref().prefix.as_ref().map(|p| p.target.as_str());
        let target_str = extract_target(request.metadata(), prefix_target)?;
        let mut backend = self.connect_backend(&target_str).await?;
        let req = request.into_inner();
        timeout(DEFAULT_OPERATION_TIMEOUT, backend.get(req))
            .await
            .map_err(|_| Status::unavailable("backend get call timed out"))?
    }

    async fn set(&self, request: Request<SetRequest>) -> Result<Response<SetResponse>, Status> {
        let prefix_target = request.get_ref().prefix.as_ref().map(|p| p.target.as_str());
        let target_str = extract_target(request.metadata(), prefix_target)?;
        let mut backend = self.connect_backend(&target_str).await?;
        let req = request.into_inner();
        timeout(DEFAULT_OPERATION_TIMEOUT, backend.set(req))
            .await
            .map_err(|_| Status::unavailable("backend set call timed out"))?
    }

    type SubscribeStream = Pin<Box<dyn Stream<Item = Result<SubscribeResponse, Status>> + Send + 'static>>;

    async fn subscribe(
        &self,
        request: Request<Streaming<SubscribeRequest>>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let metadata = request.metadata().clone();
        let mut inbound = request.into_inner();

        let first = inbound
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("subscribe stream closed before first message"))?;
        let prefix_target = first
            .request
            .as_ref()
            .and_then(|req| match req {
                ndg_service::telemetry::subscribe_request::Request::Subscribe(list) => {
                    list.prefix.as_ref().map(|p| p.target.clone())
                }
                ndg_service::telemetry::subscribe_request::Request::Poll(_) => None,
            });
        let target_str = extract_target(&metadata, prefix_target.as_deref())?;
        let mut backend = self.connect_backend(&target_str).await?;

        let (to_backend_tx, to_backend_rx) = unbounded_channel::<SubscribeRequest>();
        to_backend_tx
            .send(first)
            .map_err(|_| Status::internal("backend request channel closed immediately"))?;

        let mut backend_stream = backend
            .subscribe(UnboundedReceiverStream::new(to_backend_rx))
            .await?
            .into_inner();

        // client -> backend pump: forwards every further inbound message in
        // order, then half-closes the backend by dropping the sender on a
        // clean end-of-stream. A genuine inbound error is not a clean
        // half-close: it is handed to the backend -> client pump below so it
        // can end the RPC with that error instead of running on as if the
        // client had closed normally.
        let (inbound_err_tx, mut inbound_err_rx) = oneshot::channel::<Status>();
        tokio::spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(msg)) => {
                        if to_backend_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(status) => {
                        let _ = inbound_err_tx.send(status);
                        break;
                    }
                }
            }
        });

        // backend -> client pump: the returned stream itself. Forwards
        // every backend response until backend end-of-stream (RPC
        // completes cleanly), backend error (propagated), or the client ->
        // backend pump reporting an inbound stream error (also propagated).
        // The backend stream is dropped, and so closed, when this generator
        // returns (§4.7 "closed unconditionally on return").
        let output = async_stream::stream! {
            loop {
                tokio::select! {
                    biased;
                    status = &mut inbound_err_rx => {
                        if let Ok(status) = status {
                            yield Err(status);
                        }
                        break;
                    }
                    message = backend_stream.message() => {
                        match message {
                            Ok(Some(response)) => yield Ok(response),
                            Ok(None) => break,
                            Err(status) => {
                                yield Err(status);
                                break;
                            }
                        }
                    }
                }
            }
        };

        Ok(Response::new(Box::pin(output)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    #[test]
    fn metadata_target_wins_over_prefix_target() {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            GNMI_TARGET_METADATA_KEY,
            MetadataValue::try_from("srl1.example.net").unwrap(),
        );
        let target = extract_target(&metadata, Some("srl2.example.net")).unwrap();
        assert_eq!(target, "srl1.example.net");
    }

    #[test]
    fn falls_back_to_prefix_target_when_metadata_absent() {
        let metadata = MetadataMap::new();
        let target = extract_target(&metadata, Some("srl2.example.net")).unwrap();
        assert_eq!(target, "srl2.example.net");
    }

    #[test]
    fn neither_present_is_invalid_argument() {
        let metadata = MetadataMap::new();
        let err = extract_target(&metadata, None).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn empty_metadata_value_falls_back_to_prefix() {
        let mut metadata = MetadataMap::new();
        metadata.insert(GNMI_TARGET_METADATA_KEY, MetadataValue::try_from("").unwrap());
        let target = extract_target(&metadata, Some("srl2.example.net")).unwrap();
        assert_eq!(target, "srl2.example.net");
    }
}
