//! The telemetry backend client (§4.5): opens a model-driven-telemetry
//! session to a backend device, carrying per-request credentials as RPC
//! metadata, falling back from secure to insecure transport on connect
//! failure.

mod tls;

use thiserror::Error;
use tonic::metadata::AsciiMetadataValue;
use tonic::service::Interceptor;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status, Streaming};

use ndg_service::telemetry::telemetry_client::TelemetryClient as GeneratedClient;
use ndg_service::telemetry::{
    CapabilityRequest, CapabilityResponse, GetRequest, GetResponse, SetRequest, SetResponse,
    SubscribeRequest, SubscribeResponse,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("secure connect to {0}:{1} failed: {2}")]
    SecureConnectFailed(String, u16, tonic::transport::Error),
    #[error("insecure connect to {0}:{1} failed after secure connect also failed: {2}")]
    InsecureConnectFailed(String, u16, tonic::transport::Error),
    #[error("rpc failed: {0}")]
    Rpc(#[from] Status),
}

/// Attaches `username`/`password` metadata to every outgoing request, per
/// §4.5.
#[derive(Clone)]
struct CredentialInterceptor {
    username: AsciiMetadataValue,
    password: AsciiMetadataValue,
}

impl Interceptor for CredentialInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert("username", self.username.clone());
        request
            .metadata_mut()
            .insert("password", self.password.clone());
        Ok(request)
    }
}

/// A handle to a backend telemetry session. Owns the underlying
/// connection; drop it (or call nothing further) to close it.
pub struct TelemetryHandle {
    inner: GeneratedClient<tonic::service::interceptor::InterceptedService<Channel, CredentialInterceptor>>,
}

impl TelemetryHandle {
    /// Attempts a secure connection first (accepting any server
    /// certificate — §9), retrying once with plaintext transport on
    /// failure.
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        secret: &str,
    ) -> Result<Self, ClientError> {
        let interceptor = CredentialInterceptor {
            username: AsciiMetadataValue::try_from(user)
                .unwrap_or_else(|_| AsciiMetadataValue::from_static("")),
            password: AsciiMetadataValue::try_from(secret)
                .unwrap_or_else(|_| AsciiMetadataValue::from_static("")),
        };

        let channel = match tls::connect_secure(host, port).await {
            Ok(channel) => channel,
            Err(secure_err) => {
                tracing::warn!(
                    host,
                    port,
                    error = %secure_err,
                    "secure telemetry connect failed, retrying with plaintext transport"
                );
                let endpoint = Endpoint::from_shared(format!("http://{host}:{port}"))
                    .map_err(|e| ClientError::SecureConnectFailed(host.to_string(), port, e))?;
                endpoint
                    .connect()
                    .await
                    .map_err(|e| ClientError::InsecureConnectFailed(host.to_string(), port, e))?
            }
        };

        let inner = GeneratedClient::new(tonic::service::interceptor::InterceptedService::new(
            channel,
            interceptor,
        ));
        Ok(TelemetryHandle { inner })
    }

    pub async fn capabilities(
        &mut self,
        req: CapabilityRequest,
    ) -> Result<Response<CapabilityResponse>, Status> {
        self.inner.capabilities(req).await
    }

    pub async fn get(&mut self, req: GetRequest) -> Result<Response<GetResponse>, Status> {
        self.inner.get(req).await
    }

    pub async fn set(&mut self, req: SetRequest) -> Result<Response<SetResponse>, Status> {
        self.inner.set(req).await
    }

    pub async fn subscribe(
        &mut self,
        requests: impl tonic::IntoStreamingRequest<Message = SubscribeRequest>,
    ) -> Result<Response<Streaming<SubscribeResponse>>, Status> {
        self.inner.subscribe(requests).await
    }
}
