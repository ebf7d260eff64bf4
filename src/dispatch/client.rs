//! HTTP dispatcher for downstream services.

use reqwest::{header, Method};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use super::service::{Service, ServiceDirectory};
use crate::config::GatewayConfig;
use crate::error::{BreakerError, GatewayError};
use crate::observability::metrics::{self, CallOutcome};
use crate::resilience::{CircuitBreakerRegistry, DownstreamTimeouts};

/// Header carrying the gateway's credential for a downstream service.
pub const SERVICE_KEY_HEADER: &str = "x-service-key";

pub struct Dispatcher {
    client: reqwest::Client,
    directory: ServiceDirectory,
    breakers: Arc<CircuitBreakerRegistry>,
    timeouts: DownstreamTimeouts,
}

impl Dispatcher {
    pub fn new(
        directory: ServiceDirectory,
        breakers: Arc<CircuitBreakerRegistry>,
        timeouts: DownstreamTimeouts,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            directory,
            breakers,
            timeouts,
        })
    }

    pub fn from_config(
        config: &GatewayConfig,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Result<Self, GatewayError> {
        Self::new(
            ServiceDirectory::from_config(&config.services),
            breakers,
            DownstreamTimeouts::from_config(&config.timeouts),
        )
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// [`Dispatcher::invoke`] for a service given by name.
    pub async fn invoke_named<P>(
        &self,
        service: &str,
        method: Method,
        path: &str,
        payload: Option<&P>,
    ) -> Result<Value, GatewayError>
    where
        P: Serialize + ?Sized,
    {
        let service: Service = service.parse()?;
        self.invoke(service, method, path, payload).await
    }

    /// Call `path` on `service` through its circuit breaker and decode the
    /// JSON reply. An empty reply body decodes to `Value::Null`.
    pub async fn invoke<P>(
        &self,
        service: Service,
        method: Method,
        path: &str,
        payload: Option<&P>,
    ) -> Result<Value, GatewayError>
    where
        P: Serialize + ?Sized,
    {
        let endpoint = self.directory.resolve(service)?;
        let url = endpoint.url_for(path)?;
        let body = payload
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| GatewayError::BadRequest(format!("unserializable payload: {e}")))?;

        let start = Instant::now();
        let result = self
            .breakers
            .call(service, || {
                let mut request = self
                    .client
                    .request(method.clone(), url.clone())
                    .header(SERVICE_KEY_HEADER, endpoint.service_key.as_str());
                if let Some(body) = body.clone() {
                    request = request.header(header::CONTENT_TYPE, "application/json").body(body);
                }

                self.timeouts.with_deadline(service, async move {
                    let response = request
                        .send()
                        .await
                        .map_err(|source| GatewayError::Transport { service, source })?;
                    let status = response.status().as_u16();
                    let bytes = response
                        .bytes()
                        .await
                        .map_err(|source| GatewayError::Transport { service, source })?;

                    if status >= 500 {
                        tracing::warn!(service = %service, status, body = %String::from_utf8_lossy(&bytes), "Downstream server error");
                        return Err(GatewayError::Server { service, status });
                    }
                    Ok((status, bytes))
                })
            })
            .await;

        let (status, bytes) = match result {
            Ok(reply) => reply,
            Err(BreakerError::Open { retry_after }) => {
                tracing::debug!(service = %service, path, "Call short-circuited by open breaker");
                return Err(GatewayError::CircuitOpen { service, retry_after });
            }
            Err(BreakerError::Inner(e)) => {
                let outcome = match &e {
                    GatewayError::Server { .. } => CallOutcome::ServerError,
                    _ => CallOutcome::TransportError,
                };
                metrics::record_external_call(service, path, outcome, start);
                return Err(e);
            }
        };

        if status >= 400 {
            metrics::record_external_call(service, path, CallOutcome::ClientError, start);
            tracing::debug!(service = %service, status, body = %String::from_utf8_lossy(&bytes), "Downstream rejected request");
            return Err(GatewayError::Client { service, status });
        }

        metrics::record_external_call(service, path, CallOutcome::Ok, start);
        decode(service, &bytes)
    }
}

fn decode(service: Service, bytes: &[u8]) -> Result<Value, GatewayError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|source| {
        tracing::warn!(service = %service, error = %source, "Downstream returned undecodable body");
        GatewayError::Decode { service, source }
    })
}
