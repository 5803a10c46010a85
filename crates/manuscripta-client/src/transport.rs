//! Reqwest-backed transport

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use manuscripta_core::{HttpRequest, HttpResponse, SdkConfig, Transport, TransportError};

/// Connection timeout applied on top of the per-request timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a configured HTTP client with connection pooling
pub fn create_client(config: &SdkConfig) -> crate::Result<Client> {
    if !config.validate_ssl {
        warn!("TLS certificate validation is disabled");
    }

    let client = ClientBuilder::new()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(16)
        // Expire idle connections before the API closes them server-side
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(&config.user_agent)
        .use_rustls_tls()
        .danger_accept_invalid_certs(!config.validate_ssl)
        .tcp_keepalive(Duration::from_secs(60))
        .build()?;
    Ok(client)
}

/// [`Transport`] over a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &SdkConfig) -> crate::Result<Self> {
        Ok(Self::new(create_client(config)?))
    }

    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        let method = request.method.clone();
        let url = request.url.clone();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.perform(request) => result,
        };

        match &result {
            Ok(response) => debug!(
                method = %method,
                url = %url,
                status = response.status.as_u16(),
                "Request completed"
            ),
            Err(e) => debug!(method = %method, url = %url, error = %e, "Request failed"),
        }
        result
    }
}
