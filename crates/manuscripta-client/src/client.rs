//! Tenant-aware HTTP client
//!
//! Every call is authenticated and routed for the ambient tenant and runs
//! through the resilience pipeline named after its endpoint. The ambient
//! context is read on each attempt, so a retry after a credential change
//! uses the new credentials.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use manuscripta_core::retry_after::parse_retry_after;
use manuscripta_core::{Error, HttpRequest, HttpResponse, TenantContext, Transport};
use manuscripta_resilience::{Outcome, ResilienceModule, ResilienceOptions};
use manuscripta_tenant::{TenantConfigurationProvider, TenantContextProvider};

use crate::api::{AuthorGroupsApi, CustomFieldsApi, JournalsApi, ManuscriptsApi};
use crate::auth::TenantAwareAuthenticator;
use crate::settings::ClientSettings;
use crate::transport::ReqwestTransport;
use crate::{ClientError, Result};

pub struct TenantAwareHttpClient {
    transport: Arc<dyn Transport>,
    authenticator: TenantAwareAuthenticator,
    contexts: Arc<TenantContextProvider>,
    configuration: Arc<TenantConfigurationProvider>,
    resilience: Arc<ResilienceModule>,
    endpoint_options: HashMap<String, ResilienceOptions>,
}

impl std::fmt::Debug for TenantAwareHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantAwareHttpClient")
            .field("default_base_url", &self.configuration.defaults().base_url)
            .field("endpoint_overrides", &self.endpoint_options.len())
            .finish()
    }
}

impl TenantAwareHttpClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        configuration: Arc<TenantConfigurationProvider>,
        resilience: Arc<ResilienceModule>,
    ) -> Self {
        let contexts = Arc::clone(configuration.contexts());
        Self {
            transport,
            authenticator: TenantAwareAuthenticator::new(Arc::clone(&contexts)),
            contexts,
            configuration,
            resilience,
            endpoint_options: HashMap::new(),
        }
    }

    /// Build the full stack over a reqwest transport
    pub fn from_settings(settings: ClientSettings) -> Result<Self> {
        settings.validate()?;
        let transport = Arc::new(ReqwestTransport::from_config(&settings.sdk)?);
        let resilience = Arc::new(ResilienceModule::new(settings.resilience_options())?);
        let contexts = Arc::new(TenantContextProvider::new());
        let configuration = Arc::new(TenantConfigurationProvider::new(
            settings.sdk.clone(),
            contexts,
        ));
        Ok(Self::new(transport, configuration, resilience).with_endpoint_options(settings.endpoints))
    }

    /// Options used the first time each named pipeline is built
    pub fn with_endpoint_options(mut self, options: HashMap<String, ResilienceOptions>) -> Self {
        self.endpoint_options = options;
        self
    }

    pub fn contexts(&self) -> &Arc<TenantContextProvider> {
        &self.contexts
    }

    pub fn configuration(&self) -> &Arc<TenantConfigurationProvider> {
        &self.configuration
    }

    pub fn resilience(&self) -> &Arc<ResilienceModule> {
        &self.resilience
    }

    pub fn manuscripts(&self) -> ManuscriptsApi<'_> {
        ManuscriptsApi::new(self)
    }

    pub fn journals(&self) -> JournalsApi<'_> {
        JournalsApi::new(self)
    }

    pub fn author_groups(&self) -> AuthorGroupsApi<'_> {
        AuthorGroupsApi::new(self)
    }

    pub fn custom_fields(&self) -> CustomFieldsApi<'_> {
        CustomFieldsApi::new(self)
    }

    /// Context for `organization_code`, carrying its effective API key.
    ///
    /// A tenant without a key of its own inherits the default key, if any.
    pub fn tenant_context(&self, organization_code: &str) -> Result<TenantContext> {
        let context = self
            .contexts
            .resolve_context(Some(organization_code))
            .ok_or_else(|| Error::InvalidTenant("Organization code must not be empty".to_string()))?;
        if context.has_api_key() {
            return Ok(context);
        }
        Ok(match self.configuration.api_key(Some(context.organization_code())) {
            Some(key) => context.with_api_key(key),
            None => context,
        })
    }

    /// Run `future` with `organization_code` as the ambient tenant
    pub async fn with_tenant<F: Future>(&self, organization_code: &str, future: F) -> Result<F::Output> {
        let context = self.tenant_context(organization_code)?;
        Ok(manuscripta_tenant::with_tenant(context, future).await)
    }

    /// Send `request` for the ambient tenant through the `endpoint` pipeline.
    ///
    /// Relative URLs are resolved against the tenant's base URL. Any status
    /// the pipeline lets through is returned as a response.
    pub async fn send(
        &self,
        endpoint: &str,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let custom = self.endpoint_options.get(endpoint);
        let request = &request;
        let response = self
            .resilience
            .execute_named(
                endpoint,
                custom,
                |token| self.attempt(request.clone(), token),
                cancel,
            )
            .await?;
        Ok(response)
    }

    async fn attempt(&self, mut request: HttpRequest, cancel: CancellationToken) -> Outcome {
        let context = self.authenticator.authenticate(&mut request)?;
        if !request.is_absolute() {
            let base_url = match context.base_url() {
                Some(url) => url.to_string(),
                None => self
                    .configuration
                    .base_url(Some(context.organization_code())),
            };
            request.resolve_against(&base_url)?;
        }

        debug!(
            tenant = %context,
            method = %request.method,
            url = %request.url,
            "Sending request"
        );
        Ok(self.transport.send(request, &cancel).await?)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let response = self.send(endpoint, HttpRequest::get(path), cancel).await?;
        decode(endpoint, response)
    }

    pub async fn post_json<B, T>(
        &self,
        endpoint: &str,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = HttpRequest::post(path).with_json(body)?;
        let response = self.send(endpoint, request, cancel).await?;
        decode(endpoint, response)
    }

    pub async fn put_json<B, T>(
        &self,
        endpoint: &str,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = HttpRequest::put(path).with_json(body)?;
        let response = self.send(endpoint, request, cancel).await?;
        decode(endpoint, response)
    }

    pub async fn delete(&self, endpoint: &str, path: &str, cancel: &CancellationToken) -> Result<()> {
        let response = self.send(endpoint, HttpRequest::delete(path), cancel).await?;
        ensure_success(endpoint, response).map(|_| ())
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, response: HttpResponse) -> Result<T> {
    let response = ensure_success(endpoint, response)?;
    response
        .json()
        .map_err(|e| ClientError::Decode(format!("{}: {}", endpoint, e)))
}

fn ensure_success(endpoint: &str, response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let status = response.status.as_u16();
    let message = error_message(&response);
    warn!(endpoint, status, message = %message, "API request failed");
    Err(ClientError::Api {
        status,
        message,
        retry_after_secs: response.header("retry-after").and_then(parse_retry_after),
    })
}

/// `message` or `error` from a JSON error body, else the raw body, else the
/// status reason
fn error_message(response: &HttpResponse) -> String {
    let from_json = serde_json::from_slice::<serde_json::Value>(&response.body)
        .ok()
        .and_then(|body| {
            ["message", "error"]
                .iter()
                .find_map(|key| body.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        });
    if let Some(message) = from_json.filter(|m| !m.trim().is_empty()) {
        return message;
    }

    let text = response.text();
    if !text.trim().is_empty() {
        return text.trim().to_string();
    }
    response
        .status
        .canonical_reason()
        .unwrap_or("Unknown error")
        .to_string()
}
