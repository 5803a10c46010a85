//! Tenant-aware request authentication
//!
//! Credentials are taken from the ambient tenant context at the moment a
//! request is authenticated, never captured up front.

use std::sync::Arc;
use tracing::trace;

use manuscripta_core::{Error, HttpRequest, Result, TenantContext};
use manuscripta_tenant::TenantContextProvider;

pub const API_KEY_HEADER: &str = "X-ApiKey";
pub const ORGANIZATION_HEADER: &str = "X-Organization-Code";

#[derive(Debug, Clone)]
pub struct TenantAwareAuthenticator {
    contexts: Arc<TenantContextProvider>,
}

impl TenantAwareAuthenticator {
    pub fn new(contexts: Arc<TenantContextProvider>) -> Self {
        Self { contexts }
    }

    /// Stamp the ambient tenant's credentials onto `request`.
    ///
    /// Existing `X-ApiKey` and `X-Organization-Code` values are replaced.
    /// Returns the context that was applied.
    ///
    /// # Errors
    /// - `Error::NoTenantContext` when no tenant is ambient
    /// - `Error::MissingApiKey` when the tenant has no usable API key
    pub fn authenticate(&self, request: &mut HttpRequest) -> Result<TenantContext> {
        let context = self
            .contexts
            .current_context()
            .ok_or(Error::NoTenantContext)?;

        let api_key = context
            .api_key()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::MissingApiKey {
                organization_code: context.organization_code().to_string(),
            })?;

        request.set_header(API_KEY_HEADER, api_key)?;
        request.set_header(ORGANIZATION_HEADER, context.organization_code())?;
        trace!(tenant = %context, "Request authenticated");
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manuscripta_tenant::with_tenant;

    fn authenticator() -> TenantAwareAuthenticator {
        TenantAwareAuthenticator::new(Arc::new(TenantContextProvider::new()))
    }

    #[test]
    fn test_without_context_is_configuration_error() {
        let mut request = HttpRequest::get("manuscripts");
        let err = authenticator().authenticate(&mut request).unwrap_err();
        assert!(matches!(err, Error::NoTenantContext));
        assert!(err.is_configuration_error());
        assert!(request.header(API_KEY_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_blank_key_names_organization() {
        let ctx = TenantContext::new("acme").unwrap().with_api_key("   ");
        let result = with_tenant(ctx, async {
            authenticator().authenticate(&mut HttpRequest::get("manuscripts"))
        })
        .await;

        match result {
            Err(Error::MissingApiKey { organization_code }) => assert_eq!(organization_code, "acme"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sets_and_replaces_identity_headers() {
        let ctx = TenantContext::new("acme").unwrap().with_api_key("key123");
        let request = with_tenant(ctx, async {
            let mut request = HttpRequest::get("manuscripts")
                .with_header(API_KEY_HEADER, "stale")
                .unwrap()
                .with_header(ORGANIZATION_HEADER, "other")
                .unwrap();
            authenticator().authenticate(&mut request).unwrap();
            request
        })
        .await;

        assert_eq!(request.header("x-apikey"), Some("key123"));
        assert_eq!(request.header("x-organization-code"), Some("acme"));
        assert_eq!(request.headers.get_all("x-apikey").iter().count(), 1);
    }
}
