//! Effective per-tenant configuration
//!
//! A tenant's configuration is the global [`SdkConfig`] with `api_key` and
//! `base_url` overridden by whatever the tenant context carries. Derived
//! configurations are cached per organization and invalidated whenever the
//! tenant's credentials are changed through this provider.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use manuscripta_core::{Error, Result, SdkConfig, TenantContext};

use crate::provider::TenantContextProvider;

#[derive(Debug)]
pub struct TenantConfigurationProvider {
    defaults: Arc<SdkConfig>,
    contexts: Arc<TenantContextProvider>,
    cache: DashMap<String, Arc<SdkConfig>>,
}

impl TenantConfigurationProvider {
    pub fn new(defaults: SdkConfig, contexts: Arc<TenantContextProvider>) -> Self {
        Self {
            defaults: Arc::new(defaults),
            contexts,
            cache: DashMap::new(),
        }
    }

    /// The global default configuration
    pub fn defaults(&self) -> &SdkConfig {
        &self.defaults
    }

    pub fn contexts(&self) -> &Arc<TenantContextProvider> {
        &self.contexts
    }

    /// Effective configuration for a tenant.
    ///
    /// Without a code, the ambient tenant is used, and without an ambient
    /// tenant the defaults are returned. Failures are logged and answered
    /// with the defaults; this method never fails.
    pub fn configuration(&self, organization_code: Option<&str>) -> SdkConfig {
        let code = match organization_code.filter(|c| !c.trim().is_empty()) {
            Some(code) => code.to_string(),
            None => match self.contexts.current_context() {
                Some(ctx) => ctx.organization_code().to_string(),
                None => return self.defaults.as_ref().clone(),
            },
        };

        match self.cached_or_derive(&code) {
            Ok(config) => config.as_ref().clone(),
            Err(e) => {
                warn!(tenant = %code, error = %e, "Falling back to default configuration");
                self.defaults.as_ref().clone()
            }
        }
    }

    /// Effective API key for a tenant (see [`Self::configuration`])
    pub fn api_key(&self, organization_code: Option<&str>) -> Option<String> {
        self.configuration(organization_code).api_key
    }

    /// Effective base URL for a tenant (see [`Self::configuration`])
    pub fn base_url(&self, organization_code: Option<&str>) -> String {
        self.configuration(organization_code).base_url
    }

    /// Store an API key for the tenant; the next read re-derives its config
    pub fn set_api_key(&self, organization_code: &str, api_key: &str) -> Result<()> {
        if api_key.trim().is_empty() {
            return Err(Error::ConfigValidation("API key must not be empty".to_string()));
        }
        self.update_tenant(organization_code, |ctx| ctx.with_api_key(api_key))
    }

    /// Store a base URL for the tenant; the next read re-derives its config
    pub fn set_base_url(&self, organization_code: &str, base_url: &str) -> Result<()> {
        validate_base_url(base_url)?;
        self.update_tenant(organization_code, |ctx| ctx.with_base_url(base_url))
    }

    /// Forget the cached configuration of one tenant
    pub fn invalidate(&self, organization_code: &str) {
        self.cache.remove(organization_code);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn update_tenant(
        &self,
        organization_code: &str,
        update: impl FnOnce(&TenantContext) -> TenantContext,
    ) -> Result<()> {
        let code = organization_code;
        let ctx = self
            .contexts
            .resolve_context(Some(code))
            .ok_or_else(|| Error::InvalidTenant("Organization code must not be empty".to_string()))?;

        // The entry guard serializes this write with concurrent derivations
        // of the same tenant, so no reader can re-insert the old values.
        let entry = self.cache.entry(code.to_string());
        self.contexts.update_context(update(&ctx));
        if let Entry::Occupied(occupied) = entry {
            occupied.remove();
        }
        debug!(tenant = %code, "Tenant configuration invalidated");
        Ok(())
    }

    fn cached_or_derive(&self, code: &str) -> Result<Arc<SdkConfig>> {
        if let Some(hit) = self.cache.get(code).map(|r| Arc::clone(r.value())) {
            return Ok(hit);
        }

        match self.cache.entry(code.to_string()) {
            Entry::Occupied(occupied) => Ok(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                let ctx = self.contexts.resolve_context(Some(code)).ok_or_else(|| {
                    Error::InvalidTenant(format!("Cannot resolve tenant '{}'", code))
                })?;
                let config = Arc::new(self.derive(&ctx)?);
                vacant.insert(Arc::clone(&config));
                debug!(tenant = %code, "Derived tenant configuration");
                Ok(config)
            }
        }
    }

    fn derive(&self, ctx: &TenantContext) -> Result<SdkConfig> {
        let mut config = self.defaults.as_ref().clone();
        if let Some(key) = ctx.api_key().filter(|k| !k.trim().is_empty()) {
            config.api_key = Some(key.to_string());
        }
        if let Some(url) = ctx.base_url() {
            validate_base_url(url)?;
            config.base_url = url.to_string();
        }
        Ok(config)
    }
}

fn validate_base_url(base_url: &str) -> Result<()> {
    Url::parse(base_url)
        .map(|_| ())
        .map_err(|e| Error::ConfigValidation(format!("Invalid base URL '{}': {}", base_url, e)))
}
