//! Manuscripta Tenant Context
//!
//! This crate resolves which organization a call belongs to and makes that
//! tenant available to all code running on its behalf:
//! - Task-local ambient tenant context with a resolution cache
//! - Tenant id resolution from headers, bearer tokens and URLs
//! - Per-tenant effective configuration with fallback to global defaults

pub mod configuration;
pub mod provider;
pub mod resolver;

pub use configuration::TenantConfigurationProvider;
pub use provider::{
    TenantContextProvider, current_tenant, spawn_with_current_context, with_tenant,
    with_tenant_scope,
};
pub use resolver::TenantResolver;
