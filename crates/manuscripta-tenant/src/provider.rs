//! Ambient tenant context
//!
//! The "current" tenant lives in a tokio task-local slot. A slot is opened
//! with [`with_tenant`] (or [`TenantContextProvider::scope`]) and flows
//! through every `.await` inside that future, while futures scoped
//! separately, for example two requests handled concurrently, each see their
//! own slot. Tokio does not carry task-locals into `tokio::spawn`, so child
//! tasks that should inherit the tenant are started with
//! [`spawn_with_current_context`].

use dashmap::DashMap;
use std::cell::RefCell;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::debug;

use manuscripta_core::{Error, Result, TenantContext};

tokio::task_local! {
    static CURRENT_TENANT: RefCell<Option<TenantContext>>;
}

/// Run `future` with `context` as its ambient tenant
pub async fn with_tenant<F: Future>(context: TenantContext, future: F) -> F::Output {
    CURRENT_TENANT
        .scope(RefCell::new(Some(context)), future)
        .await
}

/// Run `future` with an empty tenant slot that it may fill itself
pub async fn with_tenant_scope<F: Future>(future: F) -> F::Output {
    CURRENT_TENANT.scope(RefCell::new(None), future).await
}

/// Ambient tenant of the calling task, if any
pub fn current_tenant() -> Option<TenantContext> {
    CURRENT_TENANT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// Spawn `future` on the runtime, inheriting the caller's ambient tenant
pub fn spawn_with_current_context<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let inherited = current_tenant();
    tokio::spawn(CURRENT_TENANT.scope(RefCell::new(inherited), future))
}

/// Owns the ambient tenant slot and the resolution cache.
///
/// All methods are safe to call from many tasks at once; the cache is keyed
/// by organization code and a code resolves to exactly one cached context.
#[derive(Debug, Default)]
pub struct TenantContextProvider {
    cache: DashMap<String, TenantContext>,
}

impl TenantContextProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ambient tenant of the current call chain
    pub fn current_context(&self) -> Option<TenantContext> {
        current_tenant()
    }

    /// Replace the ambient tenant of the current call chain.
    ///
    /// `None` clears it. The change is visible to the rest of the enclosing
    /// scope only, never to concurrently running chains.
    ///
    /// # Errors
    /// - `Error::NoTenantScope` when called outside [`with_tenant`] /
    ///   [`with_tenant_scope`]
    pub fn set_current_context(&self, context: Option<TenantContext>) -> Result<()> {
        let code = context.as_ref().map(|c| c.organization_code().to_string());
        CURRENT_TENANT
            .try_with(|slot| *slot.borrow_mut() = context)
            .map_err(|_| Error::NoTenantScope)?;
        debug!(tenant = ?code, "Ambient tenant context set");
        Ok(())
    }

    /// Equivalent to `set_current_context(None)`; a no-op outside a scope
    pub fn clear_current_context(&self) {
        let _ = CURRENT_TENANT.try_with(|slot| slot.borrow_mut().take());
    }

    /// Run `future` with its own ambient slot holding `context`
    pub async fn scope<F: Future>(&self, context: Option<TenantContext>, future: F) -> F::Output {
        CURRENT_TENANT.scope(RefCell::new(context), future).await
    }

    /// Cached context for `organization_code`, synthesizing a default one on
    /// first use.
    ///
    /// Returns `None` for a missing, empty or whitespace-only code. Any
    /// other code is used verbatim, surrounding whitespace included.
    pub fn resolve_context(&self, organization_code: Option<&str>) -> Option<TenantContext> {
        let code = organization_code?;
        if code.trim().is_empty() {
            return None;
        }

        if let Some(hit) = self.cache.get(code).map(|r| r.value().clone()) {
            return Some(hit);
        }

        let context = TenantContext::new(code).ok()?;
        let context = self
            .cache
            .entry(code.to_string())
            .or_insert_with(|| {
                debug!(tenant = code, "Synthesized default tenant context");
                context
            })
            .value()
            .clone();
        Some(context)
    }

    /// Replace the cached context for its organization.
    ///
    /// The ambient slot is refreshed too when it holds the same organization,
    /// so the current chain observes the update immediately.
    pub fn update_context(&self, context: TenantContext) {
        let code = context.organization_code().to_string();
        let _ = CURRENT_TENANT.try_with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.as_ref().is_some_and(|c| c == &context) {
                *slot = Some(context.clone());
            }
        });
        self.cache.insert(code.clone(), context);
        debug!(tenant = %code, "Tenant context updated");
    }

    /// Drop a cached context; returns it when present
    pub fn remove_context(&self, organization_code: &str) -> Option<TenantContext> {
        self.cache
            .remove(organization_code)
            .map(|(_, context)| context)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_resolve_blank_codes() {
        let provider = TenantContextProvider::new();
        assert!(provider.resolve_context(None).is_none());
        assert!(provider.resolve_context(Some("")).is_none());
        assert!(provider.resolve_context(Some("   ")).is_none());
        assert_eq!(provider.cached_count(), 0);
    }

    #[test]
    fn test_resolve_synthesizes_and_caches() {
        let provider = TenantContextProvider::new();
        let ctx = provider.resolve_context(Some("acme")).unwrap();

        assert_eq!(ctx.organization_code(), "acme");
        assert_eq!(ctx.organization_name(), "acme");
        assert!(ctx.api_key().is_none());
        assert!(ctx.base_url().is_none());
        assert_eq!(provider.cached_count(), 1);

        let again = provider.resolve_context(Some("acme")).unwrap();
        assert_eq!(again.created_at(), ctx.created_at());
    }

    #[test]
    fn test_resolve_keeps_code_verbatim() {
        let provider = TenantContextProvider::new();
        for code in ["acme", " acme", "acme\t", "ACME"] {
            let ctx = provider.resolve_context(Some(code)).unwrap();
            assert_eq!(ctx.organization_code(), code);
            assert!(TenantContext::new(code).is_ok());
        }
        assert_eq!(provider.cached_count(), 4);
    }

    #[test]
    fn test_resolve_returns_updated_context() {
        let provider = TenantContextProvider::new();
        let ctx = provider.resolve_context(Some("acme")).unwrap();
        provider.update_context(ctx.with_api_key("key123"));

        let resolved = provider.resolve_context(Some("acme")).unwrap();
        assert_eq!(resolved.api_key(), Some("key123"));
    }

    #[test]
    fn test_remove_and_clear() {
        let provider = TenantContextProvider::new();
        provider.resolve_context(Some("a"));
        provider.resolve_context(Some("b"));

        assert!(provider.remove_context("a").is_some());
        assert!(provider.remove_context("a").is_none());
        assert_eq!(provider.cached_count(), 1);

        provider.clear_cache();
        assert_eq!(provider.cached_count(), 0);
    }

    #[test]
    fn test_current_context_outside_scope() {
        let provider = TenantContextProvider::new();
        assert!(provider.current_context().is_none());

        let ctx = TenantContext::new("acme").unwrap();
        let result = provider.set_current_context(Some(ctx));
        assert!(matches!(result, Err(Error::NoTenantScope)));

        // Clearing outside a scope is harmless
        provider.clear_current_context();
    }

    #[tokio::test]
    async fn test_set_then_get_across_await() {
        let provider = TenantContextProvider::new();
        with_tenant_scope(async {
            assert!(provider.current_context().is_none());

            let ctx = TenantContext::new("acme").unwrap();
            provider.set_current_context(Some(ctx)).unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;

            let current = provider.current_context().unwrap();
            assert_eq!(current.organization_code(), "acme");

            provider.clear_current_context();
            assert!(provider.current_context().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn test_nested_scope_restores_outer() {
        let outer = TenantContext::new("outer").unwrap();
        let inner = TenantContext::new("inner").unwrap();

        with_tenant(outer, async {
            with_tenant(inner, async {
                assert_eq!(current_tenant().unwrap().organization_code(), "inner");
            })
            .await;
            assert_eq!(current_tenant().unwrap().organization_code(), "outer");
        })
        .await;
    }

    #[tokio::test]
    async fn test_spawn_with_current_context_inherits() {
        let ctx = TenantContext::new("acme").unwrap();
        let handle = with_tenant(ctx, async {
            spawn_with_current_context(async {
                tokio::task::yield_now().await;
                current_tenant().map(|c| c.organization_code().to_string())
            })
        })
        .await;

        assert_eq!(handle.await.unwrap().as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn test_plain_spawn_does_not_inherit() {
        let ctx = TenantContext::new("acme").unwrap();
        let handle = with_tenant(ctx, async { tokio::spawn(async { current_tenant() }) }).await;
        assert!(handle.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_context_refreshes_ambient_slot() {
        let provider = Arc::new(TenantContextProvider::new());
        let ctx = provider.resolve_context(Some("acme")).unwrap();

        provider
            .scope(Some(ctx.clone()), async {
                provider.update_context(ctx.with_api_key("fresh"));
                assert_eq!(provider.current_context().unwrap().api_key(), Some("fresh"));

                // A different organization's update leaves the slot alone
                let other = TenantContext::new("globex").unwrap().with_api_key("x");
                provider.update_context(other);
                assert_eq!(
                    provider.current_context().unwrap().organization_code(),
                    "acme"
                );
            })
            .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolution_yields_single_entry() {
        let provider = Arc::new(TenantContextProvider::new());
        let mut handles = Vec::new();

        for _ in 0..32 {
            let provider = Arc::clone(&provider);
            handles.push(tokio::spawn(async move {
                provider.resolve_context(Some("shared")).unwrap().created_at()
            }));
        }

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }

        assert_eq!(provider.cached_count(), 1);
        let cached = provider.resolve_context(Some("shared")).unwrap().created_at();
        assert!(stamps.iter().all(|s| *s == cached));
    }
}
