//! Concurrent call chains must never observe each other's tenant.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use manuscripta_tenant::{TenantContextProvider, spawn_with_current_context, with_tenant_scope};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_chains_are_isolated() {
    let provider = Arc::new(TenantContextProvider::new());
    let mut handles = Vec::new();

    for i in 0..64 {
        let provider = Arc::clone(&provider);
        handles.push(tokio::spawn(with_tenant_scope(async move {
            let code = format!("tenant-{}", i);
            let ctx = provider.resolve_context(Some(&code)).unwrap();
            provider.set_current_context(Some(ctx)).unwrap();

            for round in 0..5 {
                tokio::time::sleep(Duration::from_millis((i % 7 + round) as u64)).await;
                let seen = provider.current_context().unwrap();
                assert_eq!(seen.organization_code(), code);
            }
            code
        })));
    }

    let results = join_all(handles).await;
    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), format!("tenant-{}", i));
    }
    assert_eq!(provider.cached_count(), 64);
}

#[tokio::test]
async fn test_setting_in_one_chain_is_invisible_to_another() {
    let provider = Arc::new(TenantContextProvider::new());
    let (set_tx, set_rx) = tokio::sync::oneshot::channel::<()>();
    let (checked_tx, checked_rx) = tokio::sync::oneshot::channel::<()>();

    let writer = {
        let provider = Arc::clone(&provider);
        tokio::spawn(with_tenant_scope(async move {
            let ctx = provider.resolve_context(Some("chain-a")).unwrap();
            provider.set_current_context(Some(ctx)).unwrap();
            set_tx.send(()).unwrap();
            checked_rx.await.unwrap();
            provider.current_context().map(|c| c.organization_code().to_string())
        }))
    };

    let reader = {
        let provider = Arc::clone(&provider);
        tokio::spawn(with_tenant_scope(async move {
            set_rx.await.unwrap();
            let seen = provider.current_context();
            checked_tx.send(()).unwrap();
            seen
        }))
    };

    assert!(reader.await.unwrap().is_none());
    assert_eq!(writer.await.unwrap().as_deref(), Some("chain-a"));
}

#[tokio::test]
async fn test_children_inherit_but_do_not_leak_back() {
    let provider = Arc::new(TenantContextProvider::new());

    with_tenant_scope(async {
        let parent = provider.resolve_context(Some("parent")).unwrap();
        provider.set_current_context(Some(parent)).unwrap();

        let child_provider = Arc::clone(&provider);
        let child = spawn_with_current_context(async move {
            let inherited = child_provider.current_context().unwrap();
            assert_eq!(inherited.organization_code(), "parent");

            let other = child_provider.resolve_context(Some("child")).unwrap();
            child_provider.set_current_context(Some(other)).unwrap();
            child_provider.current_context().unwrap()
        });

        assert_eq!(child.await.unwrap().organization_code(), "child");
        assert_eq!(
            provider.current_context().unwrap().organization_code(),
            "parent"
        );
    })
    .await;
}
