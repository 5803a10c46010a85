use tokio_util::sync::CancellationToken;

use manuscripta_core::HttpResponse;
use manuscripta_observability::PrometheusExporter;
use manuscripta_observability::metrics::{CIRCUIT_STATE_METRIC, EVENTS_METRIC};
use manuscripta_resilience::{ResilienceModule, ResilienceOptions};

#[tokio::test]
async fn test_exports_live_module_counters() {
    let module = ResilienceModule::new(ResilienceOptions::default()).unwrap();
    let cancel = CancellationToken::new();
    for _ in 0..3 {
        module
            .execute_named(
                "journals.search",
                None,
                |_: CancellationToken| async { Ok(HttpResponse::from_status(200)) },
                &cancel,
            )
            .await
            .unwrap();
    }

    let exporter = PrometheusExporter::new().unwrap();
    exporter.sync(&module).unwrap();
    exporter.sync(&module).unwrap();

    let text = exporter.render().unwrap();
    assert!(text.contains(EVENTS_METRIC));
    let success = text
        .lines()
        .find(|line| {
            line.starts_with(EVENTS_METRIC)
                && line.contains(r#"event="requests.success""#)
                && line.contains(r#"pipeline="journals.search""#)
        })
        .unwrap();
    assert!(success.ends_with(" 3"));
    assert!(text.contains(r#"manuscripta_circuit_breaker_state{pipeline="journals.search"} 0"#));
    assert!(text.contains(CIRCUIT_STATE_METRIC));
}

fn success_count(exporter: &PrometheusExporter, pipeline: &str) -> Option<String> {
    let text = exporter.render().unwrap();
    text.lines()
        .find(|line| {
            line.starts_with(EVENTS_METRIC)
                && line.contains(r#"event="requests.success""#)
                && line.contains(&format!(r#"pipeline="{}""#, pipeline))
        })
        .and_then(|line| line.rsplit(' ').next())
        .map(str::to_string)
}

#[tokio::test]
async fn test_counts_survive_module_reset() {
    let module = ResilienceModule::new(ResilienceOptions::default()).unwrap();
    let cancel = CancellationToken::new();
    let succeed = |_: CancellationToken| async { Ok(HttpResponse::from_status(200)) };

    for _ in 0..3 {
        module.execute(succeed, &cancel).await.unwrap();
    }
    let exporter = PrometheusExporter::new().unwrap();
    exporter.sync(&module).unwrap();
    assert_eq!(success_count(&exporter, "global").as_deref(), Some("3"));

    // More calls after the reset than before it
    module.reset().unwrap();
    for _ in 0..5 {
        module.execute(succeed, &cancel).await.unwrap();
    }
    exporter.sync(&module).unwrap();
    assert_eq!(success_count(&exporter, "global").as_deref(), Some("8"));

    exporter.sync(&module).unwrap();
    assert_eq!(success_count(&exporter, "global").as_deref(), Some("8"));
}

#[tokio::test]
async fn test_sync_fails_after_dispose() {
    let module = ResilienceModule::new(ResilienceOptions::default()).unwrap();
    module.dispose();

    let exporter = PrometheusExporter::new().unwrap();
    assert!(exporter.sync(&module).is_err());
}
