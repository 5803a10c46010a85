//! Subcommand implementations, kept apart from argument parsing

use anyhow::{Context, bail};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use manuscripta_client::models::{JournalRecommendation, RecommendationRequest};
use manuscripta_client::{ClientSettings, TenantAwareHttpClient};
use manuscripta_core::HttpRequest;
use manuscripta_observability::PrometheusExporter;
use manuscripta_tenant::{TenantConfigurationProvider, TenantContextProvider, TenantResolver};

/// Endpoint name used for `metrics --probe` requests
pub const PROBE_ENDPOINT: &str = "cli.probe";

pub fn resolve_tenant(
    headers: &[String],
    token: Option<&str>,
    url: Option<&str>,
) -> anyhow::Result<Option<String>> {
    let mut map = HeaderMap::new();
    for raw in headers {
        let (name, value) = raw
            .split_once(':')
            .with_context(|| format!("Header '{}' is not in 'Name: value' form", raw))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("Invalid header name in '{}'", raw))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("Invalid header value in '{}'", raw))?;
        map.append(name, value);
    }
    Ok(TenantResolver::new().resolve(&map, token, url))
}

pub fn show_config(settings: ClientSettings, tenant: Option<&str>) -> anyhow::Result<String> {
    let resilience = settings.resilience_options();
    let provider =
        TenantConfigurationProvider::new(settings.sdk, Arc::new(TenantContextProvider::new()));

    let mut config = provider.configuration(tenant);
    config.api_key = config.api_key.as_deref().map(mask);

    let view = serde_json::json!({
        "tenant": tenant,
        "sdk": config,
        "resilience": resilience,
        "endpoints": settings.endpoints,
    });
    Ok(serde_yaml::to_string(&view)?)
}

pub async fn recommend_journals(
    settings: ClientSettings,
    tenant: &str,
    abstract_text: String,
    keywords: Vec<String>,
    limit: u32,
) -> anyhow::Result<Vec<JournalRecommendation>> {
    let client = TenantAwareHttpClient::from_settings(settings)?;
    let cancel = cancel_on_ctrl_c();

    let request = RecommendationRequest {
        abstract_text,
        keywords,
        limit,
    };
    let recommendations = client
        .with_tenant(tenant, client.journals().recommend(&request, &cancel))
        .await??;
    info!(tenant, count = recommendations.len(), "Journals recommended");
    Ok(recommendations)
}

/// Render the resilience counters, after an optional probe request
/// `(path, tenant)`. A failing probe is reported in the log only; its
/// failure shows up in the counters.
pub async fn metrics(
    settings: ClientSettings,
    probe: Option<(String, String)>,
) -> anyhow::Result<String> {
    let client = TenantAwareHttpClient::from_settings(settings)?;

    if let Some((path, tenant)) = probe {
        if path.trim().is_empty() {
            bail!("Probe path must not be empty");
        }
        let cancel = cancel_on_ctrl_c();
        let sent = client
            .with_tenant(
                &tenant,
                client.send(PROBE_ENDPOINT, HttpRequest::get(path.trim()), &cancel),
            )
            .await?;
        match sent {
            Ok(response) => info!(tenant = %tenant, status = response.status.as_u16(), "Probe finished"),
            Err(e) => warn!(tenant = %tenant, error = %e, "Probe failed"),
        }
    }

    let exporter = PrometheusExporter::new()?;
    exporter.sync(client.resilience())?;
    Ok(exporter.render()?)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

/// Keep the last four characters of a secret
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
