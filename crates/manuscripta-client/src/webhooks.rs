//! Webhook deliveries
//!
//! The API posts JSON deliveries signed with HMAC-SHA256 over the raw body.
//! [`WebhookDispatcher`] checks the signature, decodes the event and hands
//! it to the handlers registered for its kind. When the delivery names an
//! organization, handlers run with that tenant as the ambient context.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use manuscripta_tenant::{TenantContextProvider, with_tenant};

use crate::models::{JournalRecommendation, ManuscriptStatus};
use crate::{ClientError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature
pub const SIGNATURE_HEADER: &str = "X-Manuscripta-Signature";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WebhookEvent {
    #[serde(rename = "manuscript.submitted")]
    ManuscriptSubmitted { manuscript_id: String, title: String },

    #[serde(rename = "manuscript.status_changed")]
    ManuscriptStatusChanged {
        manuscript_id: String,
        #[serde(default)]
        previous: Option<ManuscriptStatus>,
        current: ManuscriptStatus,
    },

    #[serde(rename = "recommendation.completed")]
    RecommendationCompleted {
        manuscript_id: String,
        #[serde(default)]
        recommendations: Vec<JournalRecommendation>,
    },

    #[serde(rename = "author_group.updated")]
    AuthorGroupUpdated {
        group_id: String,
        #[serde(default)]
        member_count: Option<u32>,
    },
}

impl WebhookEvent {
    pub fn kind(&self) -> WebhookEventKind {
        match self {
            WebhookEvent::ManuscriptSubmitted { .. } => WebhookEventKind::ManuscriptSubmitted,
            WebhookEvent::ManuscriptStatusChanged { .. } => {
                WebhookEventKind::ManuscriptStatusChanged
            }
            WebhookEvent::RecommendationCompleted { .. } => {
                WebhookEventKind::RecommendationCompleted
            }
            WebhookEvent::AuthorGroupUpdated { .. } => WebhookEventKind::AuthorGroupUpdated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookEventKind {
    ManuscriptSubmitted,
    ManuscriptStatusChanged,
    RecommendationCompleted,
    AuthorGroupUpdated,
}

impl WebhookEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventKind::ManuscriptSubmitted => "manuscript.submitted",
            WebhookEventKind::ManuscriptStatusChanged => "manuscript.status_changed",
            WebhookEventKind::RecommendationCompleted => "recommendation.completed",
            WebhookEventKind::AuthorGroupUpdated => "author_group.updated",
        }
    }
}

impl fmt::Display for WebhookEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delivery as posted by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub event: WebhookEvent,
}

impl WebhookDelivery {
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| ClientError::Webhook(format!("Malformed delivery: {}", e)))
    }
}

#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, delivery: &WebhookDelivery) -> Result<()>;
}

#[async_trait]
impl<F> WebhookHandler for F
where
    F: Fn(&WebhookDelivery) -> Result<()> + Send + Sync,
{
    async fn handle(&self, delivery: &WebhookDelivery) -> Result<()> {
        self(delivery)
    }
}

/// Registry of handlers keyed by event kind
#[derive(Default)]
pub struct WebhookDispatcher {
    handlers: HashMap<WebhookEventKind, Vec<Arc<dyn WebhookHandler>>>,
    contexts: Option<Arc<TenantContextProvider>>,
}

impl fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&str> = self.handlers.keys().map(|k| k.as_str()).collect();
        f.debug_struct("WebhookDispatcher")
            .field("kinds", &kinds)
            .field("tenant_scoped", &self.contexts.is_some())
            .finish()
    }
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run handlers inside the tenant context named by each delivery
    pub fn with_contexts(mut self, contexts: Arc<TenantContextProvider>) -> Self {
        self.contexts = Some(contexts);
        self
    }

    pub fn on<H>(mut self, kind: WebhookEventKind, handler: H) -> Self
    where
        H: WebhookHandler + 'static,
    {
        self.register(kind, Arc::new(handler));
        self
    }

    pub fn register(&mut self, kind: WebhookEventKind, handler: Arc<dyn WebhookHandler>) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    pub fn handler_count(&self, kind: WebhookEventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Hand `delivery` to its handlers in registration order.
    ///
    /// Stops at the first failing handler. Returns how many handlers ran.
    pub async fn dispatch(&self, delivery: &WebhookDelivery) -> Result<usize> {
        let kind = delivery.event.kind();
        let Some(handlers) = self.handlers.get(&kind) else {
            debug!(delivery = %delivery.id, kind = %kind, "No handler registered");
            return Ok(0);
        };

        let run = async {
            for handler in handlers {
                if let Err(e) = handler.handle(delivery).await {
                    warn!(delivery = %delivery.id, kind = %kind, error = %e, "Webhook handler failed");
                    return Err(e);
                }
            }
            Ok(handlers.len())
        };

        let context = delivery
            .organization_code
            .as_deref()
            .and_then(|code| self.contexts.as_ref()?.resolve_context(Some(code)));
        match context {
            Some(context) => with_tenant(context, run).await,
            None => run.await,
        }
    }

    /// Verify the signature of a raw payload, then decode and dispatch it
    pub async fn dispatch_verified(
        &self,
        secret: &str,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<usize> {
        let signature = signature_header
            .ok_or_else(|| ClientError::Webhook("Missing signature header".to_string()))?;
        if !verify_signature(secret, payload, signature) {
            return Err(ClientError::Webhook("Invalid signature".to_string()));
        }
        let delivery = WebhookDelivery::from_slice(payload)?;
        self.dispatch(&delivery).await
    }
}

/// Hex HMAC-SHA256 of `payload` under `secret`
pub fn sign(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Check `signature_header` against the payload.
///
/// Accepts the bare hex digest or the `sha256=` prefixed form, in either
/// case. Comparison is constant-time.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let provided = signature_header.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let provided = provided.to_ascii_lowercase();

    let Some(expected) = sign(secret, payload) else {
        return false;
    };
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}
