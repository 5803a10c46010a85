//! Manuscripta Client
//!
//! Tenant-aware access to the Manuscripta API:
//! - [`TenantAwareHttpClient`] authenticates and routes every call for the
//!   ambient tenant and runs it through the resilience pipeline
//! - Entity APIs for manuscripts, journals, author groups and custom fields
//! - Webhook signature checks and typed dispatch
//!
//! ```no_run
//! use manuscripta_client::{ClientSettings, TenantAwareHttpClient};
//! use manuscripta_client::models::RecommendationRequest;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> manuscripta_client::Result<()> {
//! let client = TenantAwareHttpClient::from_settings(ClientSettings::from_file("manuscripta.yaml")?)?;
//! let cancel = CancellationToken::new();
//! let request = RecommendationRequest::new("Memory safety without garbage collection");
//! let journals = client
//!     .with_tenant("acme", client.journals().recommend(&request, &cancel))
//!     .await??;
//! # let _ = journals;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod settings;
pub mod transport;
pub mod webhooks;

pub use api::{AuthorGroupsApi, CustomFieldsApi, JournalsApi, ManuscriptsApi};
pub use auth::{API_KEY_HEADER, ORGANIZATION_HEADER, TenantAwareAuthenticator};
pub use client::TenantAwareHttpClient;
pub use error::{ClientError, Result};
pub use settings::ClientSettings;
pub use transport::{ReqwestTransport, create_client};
pub use webhooks::{
    SIGNATURE_HEADER, WebhookDelivery, WebhookDispatcher, WebhookEvent, WebhookEventKind,
    WebhookHandler, verify_signature,
};
