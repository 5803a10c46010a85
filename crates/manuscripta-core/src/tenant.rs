//! Tenant context value object for multi-tenancy support

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{Error, Result};

/// A single `(type, value)` claim attached to a tenant context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaim {
    pub claim_type: String,
    pub value: String,
}

impl UserClaim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// Identity and credentials of one organization using the SDK.
///
/// A context is immutable: every `with_*` method returns a new instance and
/// leaves the receiver untouched. Two contexts are equal when their
/// organization codes match, regardless of the other fields, so an updated
/// copy still identifies the same tenant.
///
/// # Example
/// ```
/// use manuscripta_core::tenant::TenantContext;
///
/// let ctx = TenantContext::new("acme").unwrap();
/// let keyed = ctx.with_api_key("key123");
///
/// assert_eq!(ctx.api_key(), None);
/// assert_eq!(keyed.api_key(), Some("key123"));
/// assert_eq!(ctx, keyed);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct TenantContext {
    organization_code: String,
    organization_name: String,
    api_key: Option<String>,
    base_url: Option<String>,
    #[serde(default)]
    properties: HashMap<String, serde_json::Value>,
    #[serde(default)]
    user_claims: Vec<UserClaim>,
    created_at: DateTime<Utc>,
}

impl TenantContext {
    /// Create a context whose name defaults to the organization code.
    ///
    /// # Errors
    /// - `Error::InvalidTenant` if the code is empty or whitespace
    pub fn new(organization_code: impl Into<String>) -> Result<Self> {
        let organization_code = organization_code.into();
        let name = organization_code.clone();
        Self::with_name(organization_code, name)
    }

    /// Create a context with an explicit organization name.
    pub fn with_name(
        organization_code: impl Into<String>,
        organization_name: impl Into<String>,
    ) -> Result<Self> {
        let organization_code = organization_code.into();
        if organization_code.trim().is_empty() {
            return Err(Error::InvalidTenant(
                "Organization code must not be empty".to_string(),
            ));
        }

        Ok(Self {
            organization_code,
            organization_name: organization_name.into(),
            api_key: None,
            base_url: None,
            properties: HashMap::new(),
            user_claims: Vec::new(),
            created_at: Utc::now(),
        })
    }

    pub fn organization_code(&self) -> &str {
        &self.organization_code
    }

    pub fn organization_name(&self) -> &str {
        &self.organization_name
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn properties(&self) -> &HashMap<String, serde_json::Value> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn user_claims(&self) -> &[UserClaim] {
        &self.user_claims
    }

    /// First claim value of the given type, if any.
    pub fn claim(&self, claim_type: &str) -> Option<&str> {
        self.user_claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the context carries a usable (non-blank) API key
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Copy of this context with the given API key
    pub fn with_api_key(&self, api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..self.clone()
        }
    }

    /// Copy of this context with the given base URL
    pub fn with_base_url(&self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..self.clone()
        }
    }

    /// Copy of this context with `properties` merged over the existing ones
    pub fn with_properties<I, K>(&self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        let mut merged = self.properties.clone();
        merged.extend(properties.into_iter().map(|(k, v)| (k.into(), v)));
        Self {
            properties: merged,
            ..self.clone()
        }
    }

    /// Copy of this context with its claims replaced by `claims`
    pub fn with_user_claims(&self, claims: impl IntoIterator<Item = UserClaim>) -> Self {
        Self {
            user_claims: claims.into_iter().collect(),
            ..self.clone()
        }
    }
}

impl PartialEq for TenantContext {
    fn eq(&self, other: &Self) -> bool {
        self.organization_code == other.organization_code
    }
}

impl Eq for TenantContext {}

impl Hash for TenantContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.organization_code.hash(state);
    }
}

// API keys never end up in logs.
impl fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantContext")
            .field("organization_code", &self.organization_code)
            .field("organization_name", &self.organization_name)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("properties", &self.properties)
            .field("user_claims", &self.user_claims)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl fmt::Display for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.organization_code)
    }
}
