//! Tenant identification from inbound signals
//!
//! Resolution order is headers, then bearer-token claims, then the URL.
//! Every strategy degrades to "no match" on malformed input; nothing in this
//! module returns an error.

use base64::prelude::*;
use http::HeaderMap;
use http::header::{AUTHORIZATION, HOST};
use tracing::{debug, trace};
use url::{Host, Url};

use manuscripta_core::TenantContext;

use crate::provider::TenantContextProvider;

/// Header names consulted for a tenant id, highest priority first
pub const TENANT_HEADERS: [&str; 5] = [
    "X-Organization-Code",
    "X-Org-Code",
    "X-Tenant-Id",
    "Organization-Code",
    "Org-Code",
];

/// JWT claims consulted for a tenant id, highest priority first
pub const TENANT_CLAIMS: [&str; 5] = ["org", "organization", "org_code", "tenant", "tenant_id"];

/// Subdomain labels that never name a tenant
pub const RESERVED_SUBDOMAINS: [&str; 2] = ["www", "api"];

/// Path segments followed by a tenant id, as in `/orgs/{code}/...`
pub const PATH_MARKERS: [&str; 3] = ["orgs", "organizations", "tenants"];

/// Extracts an organization code from headers, tokens and URLs
#[derive(Debug, Clone, Default)]
pub struct TenantResolver;

impl TenantResolver {
    pub fn new() -> Self {
        Self
    }

    /// First non-blank value among [`TENANT_HEADERS`]
    pub fn from_headers(&self, headers: &HeaderMap) -> Option<String> {
        TENANT_HEADERS.iter().find_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .and_then(non_blank)
        })
    }

    /// Tenant claim from a JWT-like token.
    ///
    /// Accepts the raw token or an `Authorization` value with a `Bearer`
    /// prefix. The signature is not checked here; only the payload segment is
    /// decoded.
    pub fn from_token(&self, token: &str) -> Option<String> {
        let token = token.trim();
        let token = token
            .strip_prefix("Bearer ")
            .or_else(|| token.strip_prefix("bearer "))
            .unwrap_or(token)
            .trim();

        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 || parts[1].is_empty() {
            trace!("Token does not look like a JWT");
            return None;
        }

        let payload = BASE64_URL_SAFE_NO_PAD
            .decode(parts[1].trim_end_matches('='))
            .ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&payload).ok()?;
        let claims = claims.as_object()?;

        TENANT_CLAIMS.iter().find_map(|claim| match claims.get(*claim)? {
            serde_json::Value::String(s) => non_blank(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    /// Tenant from the left-most subdomain, else from a path marker segment
    pub fn from_url(&self, url: &str) -> Option<String> {
        let url = Url::parse(url.trim()).ok()?;
        self.from_subdomain(&url)
            .or_else(|| self.from_path(&url))
    }

    fn from_subdomain(&self, url: &Url) -> Option<String> {
        let Some(Host::Domain(domain)) = url.host() else {
            return None;
        };
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 3 {
            return None;
        }
        let candidate = labels[0];
        if RESERVED_SUBDOMAINS
            .iter()
            .any(|r| r.eq_ignore_ascii_case(candidate))
        {
            return None;
        }
        non_blank(candidate)
    }

    fn from_path(&self, url: &Url) -> Option<String> {
        let mut segments = url.path_segments()?;
        while let Some(segment) = segments.next() {
            if PATH_MARKERS.iter().any(|m| m.eq_ignore_ascii_case(segment)) {
                return segments.next().and_then(non_blank);
            }
        }
        None
    }

    /// Compose all strategies: headers, then token, then URL
    pub fn resolve(
        &self,
        headers: &HeaderMap,
        token: Option<&str>,
        url: Option<&str>,
    ) -> Option<String> {
        let resolved = self
            .from_headers(headers)
            .or_else(|| token.and_then(|t| self.from_token(t)))
            .or_else(|| url.and_then(|u| self.from_url(u)));
        debug!(tenant = ?resolved, "Tenant resolution finished");
        resolved
    }

    /// Resolve from an inbound HTTP request.
    ///
    /// The token comes from the `Authorization` header; the URL is the
    /// request URI when absolute, otherwise it is rebuilt from the `Host`
    /// header.
    pub fn resolve_from_request<B>(&self, request: &http::Request<B>) -> Option<String> {
        let headers = request.headers();
        let token = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());

        let uri = request.uri();
        let url = if uri.scheme().is_some() && uri.host().is_some() {
            Some(uri.to_string())
        } else {
            headers
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .map(|host| format!("http://{}{}", host, uri.path()))
        };

        self.resolve(headers, token, url.as_deref())
    }

    /// Resolve a request straight to a cached tenant context
    pub fn resolve_context<B>(
        &self,
        request: &http::Request<B>,
        provider: &TenantContextProvider,
    ) -> Option<TenantContext> {
        let code = self.resolve_from_request(request)?;
        provider.resolve_context(Some(&code))
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
