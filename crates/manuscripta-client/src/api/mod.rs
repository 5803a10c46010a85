//! Entity APIs
//!
//! Thin wrappers over [`TenantAwareHttpClient`](crate::TenantAwareHttpClient):
//! validate the input, pick the endpoint name and path, decode the answer.
//! Endpoint names follow `"{module}.{operation}"` and select the resilience
//! pipeline.

pub mod author_groups;
pub mod custom_fields;
pub mod journals;
pub mod manuscripts;

pub use author_groups::AuthorGroupsApi;
pub use custom_fields::CustomFieldsApi;
pub use journals::JournalsApi;
pub use manuscripts::ManuscriptsApi;

use crate::{ClientError, Result};

/// Check an identifier before it is placed into a URL path
pub(crate) fn validate_id<'a>(what: &str, id: &'a str) -> Result<&'a str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ClientError::Validation(format!("{} must not be empty", what)));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
    {
        return Err(ClientError::Validation(format!(
            "{} contains characters not allowed in a path: '{}'",
            what, id
        )));
    }
    Ok(id)
}

pub(crate) fn require_text(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(ClientError::Validation(format!("{} must not be empty", what)))
    } else {
        Ok(())
    }
}
