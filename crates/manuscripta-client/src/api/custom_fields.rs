use tokio_util::sync::CancellationToken;

use crate::api::{require_text, validate_id};
use crate::client::TenantAwareHttpClient;
use crate::models::{CustomField, CustomFieldType, NewCustomField};
use crate::{ClientError, Result};

pub struct CustomFieldsApi<'a> {
    client: &'a TenantAwareHttpClient,
}

impl<'a> CustomFieldsApi<'a> {
    pub(crate) fn new(client: &'a TenantAwareHttpClient) -> Self {
        Self { client }
    }

    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<CustomField>> {
        self.client
            .get_json("custom_fields.list", "custom-fields", cancel)
            .await
    }

    /// Define a field. Enum fields need at least one option, other types
    /// take none.
    pub async fn create(
        &self,
        field: &NewCustomField,
        cancel: &CancellationToken,
    ) -> Result<CustomField> {
        require_text("field name", &field.name)?;
        match field.field_type {
            CustomFieldType::Enum if field.options.iter().all(|o| o.trim().is_empty()) => {
                return Err(ClientError::Validation(
                    "enum fields need at least one option".to_string(),
                ));
            }
            CustomFieldType::Enum => {}
            _ if !field.options.is_empty() => {
                return Err(ClientError::Validation(format!(
                    "options are only allowed on enum fields, '{}' is not one",
                    field.name
                )));
            }
            _ => {}
        }
        self.client
            .post_json("custom_fields.create", "custom-fields", field, cancel)
            .await
    }

    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let id = validate_id("custom field id", id)?;
        self.client
            .delete("custom_fields.delete", &format!("custom-fields/{}", id), cancel)
            .await
    }
}
