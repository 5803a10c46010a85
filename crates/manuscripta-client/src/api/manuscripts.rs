use tokio_util::sync::CancellationToken;

use crate::api::{require_text, validate_id};
use crate::client::TenantAwareHttpClient;
use crate::models::{Manuscript, ManuscriptStatus, NewManuscript, Page, StatusUpdate};
use crate::{ClientError, Result};

pub const MAX_PAGE_SIZE: u32 = 100;

pub struct ManuscriptsApi<'a> {
    client: &'a TenantAwareHttpClient,
}

impl<'a> ManuscriptsApi<'a> {
    pub(crate) fn new(client: &'a TenantAwareHttpClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, id: &str, cancel: &CancellationToken) -> Result<Manuscript> {
        let id = validate_id("manuscript id", id)?;
        self.client
            .get_json("manuscripts.get", &format!("manuscripts/{}", id), cancel)
            .await
    }

    /// One page of the tenant's manuscripts; pages start at 1
    pub async fn list(
        &self,
        page: u32,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<Page<Manuscript>> {
        if page == 0 {
            return Err(ClientError::Validation("page starts at 1".to_string()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ClientError::Validation(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        let path = format!("manuscripts?page={}&page_size={}", page, page_size);
        self.client.get_json("manuscripts.list", &path, cancel).await
    }

    /// Create a manuscript.
    ///
    /// The declared file size is checked against the tenant's
    /// `max_file_size` before anything is sent.
    pub async fn create(
        &self,
        manuscript: &NewManuscript,
        cancel: &CancellationToken,
    ) -> Result<Manuscript> {
        require_text("title", &manuscript.title)?;
        require_text("abstract", &manuscript.abstract_text)?;
        if let Some(file) = &manuscript.file {
            require_text("file name", &file.file_name)?;
            let limit = self.client.configuration().configuration(None).max_file_size;
            if file.size_bytes == 0 {
                return Err(ClientError::Validation("file is empty".to_string()));
            }
            if file.size_bytes > limit {
                return Err(ClientError::Validation(format!(
                    "file '{}' is {} bytes, the limit is {} bytes",
                    file.file_name, file.size_bytes, limit
                )));
            }
        }
        self.client
            .post_json("manuscripts.create", "manuscripts", manuscript, cancel)
            .await
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: ManuscriptStatus,
        comment: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Manuscript> {
        let id = validate_id("manuscript id", id)?;
        let update = StatusUpdate {
            status,
            comment: comment.map(str::to_string),
        };
        self.client
            .put_json(
                "manuscripts.update_status",
                &format!("manuscripts/{}/status", id),
                &update,
                cancel,
            )
            .await
    }

    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let id = validate_id("manuscript id", id)?;
        self.client
            .delete("manuscripts.delete", &format!("manuscripts/{}", id), cancel)
            .await
    }
}
