use tokio_util::sync::CancellationToken;

use crate::api::{require_text, validate_id};
use crate::client::TenantAwareHttpClient;
use crate::models::{Journal, JournalRecommendation, RecommendationRequest};
use crate::{ClientError, Result};

/// Largest number of recommendations one request may ask for
pub const MAX_RECOMMENDATIONS: u32 = 50;

pub struct JournalsApi<'a> {
    client: &'a TenantAwareHttpClient,
}

impl<'a> JournalsApi<'a> {
    pub(crate) fn new(client: &'a TenantAwareHttpClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, id: &str, cancel: &CancellationToken) -> Result<Journal> {
        let id = validate_id("journal id", id)?;
        self.client
            .get_json("journals.get", &format!("journals/{}", id), cancel)
            .await
    }

    /// Journals whose name or subject areas match `query`
    pub async fn search(&self, query: &str, cancel: &CancellationToken) -> Result<Vec<Journal>> {
        require_text("search query", query)?;
        let encoded: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("query", query.trim())
            .finish();
        self.client
            .get_json("journals.search", &format!("journals?{}", encoded), cancel)
            .await
    }

    /// Journals ranked by fit for an abstract
    pub async fn recommend(
        &self,
        request: &RecommendationRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<JournalRecommendation>> {
        require_text("abstract", &request.abstract_text)?;
        if request.limit == 0 || request.limit > MAX_RECOMMENDATIONS {
            return Err(ClientError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_RECOMMENDATIONS
            )));
        }
        self.client
            .post_json("journals.recommend", "journals/recommend", request, cancel)
            .await
    }
}
