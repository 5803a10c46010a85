use tokio_util::sync::CancellationToken;

use crate::api::{require_text, validate_id};
use crate::client::TenantAwareHttpClient;
use crate::models::{AuthorGroup, AuthorGroupMember, NewAuthorGroup};
use crate::Result;

pub struct AuthorGroupsApi<'a> {
    client: &'a TenantAwareHttpClient,
}

impl<'a> AuthorGroupsApi<'a> {
    pub(crate) fn new(client: &'a TenantAwareHttpClient) -> Self {
        Self { client }
    }

    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<AuthorGroup>> {
        self.client
            .get_json("author_groups.list", "author-groups", cancel)
            .await
    }

    pub async fn get(&self, id: &str, cancel: &CancellationToken) -> Result<AuthorGroup> {
        let id = validate_id("author group id", id)?;
        self.client
            .get_json("author_groups.get", &format!("author-groups/{}", id), cancel)
            .await
    }

    pub async fn create(
        &self,
        group: &NewAuthorGroup,
        cancel: &CancellationToken,
    ) -> Result<AuthorGroup> {
        require_text("group name", &group.name)?;
        self.client
            .post_json("author_groups.create", "author-groups", group, cancel)
            .await
    }

    /// Add a member; returns the updated group
    pub async fn add_member(
        &self,
        group_id: &str,
        member: &AuthorGroupMember,
        cancel: &CancellationToken,
    ) -> Result<AuthorGroup> {
        let group_id = validate_id("author group id", group_id)?;
        validate_id("author id", &member.author_id)?;
        self.client
            .post_json(
                "author_groups.add_member",
                &format!("author-groups/{}/members", group_id),
                member,
                cancel,
            )
            .await
    }

    pub async fn remove_member(
        &self,
        group_id: &str,
        author_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let group_id = validate_id("author group id", group_id)?;
        let author_id = validate_id("author id", author_id)?;
        self.client
            .delete(
                "author_groups.remove_member",
                &format!("author-groups/{}/members/{}", group_id, author_id),
                cancel,
            )
            .await
    }
}
