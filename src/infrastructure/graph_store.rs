// Graph Store port - property-graph CRUD and neighborhood projections
// Every mutation is a single idempotent statement: replays are benign.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::core::{Id, Timestamp};
use crate::error::AppResult;
use crate::models::{CandidateQuery, CandidateRow, CandidateSource, Post, UserProfile, UserWithRelationships};

/// Graph store interface shared by both services.
///
/// Mutations return `true` iff the underlying node or edge set changed.
/// Precondition failures surface as errors:
/// - `NotFound` when an endpoint node or a required edge is missing
/// - `Conflict` when an existing edge forbids the mutation
/// - `Validation` when a user is related to themselves
#[async_trait]
pub trait GraphStore: Send + Sync + std::fmt::Debug {
    /// Create indexes and tables. Safe to call on every startup.
    async fn ensure_schema(&self) -> AppResult<()>;

    // User CRUD
    async fn create_user(&self, id: Id, created_at: Timestamp) -> AppResult<bool>;
    async fn update_user(&self, id: Id, profile: UserProfile) -> AppResult<bool>;
    /// Detach-delete. Authored posts survive with a null author.
    async fn delete_user(&self, id: Id) -> AppResult<bool>;

    // Post CRUD
    async fn create_post(
        &self,
        post_id: Id,
        user_id: Id,
        content: &str,
        created_at: Timestamp,
    ) -> AppResult<bool>;
    async fn update_post_tags(&self, post_id: Id, content: &str) -> AppResult<bool>;
    async fn delete_post(&self, post_id: Id) -> AppResult<bool>;
    async fn get_post(&self, post_id: Id) -> AppResult<Option<Post>>;

    // Social edges
    async fn add_friend(&self, a: Id, b: Id) -> AppResult<bool>;
    async fn remove_friend(&self, a: Id, b: Id) -> AppResult<bool>;
    async fn follow_user(&self, a: Id, b: Id) -> AppResult<bool>;
    async fn unfollow_user(&self, a: Id, b: Id) -> AppResult<bool>;
    async fn send_friend_request(&self, a: Id, b: Id) -> AppResult<bool>;
    async fn accept_friend_request(&self, receiver: Id, sender: Id) -> AppResult<bool>;
    async fn decline_friend_request(&self, receiver: Id, sender: Id) -> AppResult<bool>;
    async fn block_user(&self, a: Id, b: Id) -> AppResult<bool>;
    async fn unblock_user(&self, a: Id, b: Id) -> AppResult<bool>;

    // Interaction edges
    async fn like_post(&self, user_id: Id, post_id: Id) -> AppResult<bool>;
    async fn unlike_post(&self, user_id: Id, post_id: Id) -> AppResult<bool>;
    async fn view_post(&self, user_id: Id, post_id: Id) -> AppResult<bool>;

    // Neighborhood reads
    async fn get_user_with_relationships(&self, id: Id) -> AppResult<Option<UserWithRelationships>>;
    /// Missing users are absent from the returned map
    async fn batch_get_user_with_relationships(
        &self,
        ids: &[Id],
    ) -> AppResult<HashMap<Id, UserWithRelationships>>;
}

/// Candidate generators over the post graph.
///
/// Each call returns at most `query.limit` rows admitted by
/// [`CandidateQuery::admits`], ordered as the source prescribes.
#[async_trait]
pub trait RecommendationStore: Send + Sync + std::fmt::Debug {
    async fn candidates(
        &self,
        source: CandidateSource,
        query: &CandidateQuery,
    ) -> AppResult<Vec<CandidateRow>>;
}

/// Combined store handle handed to the feed service
pub trait FeedStore: GraphStore + RecommendationStore {}

impl<T: GraphStore + RecommendationStore> FeedStore for T {}

pub(crate) fn ensure_distinct(a: Id, b: Id) -> AppResult<()> {
    if a == b {
        return Err(crate::error::AppError::Validation(format!(
            "user {} cannot be related to themselves",
            a
        )));
    }
    Ok(())
}
