// Store decorators - observation wrapper composed once at startup
// Times every port call, logs its outcome and feeds the metrics collector.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::core::{Id, Timestamp};
use crate::error::{AppResult, ErrorKind};
use crate::infrastructure::graph_store::{GraphStore, RecommendationStore};
use crate::infrastructure::monitoring::MetricsCollector;
use crate::models::{
    CandidateQuery, CandidateRow, CandidateSource, Post, UserProfile, UserWithRelationships,
};

/// Observation wrapper around any store port
#[derive(Debug)]
pub struct ObservedGraphStore<S: ?Sized> {
    inner: Arc<S>,
    metrics: Arc<MetricsCollector>,
}

impl<S: ?Sized> ObservedGraphStore<S> {
    pub fn new(inner: Arc<S>, metrics: Arc<MetricsCollector>) -> Self {
        Self { inner, metrics }
    }

    async fn observe<T, F>(&self, operation: &'static str, call: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>> + Send,
    {
        let start = Instant::now();
        let result = call.await;
        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        match &result {
            Ok(_) => debug!(operation, elapsed_ms, "Store call succeeded"),
            Err(e) => match e.kind() {
                ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Conflict => {
                    debug!(operation, elapsed_ms, error = %e, "Store call rejected")
                }
                _ => warn!(operation, elapsed_ms, error = %e, "Store call failed"),
            },
        }
        self.metrics
            .record_operation(operation, elapsed, result.is_ok())
            .await;
        result
    }
}

#[async_trait]
impl<S> GraphStore for ObservedGraphStore<S>
where
    S: GraphStore + ?Sized,
{
    async fn ensure_schema(&self) -> AppResult<()> {
        self.observe("ensure_schema", self.inner.ensure_schema()).await
    }

    async fn create_user(&self, id: Id, created_at: Timestamp) -> AppResult<bool> {
        self.observe("create_user", self.inner.create_user(id, created_at))
            .await
    }

    async fn update_user(&self, id: Id, profile: UserProfile) -> AppResult<bool> {
        self.observe("update_user", self.inner.update_user(id, profile))
            .await
    }

    async fn delete_user(&self, id: Id) -> AppResult<bool> {
        self.observe("delete_user", self.inner.delete_user(id)).await
    }

    async fn create_post(
        &self,
        post_id: Id,
        user_id: Id,
        content: &str,
        created_at: Timestamp,
    ) -> AppResult<bool> {
        self.observe(
            "create_post",
            self.inner.create_post(post_id, user_id, content, created_at),
        )
        .await
    }

    async fn update_post_tags(&self, post_id: Id, content: &str) -> AppResult<bool> {
        self.observe("update_post_tags", self.inner.update_post_tags(post_id, content))
            .await
    }

    async fn delete_post(&self, post_id: Id) -> AppResult<bool> {
        self.observe("delete_post", self.inner.delete_post(post_id))
            .await
    }

    async fn get_post(&self, post_id: Id) -> AppResult<Option<Post>> {
        self.observe("get_post", self.inner.get_post(post_id)).await
    }

    async fn add_friend(&self, a: Id, b: Id) -> AppResult<bool> {
        self.observe("add_friend", self.inner.add_friend(a, b)).await
    }

    async fn remove_friend(&self, a: Id, b: Id) -> AppResult<bool> {
        self.observe("remove_friend", self.inner.remove_friend(a, b))
            .await
    }

    async fn follow_user(&self, a: Id, b: Id) -> AppResult<bool> {
        self.observe("follow_user", self.inner.follow_user(a, b)).await
    }

    async fn unfollow_user(&self, a: Id, b: Id) -> AppResult<bool> {
        self.observe("unfollow_user", self.inner.unfollow_user(a, b))
            .await
    }

    async fn send_friend_request(&self, a: Id, b: Id) -> AppResult<bool> {
        self.observe("send_friend_request", self.inner.send_friend_request(a, b))
            .await
    }

    async fn accept_friend_request(&self, receiver: Id, sender: Id) -> AppResult<bool> {
        self.observe(
            "accept_friend_request",
            self.inner.accept_friend_request(receiver, sender),
        )
        .await
    }

    async fn decline_friend_request(&self, receiver: Id, sender: Id) -> AppResult<bool> {
        self.observe(
            "decline_friend_request",
            self.inner.decline_friend_request(receiver, sender),
        )
        .await
    }

    async fn block_user(&self, a: Id, b: Id) -> AppResult<bool> {
        self.observe("block_user", self.inner.block_user(a, b)).await
    }

    async fn unblock_user(&self, a: Id, b: Id) -> AppResult<bool> {
        self.observe("unblock_user", self.inner.unblock_user(a, b))
            .await
    }

    async fn like_post(&self, user_id: Id, post_id: Id) -> AppResult<bool> {
        self.observe("like_post", self.inner.like_post(user_id, post_id))
            .await
    }

    async fn unlike_post(&self, user_id: Id, post_id: Id) -> AppResult<bool> {
        self.observe("unlike_post", self.inner.unlike_post(user_id, post_id))
            .await
    }

    async fn view_post(&self, user_id: Id, post_id: Id) -> AppResult<bool> {
        self.observe("view_post", self.inner.view_post(user_id, post_id))
            .await
    }

    async fn get_user_with_relationships(&self, id: Id) -> AppResult<Option<UserWithRelationships>> {
        self.observe(
            "get_user_with_relationships",
            self.inner.get_user_with_relationships(id),
        )
        .await
    }

    async fn batch_get_user_with_relationships(
        &self,
        ids: &[Id],
    ) -> AppResult<HashMap<Id, UserWithRelationships>> {
        self.observe(
            "batch_get_user_with_relationships",
            self.inner.batch_get_user_with_relationships(ids),
        )
        .await
    }
}

#[async_trait]
impl<S> RecommendationStore for ObservedGraphStore<S>
where
    S: RecommendationStore + ?Sized,
{
    async fn candidates(
        &self,
        source: CandidateSource,
        query: &CandidateQuery,
    ) -> AppResult<Vec<CandidateRow>> {
        let operation = match source {
            CandidateSource::Friends => "candidates_friends",
            CandidateSource::Followers => "candidates_followers",
            CandidateSource::Tags => "candidates_tags",
            CandidateSource::Popular => "candidates_popular",
            CandidateSource::Recent => "candidates_recent",
        };
        self.observe(operation, self.inner.candidates(source, query))
            .await
    }
}
