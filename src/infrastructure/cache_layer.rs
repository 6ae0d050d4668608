// Read-through relationship cache with targeted invalidation
// Wraps a GraphStore; every projection of a user's neighborhood is cached as
// one field of the shared namespace hash.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::core::{Id, Timestamp};
use crate::error::AppResult;
use crate::infrastructure::cache::Cache;
use crate::infrastructure::graph_store::GraphStore;
use crate::infrastructure::monitoring::{CacheOperation, MetricsCollector};
use crate::models::{PendingFriendRequests, Post, User, UserProfile, UserWithRelationships};

pub const SOCIAL_GRAPH_NAMESPACE: &str = "SocialGraph";

/// Cached projections of a neighborhood
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipField {
    Relationships,
    Followers,
    Followed,
    Blocked,
    Friends,
    PendingFriendRequests,
}

impl RelationshipField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipField::Relationships => "relationships",
            RelationshipField::Followers => "followers",
            RelationshipField::Followed => "followed",
            RelationshipField::Blocked => "blocked",
            RelationshipField::Friends => "friends",
            RelationshipField::PendingFriendRequests => "pending-friend-requests",
        }
    }

    pub fn key_for(&self, id: Id) -> String {
        format!("{}:{}", id, self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub namespace: String,
    pub ttl: Duration,
    pub scan_batch: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: SOCIAL_GRAPH_NAMESPACE.to_string(),
            ttl: Duration::from_secs(300),
            scan_batch: 100,
        }
    }
}

/// What a successful mutation must evict
#[derive(Debug)]
enum Invalidation {
    Fields(Vec<(Id, RelationshipField)>),
    Everything(Vec<Id>),
}

fn friendship_fields(a: Id, b: Id) -> Invalidation {
    use RelationshipField::*;
    Invalidation::Fields(vec![
        (a, Friends),
        (b, Friends),
        (a, PendingFriendRequests),
        (b, PendingFriendRequests),
        (a, Relationships),
        (b, Relationships),
    ])
}

fn follow_fields(a: Id, b: Id) -> Invalidation {
    use RelationshipField::*;
    Invalidation::Fields(vec![
        (a, Followed),
        (b, Followers),
        (a, Relationships),
        (b, Relationships),
    ])
}

fn request_fields(a: Id, b: Id) -> Invalidation {
    use RelationshipField::*;
    Invalidation::Fields(vec![
        (a, PendingFriendRequests),
        (b, PendingFriendRequests),
        (a, Relationships),
        (b, Relationships),
    ])
}

/// Fields of `hood`'s neighbors whose cached projections list `hood.user`
fn neighbor_fields(hood: &UserWithRelationships) -> Vec<(Id, RelationshipField)> {
    use RelationshipField::*;
    let groups: [(&[User], RelationshipField); 5] = [
        (&hood.followers, Followed),
        (&hood.followed, Followers),
        (&hood.friends, Friends),
        (&hood.sent_friend_requests, PendingFriendRequests),
        (&hood.received_friend_requests, PendingFriendRequests),
    ];
    let mut fields = Vec::new();
    for (users, field) in groups {
        for user in users {
            fields.push((user.id, field));
            fields.push((user.id, Relationships));
        }
    }
    fields.sort_by_key(|(id, field)| (*id, field.as_str()));
    fields.dedup();
    fields
}

/// Cache decorator over a [`GraphStore`].
///
/// Reads check the cache first and write back on miss. Mutations that report
/// a change evict the minimum set of fields. Cache failures never surface:
/// they are logged and the store answers instead.
#[derive(Debug)]
pub struct CachedGraphStore {
    inner: Arc<dyn GraphStore>,
    cache: Arc<dyn Cache>,
    settings: CacheSettings,
    metrics: Arc<MetricsCollector>,
}

impl CachedGraphStore {
    pub fn new(
        inner: Arc<dyn GraphStore>,
        cache: Arc<dyn Cache>,
        settings: CacheSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            inner,
            cache,
            settings,
            metrics,
        }
    }

    async fn peek<T: DeserializeOwned>(&self, id: Id, field: RelationshipField) -> Option<T> {
        let key = field.key_for(id);
        match self.cache.get_field(&self.settings.namespace, &key).await {
            Ok(Some(bytes)) => match bincode::deserialize::<T>(&bytes) {
                Ok(value) => {
                    self.metrics.record_cache_operation(CacheOperation::Hit).await;
                    Some(value)
                }
                Err(e) => {
                    warn!("Discarding undecodable cache field {}: {}", key, e);
                    self.metrics.record_cache_operation(CacheOperation::Error).await;
                    None
                }
            },
            Ok(None) => {
                self.metrics.record_cache_operation(CacheOperation::Miss).await;
                None
            }
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                self.metrics.record_cache_operation(CacheOperation::Error).await;
                None
            }
        }
    }

    async fn write_back<T: Serialize>(&self, id: Id, field: RelationshipField, value: &T) {
        let key = field.key_for(id);
        let bytes = match bincode::serialize(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not encode cache field {}: {}", key, e);
                return;
            }
        };
        match self
            .cache
            .set_field(&self.settings.namespace, &key, bytes, self.settings.ttl)
            .await
        {
            Ok(()) => self.metrics.record_cache_operation(CacheOperation::Write).await,
            Err(e) => {
                warn!("Cache write failed for {}: {}", key, e);
                self.metrics.record_cache_operation(CacheOperation::Error).await;
            }
        }
    }

    async fn invalidate(&self, invalidation: Invalidation) {
        let namespace = &self.settings.namespace;
        let outcome = match &invalidation {
            Invalidation::Fields(fields) => {
                let keys: Vec<String> = fields.iter().map(|(id, f)| f.key_for(*id)).collect();
                self.cache.delete_fields(namespace, &keys).await
            }
            Invalidation::Everything(ids) => {
                let mut total = 0;
                let mut failure = None;
                for id in ids {
                    let pattern = format!("*{}*", id);
                    match self
                        .cache
                        .delete_pattern(namespace, &pattern, self.settings.scan_batch)
                        .await
                    {
                        Ok(deleted) => total += deleted,
                        Err(e) => failure = Some(e),
                    }
                }
                failure.map_or(Ok(total), Err)
            }
        };

        match outcome {
            Ok(deleted) => {
                debug!(deleted, ?invalidation, "Cache invalidated");
                self.metrics
                    .record_cache_operation(CacheOperation::Invalidation)
                    .await;
            }
            Err(e) => {
                warn!("Cache invalidation failed: {}", e);
                self.metrics.record_cache_operation(CacheOperation::Error).await;
            }
        }
    }

    async fn evict_if_changed(
        &self,
        result: AppResult<bool>,
        invalidation: Invalidation,
    ) -> AppResult<bool> {
        if let Ok(true) = result {
            self.invalidate(invalidation).await;
        }
        result
    }

    async fn projection<T, F>(
        &self,
        id: Id,
        field: RelationshipField,
        project: F,
    ) -> AppResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(UserWithRelationships) -> T + Send,
    {
        if let Some(hit) = self.peek::<T>(id, field).await {
            return Ok(Some(hit));
        }
        let Some(hood) = self.inner.get_user_with_relationships(id).await? else {
            return Ok(None);
        };
        let value = project(hood);
        self.write_back(id, field, &value).await;
        Ok(Some(value))
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn get_followers(&self, id: Id) -> AppResult<Option<Vec<User>>> {
        self.projection(id, RelationshipField::Followers, |h| h.followers)
            .await
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn get_followed(&self, id: Id) -> AppResult<Option<Vec<User>>> {
        self.projection(id, RelationshipField::Followed, |h| h.followed)
            .await
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn get_blocked(&self, id: Id) -> AppResult<Option<Vec<User>>> {
        self.projection(id, RelationshipField::Blocked, |h| h.blocked)
            .await
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn get_friends(&self, id: Id) -> AppResult<Option<Vec<User>>> {
        self.projection(id, RelationshipField::Friends, |h| h.friends)
            .await
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn get_pending_friend_requests(
        &self,
        id: Id,
    ) -> AppResult<Option<PendingFriendRequests>> {
        self.projection(id, RelationshipField::PendingFriendRequests, |h| {
            h.pending_friend_requests()
        })
        .await
    }
}

#[async_trait]
impl GraphStore for CachedGraphStore {
    async fn ensure_schema(&self) -> AppResult<()> {
        self.inner.ensure_schema().await
    }

    async fn create_user(&self, id: Id, created_at: Timestamp) -> AppResult<bool> {
        self.inner.create_user(id, created_at).await
    }

    async fn update_user(&self, id: Id, profile: UserProfile) -> AppResult<bool> {
        let result = self.inner.update_user(id, profile).await;
        self.evict_if_changed(
            result,
            Invalidation::Fields(vec![(id, RelationshipField::Relationships)]),
        )
        .await
    }

    async fn delete_user(&self, id: Id) -> AppResult<bool> {
        // Neighbors must be known before the delete detaches them
        let neighbors = match self.inner.get_user_with_relationships(id).await {
            Ok(hood) => hood.as_ref().map(neighbor_fields).unwrap_or_default(),
            Err(e) => {
                warn!("Neighborhood lookup before delete failed: {}", e);
                Vec::new()
            }
        };
        let result = self.inner.delete_user(id).await;
        if let Ok(true) = result {
            if !neighbors.is_empty() {
                self.invalidate(Invalidation::Fields(neighbors)).await;
            }
        }
        self.evict_if_changed(result, Invalidation::Everything(vec![id]))
            .await
    }

    async fn create_post(
        &self,
        post_id: Id,
        user_id: Id,
        content: &str,
        created_at: Timestamp,
    ) -> AppResult<bool> {
        self.inner
            .create_post(post_id, user_id, content, created_at)
            .await
    }

    async fn update_post_tags(&self, post_id: Id, content: &str) -> AppResult<bool> {
        self.inner.update_post_tags(post_id, content).await
    }

    async fn delete_post(&self, post_id: Id) -> AppResult<bool> {
        self.inner.delete_post(post_id).await
    }

    async fn get_post(&self, post_id: Id) -> AppResult<Option<Post>> {
        self.inner.get_post(post_id).await
    }

    async fn add_friend(&self, a: Id, b: Id) -> AppResult<bool> {
        let result = self.inner.add_friend(a, b).await;
        self.evict_if_changed(result, friendship_fields(a, b)).await
    }

    async fn remove_friend(&self, a: Id, b: Id) -> AppResult<bool> {
        let result = self.inner.remove_friend(a, b).await;
        self.evict_if_changed(result, friendship_fields(a, b)).await
    }

    async fn follow_user(&self, a: Id, b: Id) -> AppResult<bool> {
        let result = self.inner.follow_user(a, b).await;
        self.evict_if_changed(result, follow_fields(a, b)).await
    }

    async fn unfollow_user(&self, a: Id, b: Id) -> AppResult<bool> {
        let result = self.inner.unfollow_user(a, b).await;
        self.evict_if_changed(result, follow_fields(a, b)).await
    }

    async fn send_friend_request(&self, a: Id, b: Id) -> AppResult<bool> {
        let result = self.inner.send_friend_request(a, b).await;
        self.evict_if_changed(result, request_fields(a, b)).await
    }

    async fn accept_friend_request(&self, receiver: Id, sender: Id) -> AppResult<bool> {
        let result = self.inner.accept_friend_request(receiver, sender).await;
        self.evict_if_changed(result, friendship_fields(receiver, sender))
            .await
    }

    async fn decline_friend_request(&self, receiver: Id, sender: Id) -> AppResult<bool> {
        let result = self.inner.decline_friend_request(receiver, sender).await;
        self.evict_if_changed(result, request_fields(receiver, sender))
            .await
    }

    async fn block_user(&self, a: Id, b: Id) -> AppResult<bool> {
        let result = self.inner.block_user(a, b).await;
        self.evict_if_changed(result, Invalidation::Everything(vec![a, b]))
            .await
    }

    async fn unblock_user(&self, a: Id, b: Id) -> AppResult<bool> {
        let result = self.inner.unblock_user(a, b).await;
        self.evict_if_changed(result, Invalidation::Everything(vec![a, b]))
            .await
    }

    async fn like_post(&self, user_id: Id, post_id: Id) -> AppResult<bool> {
        self.inner.like_post(user_id, post_id).await
    }

    async fn unlike_post(&self, user_id: Id, post_id: Id) -> AppResult<bool> {
        self.inner.unlike_post(user_id, post_id).await
    }

    async fn view_post(&self, user_id: Id, post_id: Id) -> AppResult<bool> {
        self.inner.view_post(user_id, post_id).await
    }

    #[instrument(skip(self), fields(user_id = %id))]
    async fn get_user_with_relationships(&self, id: Id) -> AppResult<Option<UserWithRelationships>> {
        self.projection(id, RelationshipField::Relationships, |h| h)
            .await
    }

    async fn batch_get_user_with_relationships(
        &self,
        ids: &[Id],
    ) -> AppResult<HashMap<Id, UserWithRelationships>> {
        let mut found = HashMap::with_capacity(ids.len());
        let mut misses = Vec::new();
        for id in ids {
            if found.contains_key(id) || misses.contains(id) {
                continue;
            }
            match self
                .peek::<UserWithRelationships>(*id, RelationshipField::Relationships)
                .await
            {
                Some(hood) => {
                    found.insert(*id, hood);
                }
                None => misses.push(*id),
            }
        }

        if !misses.is_empty() {
            let loaded = self.inner.batch_get_user_with_relationships(&misses).await?;
            for (id, hood) in loaded {
                self.write_back(id, RelationshipField::Relationships, &hood)
                    .await;
                found.insert(id, hood);
            }
        }
        Ok(found)
    }
}
