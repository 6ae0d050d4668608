// In-memory property graph. Nodes are keyed by id; edges live in paired
// outgoing/incoming adjacency indexes so every lookup is by stable id.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::core::{extract_tags, Id, Timestamp};
use crate::error::{AppError, AppResult};
use crate::infrastructure::graph_store::{ensure_distinct, GraphStore, RecommendationStore};
use crate::models::{
    CandidateQuery, CandidateRow, CandidateSource, EdgeLabel, Post, User, UserProfile,
    UserWithRelationships,
};

type Adjacency = HashMap<Id, HashMap<EdgeLabel, BTreeSet<Id>>>;

#[derive(Debug, Default)]
struct GraphState {
    users: HashMap<Id, User>,
    posts: HashMap<Id, Post>,
    outgoing: Adjacency,
    incoming: Adjacency,
}

impl GraphState {
    fn has_edge(&self, src: Id, label: EdgeLabel, dst: Id) -> bool {
        self.outgoing
            .get(&src)
            .and_then(|labels| labels.get(&label))
            .map_or(false, |targets| targets.contains(&dst))
    }

    fn has_edge_either_way(&self, a: Id, label: EdgeLabel, b: Id) -> bool {
        self.has_edge(a, label, b) || self.has_edge(b, label, a)
    }

    fn insert_edge(&mut self, src: Id, label: EdgeLabel, dst: Id) -> bool {
        let inserted = self
            .outgoing
            .entry(src)
            .or_default()
            .entry(label)
            .or_default()
            .insert(dst);
        self.incoming
            .entry(dst)
            .or_default()
            .entry(label)
            .or_default()
            .insert(src);
        inserted
    }

    fn remove_edge(&mut self, src: Id, label: EdgeLabel, dst: Id) -> bool {
        let removed = self
            .outgoing
            .get_mut(&src)
            .and_then(|labels| labels.get_mut(&label))
            .map_or(false, |targets| targets.remove(&dst));
        if let Some(sources) = self
            .incoming
            .get_mut(&dst)
            .and_then(|labels| labels.get_mut(&label))
        {
            sources.remove(&src);
        }
        removed
    }

    fn out_neighbors(&self, src: Id, label: EdgeLabel) -> impl Iterator<Item = Id> + '_ {
        self.outgoing
            .get(&src)
            .and_then(|labels| labels.get(&label))
            .into_iter()
            .flatten()
            .copied()
    }

    fn in_neighbors(&self, dst: Id, label: EdgeLabel) -> impl Iterator<Item = Id> + '_ {
        self.incoming
            .get(&dst)
            .and_then(|labels| labels.get(&label))
            .into_iter()
            .flatten()
            .copied()
    }

    /// Remove every edge incident to `id`, in either direction
    fn detach(&mut self, id: Id) -> usize {
        let mut removed = 0;
        if let Some(labels) = self.outgoing.remove(&id) {
            for (label, targets) in labels {
                for target in targets {
                    if let Some(sources) = self
                        .incoming
                        .get_mut(&target)
                        .and_then(|l| l.get_mut(&label))
                    {
                        sources.remove(&id);
                    }
                    removed += 1;
                }
            }
        }
        if let Some(labels) = self.incoming.remove(&id) {
            for (label, sources) in labels {
                for source in sources {
                    if let Some(targets) = self
                        .outgoing
                        .get_mut(&source)
                        .and_then(|l| l.get_mut(&label))
                    {
                        targets.remove(&id);
                    }
                    removed += 1;
                }
            }
        }
        removed
    }

    fn require_user(&self, id: Id) -> AppResult<()> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("user {} not found", id)))
        }
    }

    fn require_users(&self, a: Id, b: Id) -> AppResult<()> {
        ensure_distinct(a, b)?;
        self.require_user(a)?;
        self.require_user(b)
    }

    fn require_post(&self, id: Id) -> AppResult<()> {
        if self.posts.contains_key(&id) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("post {} not found", id)))
        }
    }

    fn ensure_not_blocked(&self, a: Id, b: Id) -> AppResult<()> {
        if self.has_edge_either_way(a, EdgeLabel::Blocked, b) {
            return Err(AppError::Conflict(format!(
                "users {} and {} have blocked each other",
                a, b
            )));
        }
        Ok(())
    }

    fn users_of(&self, ids: impl Iterator<Item = Id>) -> Vec<User> {
        let unique: BTreeSet<Id> = ids.collect();
        unique
            .into_iter()
            .filter_map(|id| self.users.get(&id).cloned())
            .collect()
    }

    fn neighborhood(&self, id: Id) -> Option<UserWithRelationships> {
        let user = self.users.get(&id)?.clone();
        Some(UserWithRelationships {
            user,
            followers: self.users_of(self.in_neighbors(id, EdgeLabel::Follows)),
            followed: self.users_of(self.out_neighbors(id, EdgeLabel::Follows)),
            blocked: self.users_of(self.out_neighbors(id, EdgeLabel::Blocked)),
            friends: self.users_of(self.out_neighbors(id, EdgeLabel::Friend)),
            sent_friend_requests: self.users_of(self.out_neighbors(id, EdgeLabel::FriendRequest)),
            received_friend_requests: self
                .users_of(self.in_neighbors(id, EdgeLabel::FriendRequest)),
        })
    }

    fn posts_by_authors(&self, authors: &HashSet<Id>) -> Vec<&Post> {
        self.posts
            .values()
            .filter(|post| post.user_id.map_or(false, |author| authors.contains(&author)))
            .collect()
    }
}

/// Graph store held entirely in process memory. Used by tests and by
/// single-node development deployments.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.state.read().await.users.len()
    }

    pub async fn has_edge(&self, src: Id, label: EdgeLabel, dst: Id) -> bool {
        self.state.read().await.has_edge(src, label, dst)
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn ensure_schema(&self) -> AppResult<()> {
        Ok(())
    }

    async fn create_user(&self, id: Id, created_at: Timestamp) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if state.users.contains_key(&id) {
            return Ok(false);
        }
        state.users.insert(id, User::new(id, created_at));
        Ok(true)
    }

    async fn update_user(&self, id: Id, profile: UserProfile) -> AppResult<bool> {
        let mut state = self.state.write().await;
        match state.users.get_mut(&id) {
            Some(user) => {
                user.name = profile.name;
                user.bio = profile.bio;
                user.location = profile.location;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[instrument(skip(self), fields(user_id = %id))]
    async fn delete_user(&self, id: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if state.users.remove(&id).is_none() {
            return Ok(false);
        }
        let detached = state.detach(id);
        for post in state.posts.values_mut() {
            if post.user_id == Some(id) {
                post.user_id = None;
            }
        }
        debug!(detached, "User detach-deleted");
        Ok(true)
    }

    async fn create_post(
        &self,
        post_id: Id,
        user_id: Id,
        content: &str,
        created_at: Timestamp,
    ) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.require_user(user_id)?;
        if state.posts.contains_key(&post_id) {
            return Ok(false);
        }
        state.posts.insert(
            post_id,
            Post {
                id: post_id,
                user_id: Some(user_id),
                created_at,
                tags: extract_tags(content),
                likes: 0,
                views: 0,
            },
        );
        state.insert_edge(user_id, EdgeLabel::Created, post_id);
        Ok(true)
    }

    async fn update_post_tags(&self, post_id: Id, content: &str) -> AppResult<bool> {
        let mut state = self.state.write().await;
        match state.posts.get_mut(&post_id) {
            Some(post) => {
                post.tags = extract_tags(content);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_post(&self, post_id: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if state.posts.remove(&post_id).is_none() {
            return Ok(false);
        }
        state.detach(post_id);
        Ok(true)
    }

    async fn get_post(&self, post_id: Id) -> AppResult<Option<Post>> {
        Ok(self.state.read().await.posts.get(&post_id).cloned())
    }

    async fn add_friend(&self, a: Id, b: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.require_users(a, b)?;
        state.ensure_not_blocked(a, b)?;
        let cleared = state.remove_edge(a, EdgeLabel::FriendRequest, b)
            | state.remove_edge(b, EdgeLabel::FriendRequest, a);
        let forward = state.insert_edge(a, EdgeLabel::Friend, b);
        let backward = state.insert_edge(b, EdgeLabel::Friend, a);
        Ok(cleared || forward || backward)
    }

    async fn remove_friend(&self, a: Id, b: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.require_users(a, b)?;
        let forward = state.remove_edge(a, EdgeLabel::Friend, b);
        let backward = state.remove_edge(b, EdgeLabel::Friend, a);
        Ok(forward || backward)
    }

    async fn follow_user(&self, a: Id, b: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.require_users(a, b)?;
        state.ensure_not_blocked(a, b)?;
        Ok(state.insert_edge(a, EdgeLabel::Follows, b))
    }

    async fn unfollow_user(&self, a: Id, b: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.require_users(a, b)?;
        Ok(state.remove_edge(a, EdgeLabel::Follows, b))
    }

    async fn send_friend_request(&self, a: Id, b: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.require_users(a, b)?;
        state.ensure_not_blocked(a, b)?;
        if state.has_edge_either_way(a, EdgeLabel::Friend, b) {
            return Err(AppError::Conflict(format!(
                "users {} and {} are already friends",
                a, b
            )));
        }
        if state.has_edge(b, EdgeLabel::FriendRequest, a) {
            return Err(AppError::Conflict(format!(
                "{} already has a pending friend request from {}",
                a, b
            )));
        }
        // Replaying a pending request leaves it in place
        Ok(state.insert_edge(a, EdgeLabel::FriendRequest, b))
    }

    async fn accept_friend_request(&self, receiver: Id, sender: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.require_users(receiver, sender)?;
        if !state.remove_edge(sender, EdgeLabel::FriendRequest, receiver) {
            return Err(AppError::NotFound(format!(
                "no friend request from {} to {}",
                sender, receiver
            )));
        }
        state.insert_edge(sender, EdgeLabel::Friend, receiver);
        state.insert_edge(receiver, EdgeLabel::Friend, sender);
        Ok(true)
    }

    async fn decline_friend_request(&self, receiver: Id, sender: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.require_users(receiver, sender)?;
        if !state.remove_edge(sender, EdgeLabel::FriendRequest, receiver) {
            return Err(AppError::NotFound(format!(
                "no friend request from {} to {}",
                sender, receiver
            )));
        }
        Ok(true)
    }

    async fn block_user(&self, a: Id, b: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.require_users(a, b)?;
        if state.has_edge(a, EdgeLabel::Blocked, b) {
            return Ok(false);
        }
        for label in EdgeLabel::ALL.iter().filter(|label| label.is_social()) {
            state.remove_edge(a, *label, b);
            state.remove_edge(b, *label, a);
        }
        state.insert_edge(a, EdgeLabel::Blocked, b);
        Ok(true)
    }

    async fn unblock_user(&self, a: Id, b: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.require_users(a, b)?;
        Ok(state.remove_edge(a, EdgeLabel::Blocked, b))
    }

    async fn like_post(&self, user_id: Id, post_id: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.require_user(user_id)?;
        state.require_post(post_id)?;
        if !state.insert_edge(user_id, EdgeLabel::Liked, post_id) {
            return Ok(false);
        }
        if let Some(post) = state.posts.get_mut(&post_id) {
            post.likes += 1;
        }
        Ok(true)
    }

    async fn unlike_post(&self, user_id: Id, post_id: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if !state.remove_edge(user_id, EdgeLabel::Liked, post_id) {
            return Ok(false);
        }
        if let Some(post) = state.posts.get_mut(&post_id) {
            post.likes = post.likes.saturating_sub(1);
        }
        Ok(true)
    }

    async fn view_post(&self, user_id: Id, post_id: Id) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.require_user(user_id)?;
        state.require_post(post_id)?;
        if !state.insert_edge(user_id, EdgeLabel::Viewed, post_id) {
            return Ok(false);
        }
        if let Some(post) = state.posts.get_mut(&post_id) {
            post.views += 1;
        }
        Ok(true)
    }

    async fn get_user_with_relationships(&self, id: Id) -> AppResult<Option<UserWithRelationships>> {
        Ok(self.state.read().await.neighborhood(id))
    }

    async fn batch_get_user_with_relationships(
        &self,
        ids: &[Id],
    ) -> AppResult<HashMap<Id, UserWithRelationships>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.neighborhood(*id).map(|hood| (*id, hood)))
            .collect())
    }
}

#[async_trait]
impl RecommendationStore for InMemoryGraphStore {
    async fn candidates(
        &self,
        source: CandidateSource,
        query: &CandidateQuery,
    ) -> AppResult<Vec<CandidateRow>> {
        let state = self.state.read().await;
        let viewer = query.viewer;

        let mut posts: Vec<&Post> = match source {
            CandidateSource::Friends => {
                let authors: HashSet<Id> = state.out_neighbors(viewer, EdgeLabel::Friend).collect();
                state.posts_by_authors(&authors)
            }
            CandidateSource::Followers => {
                let authors: HashSet<Id> =
                    state.out_neighbors(viewer, EdgeLabel::Follows).collect();
                state.posts_by_authors(&authors)
            }
            CandidateSource::Tags => {
                let interests: HashSet<&String> = state
                    .out_neighbors(viewer, EdgeLabel::Liked)
                    .chain(state.out_neighbors(viewer, EdgeLabel::Viewed))
                    .filter_map(|post_id| state.posts.get(&post_id))
                    .flat_map(|post| post.tags.iter())
                    .collect();
                state
                    .posts
                    .values()
                    .filter(|post| post.tags.iter().any(|tag| interests.contains(tag)))
                    .collect()
            }
            CandidateSource::Popular => state
                .posts
                .values()
                .filter(|post| post.likes >= query.min_likes)
                .collect(),
            CandidateSource::Recent => state.posts.values().collect(),
        };

        posts.retain(|post| query.admits(post.id, post.user_id));
        match source {
            CandidateSource::Popular => {
                posts.sort_by(|a, b| b.likes.cmp(&a.likes).then_with(|| b.id.cmp(&a.id)))
            }
            _ => posts.sort_by(|a, b| b.id.cmp(&a.id)),
        }

        Ok(posts
            .into_iter()
            .take(query.limit)
            .map(|post| CandidateRow {
                post_id: post.id,
                likes: post.likes,
                created_at: post.created_at,
                source,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn store_with_users(n: u128) -> (InMemoryGraphStore, Vec<Id>) {
        let store = InMemoryGraphStore::new();
        let mut ids = Vec::new();
        for i in 1..=n {
            let id = Id::from_u128(i);
            store.create_user(id, Utc::now()).await.unwrap();
            ids.push(id);
        }
        (store, ids)
    }

    fn ids_of(users: &[User]) -> Vec<Id> {
        users.iter().map(|u| u.id).collect()
    }

    #[tokio::test]
    async fn test_create_user_is_idempotent() {
        let store = InMemoryGraphStore::new();
        let id = Id::from_u128(7);
        assert!(store.create_user(id, Utc::now()).await.unwrap());
        assert!(!store.create_user(id, Utc::now()).await.unwrap());
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_add_friend_is_symmetric() {
        let (store, ids) = store_with_users(2).await;
        let (a, b) = (ids[0], ids[1]);
        assert!(store.add_friend(a, b).await.unwrap());
        assert!(!store.add_friend(a, b).await.unwrap());

        let hood_a = store.get_user_with_relationships(a).await.unwrap().unwrap();
        let hood_b = store.get_user_with_relationships(b).await.unwrap().unwrap();
        assert_eq!(ids_of(&hood_a.friends), vec![b]);
        assert_eq!(ids_of(&hood_b.friends), vec![a]);
    }

    #[tokio::test]
    async fn test_accept_friend_request_replaces_request() {
        let (store, ids) = store_with_users(2).await;
        let (a, b) = (ids[0], ids[1]);
        assert!(store.send_friend_request(a, b).await.unwrap());
        assert!(store.accept_friend_request(b, a).await.unwrap());

        assert!(store.has_edge(a, EdgeLabel::Friend, b).await);
        assert!(store.has_edge(b, EdgeLabel::Friend, a).await);
        assert!(!store.has_edge(a, EdgeLabel::FriendRequest, b).await);

        let hood_a = store.get_user_with_relationships(a).await.unwrap().unwrap();
        assert!(hood_a.sent_friend_requests.is_empty());
        assert!(hood_a.received_friend_requests.is_empty());
    }

    #[tokio::test]
    async fn test_accept_before_request_is_rejected_then_converges() {
        let (store, ids) = store_with_users(2).await;
        let (a, b) = (ids[0], ids[1]);

        let early = store.accept_friend_request(b, a).await;
        assert!(matches!(early, Err(AppError::NotFound(_))));
        assert!(!store.has_edge(a, EdgeLabel::Friend, b).await);

        store.send_friend_request(a, b).await.unwrap();
        store.accept_friend_request(b, a).await.unwrap();
        assert!(store.has_edge(b, EdgeLabel::Friend, a).await);
    }

    #[tokio::test]
    async fn test_friend_request_guards() {
        let (store, ids) = store_with_users(2).await;
        let (a, b) = (ids[0], ids[1]);
        assert!(store.send_friend_request(a, b).await.unwrap());
        assert!(!store.send_friend_request(a, b).await.unwrap());
        assert!(matches!(
            store.send_friend_request(b, a).await,
            Err(AppError::Conflict(_))
        ));

        store.accept_friend_request(b, a).await.unwrap();
        assert!(matches!(
            store.send_friend_request(a, b).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            store.send_friend_request(a, a).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_follow_requires_both_users() {
        let (store, ids) = store_with_users(1).await;
        let ghost = Id::from_u128(99);
        assert!(matches!(
            store.follow_user(ids[0], ghost).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_block_purges_every_edge() {
        let (store, ids) = store_with_users(2).await;
        let (a, b) = (ids[0], ids[1]);
        store.follow_user(a, b).await.unwrap();
        store.follow_user(b, a).await.unwrap();
        store.add_friend(a, b).await.unwrap();

        assert!(store.block_user(a, b).await.unwrap());
        assert!(!store.block_user(a, b).await.unwrap());

        let hood_a = store.get_user_with_relationships(a).await.unwrap().unwrap();
        let hood_b = store.get_user_with_relationships(b).await.unwrap().unwrap();
        assert!(hood_a.followed.is_empty());
        assert!(hood_a.followers.is_empty());
        assert!(hood_a.friends.is_empty());
        assert_eq!(ids_of(&hood_a.blocked), vec![b]);
        assert!(hood_b.followers.is_empty());
        assert!(hood_b.friends.is_empty());
        assert!(!hood_b.pending_friend_requests().involves(a));

        assert!(matches!(
            store.follow_user(b, a).await,
            Err(AppError::Conflict(_))
        ));
        assert!(store.unblock_user(a, b).await.unwrap());
        assert!(store.follow_user(b, a).await.unwrap());
    }

    #[tokio::test]
    async fn test_like_counter_is_idempotent_and_clamped() {
        let (store, ids) = store_with_users(1).await;
        let u = ids[0];
        let p = Id::from_u128(1000);
        store.create_post(p, u, "hello #rust", Utc::now()).await.unwrap();

        assert!(store.like_post(u, p).await.unwrap());
        assert!(!store.like_post(u, p).await.unwrap());
        assert_eq!(store.get_post(p).await.unwrap().unwrap().likes, 1);

        assert!(store.unlike_post(u, p).await.unwrap());
        assert!(!store.unlike_post(u, p).await.unwrap());
        assert_eq!(store.get_post(p).await.unwrap().unwrap().likes, 0);
    }

    #[tokio::test]
    async fn test_delete_user_detaches_and_keeps_posts() {
        let (store, ids) = store_with_users(2).await;
        let (a, b) = (ids[0], ids[1]);
        let p = Id::from_u128(500);
        store.create_post(p, a, "#news", Utc::now()).await.unwrap();
        store.follow_user(b, a).await.unwrap();
        store.add_friend(a, b).await.unwrap();

        assert!(store.delete_user(a).await.unwrap());
        assert!(!store.delete_user(a).await.unwrap());
        assert!(store.get_user_with_relationships(a).await.unwrap().is_none());

        let hood_b = store.get_user_with_relationships(b).await.unwrap().unwrap();
        assert!(hood_b.followed.is_empty());
        assert!(hood_b.friends.is_empty());

        let post = store.get_post(p).await.unwrap().unwrap();
        assert_eq!(post.user_id, None);
    }

    #[tokio::test]
    async fn test_batch_read_omits_missing_users() {
        let (store, ids) = store_with_users(2).await;
        let ghost = Id::from_u128(42);
        let map = store
            .batch_get_user_with_relationships(&[ids[0], ghost, ids[1]])
            .await
            .unwrap();
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key(&ghost));
    }

    #[tokio::test]
    async fn test_create_post_requires_author() {
        let store = InMemoryGraphStore::new();
        let result = store
            .create_post(Id::from_u128(1), Id::from_u128(2), "x", Utc::now())
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_view_counter_counts_each_viewer_once() {
        let (store, ids) = store_with_users(2).await;
        let p = Id::from_u128(1000);
        store.create_post(p, ids[0], "#rust", Utc::now()).await.unwrap();

        assert!(store.view_post(ids[1], p).await.unwrap());
        assert!(!store.view_post(ids[1], p).await.unwrap());
        assert!(store.view_post(ids[0], p).await.unwrap());
        assert_eq!(store.get_post(p).await.unwrap().unwrap().views, 2);

        assert!(matches!(
            store.view_post(ids[1], Id::from_u128(1001)).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete_post() {
        let (store, ids) = store_with_users(2).await;
        let p = Id::from_u128(1000);
        store.create_post(p, ids[0], "#Rust #db", Utc::now()).await.unwrap();
        store.like_post(ids[1], p).await.unwrap();

        assert!(store.update_post_tags(p, "now #Async only").await.unwrap());
        let post = store.get_post(p).await.unwrap().unwrap();
        assert_eq!(post.tags, vec!["async"]);
        assert_eq!(post.likes, 1);
        assert!(!store.update_post_tags(Id::from_u128(1001), "#x").await.unwrap());

        assert!(store.delete_post(p).await.unwrap());
        assert!(!store.delete_post(p).await.unwrap());
        assert!(store.get_post(p).await.unwrap().is_none());
        assert!(!store.has_edge(ids[1], EdgeLabel::Liked, p).await);
        assert!(!store.has_edge(ids[0], EdgeLabel::Created, p).await);
    }

    #[tokio::test]
    async fn test_update_user_profile() {
        let (store, ids) = store_with_users(1).await;
        let profile = UserProfile {
            name: Some("Ada".to_string()),
            bio: Some("engines".to_string()),
            location: None,
        };
        assert!(store.update_user(ids[0], profile).await.unwrap());
        let hood = store.get_user_with_relationships(ids[0]).await.unwrap().unwrap();
        assert_eq!(hood.user.name.as_deref(), Some("Ada"));
        assert_eq!(hood.user.bio.as_deref(), Some("engines"));

        assert!(!store
            .update_user(Id::from_u128(99), UserProfile::default())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_decline_friend_request_removes_request_only() {
        let (store, ids) = store_with_users(2).await;
        let (a, b) = (ids[0], ids[1]);
        store.send_friend_request(a, b).await.unwrap();

        assert!(store.decline_friend_request(b, a).await.unwrap());
        assert!(!store.has_edge(a, EdgeLabel::FriendRequest, b).await);
        assert!(!store.has_edge(a, EdgeLabel::Friend, b).await);
        assert!(matches!(
            store.decline_friend_request(b, a).await,
            Err(AppError::NotFound(_))
        ));
        // A declined request can be sent again
        assert!(store.send_friend_request(a, b).await.unwrap());
    }

    #[tokio::test]
    async fn test_candidate_sources() {
        let (store, ids) = store_with_users(3).await;
        let (viewer, friend, stranger) = (ids[0], ids[1], ids[2]);
        store.add_friend(viewer, friend).await.unwrap();

        let now = Utc::now();
        store.create_post(Id::from_u128(10), friend, "#rust", now).await.unwrap();
        store.create_post(Id::from_u128(11), stranger, "#rust #async", now).await.unwrap();
        store.create_post(Id::from_u128(12), viewer, "#rust", now).await.unwrap();
        store.create_post(Id::from_u128(13), stranger, "#cooking", now).await.unwrap();
        store.like_post(viewer, Id::from_u128(10)).await.unwrap();

        let query = CandidateQuery {
            viewer,
            min_likes: 1,
            limit: 10,
            cursor: None,
        };
        let rows = |found: Vec<CandidateRow>| found.into_iter().map(|r| r.post_id).collect::<Vec<_>>();

        let friends = store.candidates(CandidateSource::Friends, &query).await.unwrap();
        assert_eq!(rows(friends), vec![Id::from_u128(10)]);

        let tags = store.candidates(CandidateSource::Tags, &query).await.unwrap();
        assert_eq!(rows(tags), vec![Id::from_u128(11), Id::from_u128(10)]);

        let popular = store.candidates(CandidateSource::Popular, &query).await.unwrap();
        assert_eq!(rows(popular), vec![Id::from_u128(10)]);

        let recent = store.candidates(CandidateSource::Recent, &query).await.unwrap();
        assert_eq!(
            rows(recent),
            vec![Id::from_u128(13), Id::from_u128(11), Id::from_u128(10)]
        );
    }
}
