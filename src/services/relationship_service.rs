// RelationshipService - social-graph reads and commands
// Sits above the cached store; every command that changes the graph publishes
// exactly one event on the user exchange.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::core::Id;
use crate::error::{AppError, AppResult};
use crate::infrastructure::cache_layer::CachedGraphStore;
use crate::infrastructure::event_emitter::EventEmitter;
use crate::infrastructure::graph_store::GraphStore;
use crate::models::messages::{
    routing_keys, UserAddedFriendMessage, UserBlockedMessage, UserFollowedMessage,
    UserFriendRequestMessage, UserRemovedFriendMessage, UserUnfollowedMessage, USER_EXCHANGE,
};
use crate::models::{PendingFriendRequests, User, UserWithRelationships};

fn user_not_found(id: Id) -> AppError {
    AppError::NotFound(format!("user {} not found", id))
}

#[derive(Debug, Clone)]
pub struct RelationshipService {
    graph: Arc<CachedGraphStore>,
    emitter: EventEmitter,
}

impl RelationshipService {
    pub fn new(graph: Arc<CachedGraphStore>, emitter: EventEmitter) -> Self {
        Self { graph, emitter }
    }

    pub fn graph(&self) -> &Arc<CachedGraphStore> {
        &self.graph
    }

    pub async fn get_relationships(&self, id: Id) -> AppResult<UserWithRelationships> {
        self.graph
            .get_user_with_relationships(id)
            .await?
            .ok_or_else(|| user_not_found(id))
    }

    pub async fn get_followers(&self, id: Id) -> AppResult<Vec<User>> {
        self.graph.get_followers(id).await?.ok_or_else(|| user_not_found(id))
    }

    pub async fn get_followed(&self, id: Id) -> AppResult<Vec<User>> {
        self.graph.get_followed(id).await?.ok_or_else(|| user_not_found(id))
    }

    pub async fn get_blocked(&self, id: Id) -> AppResult<Vec<User>> {
        self.graph.get_blocked(id).await?.ok_or_else(|| user_not_found(id))
    }

    pub async fn get_friends(&self, id: Id) -> AppResult<Vec<User>> {
        self.graph.get_friends(id).await?.ok_or_else(|| user_not_found(id))
    }

    pub async fn get_pending_friend_requests(&self, id: Id) -> AppResult<PendingFriendRequests> {
        self.graph
            .get_pending_friend_requests(id)
            .await?
            .ok_or_else(|| user_not_found(id))
    }

    /// Missing users are left out of the map
    pub async fn get_batch_relationships(
        &self,
        ids: &[Id],
    ) -> AppResult<HashMap<Id, UserWithRelationships>> {
        self.graph.batch_get_user_with_relationships(ids).await
    }

    #[instrument(skip(self))]
    pub async fn follow(&self, user: Id, followed: Id) -> AppResult<()> {
        if self.graph.follow_user(user, followed).await? {
            let message = UserFollowedMessage {
                id: user,
                followed_id: followed,
            };
            self.emitter
                .emit(USER_EXCHANGE, routing_keys::USER_FOLLOWED, &message)
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn unfollow(&self, user: Id, followed: Id) -> AppResult<()> {
        if !self.graph.unfollow_user(user, followed).await? {
            return Err(AppError::NotFound(format!(
                "user {} does not follow {}",
                user, followed
            )));
        }
        let message = UserUnfollowedMessage {
            id: user,
            followed_id: followed,
        };
        self.emitter
            .emit(USER_EXCHANGE, routing_keys::USER_UNFOLLOWED, &message)
            .await
    }

    #[instrument(skip(self))]
    pub async fn remove_friend(&self, user: Id, friend: Id) -> AppResult<()> {
        if !self.graph.remove_friend(user, friend).await? {
            return Err(AppError::NotFound(format!(
                "users {} and {} are not friends",
                user, friend
            )));
        }
        let message = UserRemovedFriendMessage {
            id: user,
            friend_id: friend,
        };
        self.emitter
            .emit(USER_EXCHANGE, routing_keys::USER_REMOVE_FRIEND, &message)
            .await
    }

    #[instrument(skip(self))]
    pub async fn send_friend_request(&self, sender: Id, receiver: Id) -> AppResult<()> {
        if self.graph.send_friend_request(sender, receiver).await? {
            let message = UserFriendRequestMessage {
                id: sender,
                receiver_id: receiver,
            };
            self.emitter
                .emit(USER_EXCHANGE, routing_keys::USER_SENT_FRIEND, &message)
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn accept_friend_request(&self, receiver: Id, sender: Id) -> AppResult<()> {
        self.graph.accept_friend_request(receiver, sender).await?;
        let message = UserAddedFriendMessage {
            id: receiver,
            friend_id: sender,
        };
        self.emitter
            .emit(USER_EXCHANGE, routing_keys::USER_ADD_FRIEND, &message)
            .await
    }

    #[instrument(skip(self))]
    pub async fn decline_friend_request(&self, receiver: Id, sender: Id) -> AppResult<()> {
        self.graph.decline_friend_request(receiver, sender).await?;
        let message = UserFriendRequestMessage {
            id: sender,
            receiver_id: receiver,
        };
        self.emitter
            .emit(USER_EXCHANGE, routing_keys::USER_FRIENDS_REMOVE, &message)
            .await
    }

    #[instrument(skip(self))]
    pub async fn block(&self, user: Id, blocked: Id) -> AppResult<()> {
        if self.graph.block_user(user, blocked).await? {
            let message = UserBlockedMessage {
                id: user,
                blocked_id: blocked,
            };
            self.emitter
                .emit(USER_EXCHANGE, routing_keys::USER_BLOCKED, &message)
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn unblock(&self, user: Id, blocked: Id) -> AppResult<()> {
        if !self.graph.unblock_user(user, blocked).await? {
            return Err(AppError::NotFound(format!(
                "user {} has not blocked {}",
                user, blocked
            )));
        }
        let message = UserBlockedMessage {
            id: user,
            blocked_id: blocked,
        };
        self.emitter
            .emit(USER_EXCHANGE, routing_keys::USER_UNBLOCKED, &message)
            .await
    }
}
