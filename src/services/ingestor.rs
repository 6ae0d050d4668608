// Event ingestor - folds bus deliveries into the graph store
//
// Each delivery decodes into exactly one IngestCommand, which maps onto one
// idempotent store call. Replaying a delivery is harmless.

use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::core::{Id, Timestamp};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::infrastructure::bus::{queue_name, Delivery, MessageBus};
use crate::infrastructure::graph_store::GraphStore;
use crate::infrastructure::monitoring::{BusEvent, MetricsCollector};
use crate::models::messages::{
    routing_keys, PostCreatedMessage, PostDeletedMessage, PostLikedMessage, PostUnlikedMessage,
    PostUpdatedMessage, PostViewedMessage, UserAddedFriendMessage, UserCreatedMessage,
    UserDeletedMessage, UserFollowedMessage, UserRemovedFriendMessage, UserUnfollowedMessage,
    UserUpdatedMessage, POST_EXCHANGE, USER_EXCHANGE,
};
use crate::models::UserProfile;

/// One exchange binding consumed by a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub exchange: &'static str,
    pub routing_key: &'static str,
}

const fn route(exchange: &'static str, routing_key: &'static str) -> Route {
    Route {
        exchange,
        routing_key,
    }
}

pub const SOCIAL_GRAPH_ROUTES: &[Route] = &[
    route(USER_EXCHANGE, routing_keys::USER_CREATED),
    route(USER_EXCHANGE, routing_keys::USER_UPDATED),
    route(USER_EXCHANGE, routing_keys::USER_DELETED),
];

pub const FEED_ROUTES: &[Route] = &[
    route(USER_EXCHANGE, routing_keys::USER_CREATED),
    route(USER_EXCHANGE, routing_keys::USER_DELETED),
    route(USER_EXCHANGE, routing_keys::USER_FOLLOWED),
    route(USER_EXCHANGE, routing_keys::USER_UNFOLLOWED),
    route(USER_EXCHANGE, routing_keys::USER_ADD_FRIEND),
    route(USER_EXCHANGE, routing_keys::USER_REMOVE_FRIEND),
    route(POST_EXCHANGE, routing_keys::POST_CREATED),
    route(POST_EXCHANGE, routing_keys::POST_UPDATED),
    route(POST_EXCHANGE, routing_keys::POST_DELETED),
    route(POST_EXCHANGE, routing_keys::POST_LIKED),
    route(POST_EXCHANGE, routing_keys::POST_UNLIKED),
    route(POST_EXCHANGE, routing_keys::POST_VIEWED),
];

/// A decoded delivery, ready to be applied to the store
#[derive(Debug, Clone, PartialEq)]
pub enum IngestCommand {
    CreateUser { id: Id, created_at: Timestamp },
    UpdateUser { id: Id, profile: UserProfile },
    DeleteUser { id: Id },
    FollowUser { follower: Id, followed: Id },
    UnfollowUser { follower: Id, followed: Id },
    AddFriend { user: Id, friend: Id },
    RemoveFriend { user: Id, friend: Id },
    CreatePost { id: Id, user_id: Id, content: String, created_at: Timestamp },
    UpdatePost { id: Id, content: String },
    DeletePost { id: Id },
    LikePost { user_id: Id, post_id: Id },
    UnlikePost { user_id: Id, post_id: Id },
    ViewPost { user_id: Id, post_id: Id },
}

fn decode_body<T: DeserializeOwned>(routing_key: &str, body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::Poison(format!("cannot decode {} message: {}", routing_key, e)))
}

impl IngestCommand {
    /// Decode a delivery body by routing key. Any failure is a poison error.
    pub fn decode(routing_key: &str, body: &[u8]) -> AppResult<Self> {
        let command = match routing_key {
            routing_keys::USER_CREATED => {
                let msg: UserCreatedMessage = decode_body(routing_key, body)?;
                IngestCommand::CreateUser {
                    id: msg.id,
                    created_at: msg.created_at.unwrap_or_else(chrono::Utc::now),
                }
            }
            routing_keys::USER_UPDATED => {
                let msg: UserUpdatedMessage = decode_body(routing_key, body)?;
                IngestCommand::UpdateUser {
                    id: msg.id,
                    profile: UserProfile {
                        name: msg.name,
                        bio: msg.bio,
                        location: msg.location,
                    },
                }
            }
            routing_keys::USER_DELETED => {
                let msg: UserDeletedMessage = decode_body(routing_key, body)?;
                IngestCommand::DeleteUser { id: msg.id }
            }
            routing_keys::USER_FOLLOWED => {
                let msg: UserFollowedMessage = decode_body(routing_key, body)?;
                IngestCommand::FollowUser {
                    follower: msg.id,
                    followed: msg.followed_id,
                }
            }
            routing_keys::USER_UNFOLLOWED => {
                let msg: UserUnfollowedMessage = decode_body(routing_key, body)?;
                IngestCommand::UnfollowUser {
                    follower: msg.id,
                    followed: msg.followed_id,
                }
            }
            routing_keys::USER_ADD_FRIEND => {
                let msg: UserAddedFriendMessage = decode_body(routing_key, body)?;
                IngestCommand::AddFriend {
                    user: msg.id,
                    friend: msg.friend_id,
                }
            }
            routing_keys::USER_REMOVE_FRIEND => {
                let msg: UserRemovedFriendMessage = decode_body(routing_key, body)?;
                IngestCommand::RemoveFriend {
                    user: msg.id,
                    friend: msg.friend_id,
                }
            }
            routing_keys::POST_CREATED => {
                let msg: PostCreatedMessage = decode_body(routing_key, body)?;
                IngestCommand::CreatePost {
                    id: msg.id,
                    user_id: msg.user_id,
                    content: msg.content,
                    created_at: msg.created_at,
                }
            }
            routing_keys::POST_UPDATED => {
                let msg: PostUpdatedMessage = decode_body(routing_key, body)?;
                IngestCommand::UpdatePost {
                    id: msg.id,
                    content: msg.content,
                }
            }
            routing_keys::POST_DELETED => {
                let msg: PostDeletedMessage = decode_body(routing_key, body)?;
                IngestCommand::DeletePost { id: msg.id }
            }
            routing_keys::POST_LIKED => {
                let msg: PostLikedMessage = decode_body(routing_key, body)?;
                IngestCommand::LikePost {
                    user_id: msg.user_id,
                    post_id: msg.id,
                }
            }
            routing_keys::POST_UNLIKED => {
                let msg: PostUnlikedMessage = decode_body(routing_key, body)?;
                IngestCommand::UnlikePost {
                    user_id: msg.user_id,
                    post_id: msg.id,
                }
            }
            routing_keys::POST_VIEWED => {
                let msg: PostViewedMessage = decode_body(routing_key, body)?;
                IngestCommand::ViewPost {
                    user_id: msg.user_id,
                    post_id: msg.id,
                }
            }
            other => {
                return Err(AppError::Poison(format!("unexpected routing key {}", other)));
            }
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            IngestCommand::CreateUser { .. } => "create_user",
            IngestCommand::UpdateUser { .. } => "update_user",
            IngestCommand::DeleteUser { .. } => "delete_user",
            IngestCommand::FollowUser { .. } => "follow_user",
            IngestCommand::UnfollowUser { .. } => "unfollow_user",
            IngestCommand::AddFriend { .. } => "add_friend",
            IngestCommand::RemoveFriend { .. } => "remove_friend",
            IngestCommand::CreatePost { .. } => "create_post",
            IngestCommand::UpdatePost { .. } => "update_post_tags",
            IngestCommand::DeletePost { .. } => "delete_post",
            IngestCommand::LikePost { .. } => "like_post",
            IngestCommand::UnlikePost { .. } => "unlike_post",
            IngestCommand::ViewPost { .. } => "view_post",
        }
    }

    /// Apply the command with a single store call; returns whether the graph changed
    pub async fn apply(self, store: &dyn GraphStore) -> AppResult<bool> {
        match self {
            IngestCommand::CreateUser { id, created_at } => store.create_user(id, created_at).await,
            IngestCommand::UpdateUser { id, profile } => store.update_user(id, profile).await,
            IngestCommand::DeleteUser { id } => store.delete_user(id).await,
            IngestCommand::FollowUser { follower, followed } => {
                store.follow_user(follower, followed).await
            }
            IngestCommand::UnfollowUser { follower, followed } => {
                store.unfollow_user(follower, followed).await
            }
            IngestCommand::AddFriend { user, friend } => store.add_friend(user, friend).await,
            IngestCommand::RemoveFriend { user, friend } => store.remove_friend(user, friend).await,
            IngestCommand::CreatePost {
                id,
                user_id,
                content,
                created_at,
            } => store.create_post(id, user_id, &content, created_at).await,
            IngestCommand::UpdatePost { id, content } => store.update_post_tags(id, &content).await,
            IngestCommand::DeletePost { id } => store.delete_post(id).await,
            IngestCommand::LikePost { user_id, post_id } => store.like_post(user_id, post_id).await,
            IngestCommand::UnlikePost { user_id, post_id } => {
                store.unlike_post(user_id, post_id).await
            }
            IngestCommand::ViewPost { user_id, post_id } => store.view_post(user_id, post_id).await,
        }
    }
}

/// What happened to a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    DeadLettered,
}

/// Declare both exchanges and bind one queue per route. Returns the queue names.
pub async fn declare_topology(
    bus: &dyn MessageBus,
    service: &str,
    routes: &[Route],
) -> AppResult<Vec<String>> {
    bus.declare_exchange(USER_EXCHANGE).await?;
    bus.declare_exchange(POST_EXCHANGE).await?;

    let mut queues = Vec::with_capacity(routes.len());
    for r in routes {
        let queue = queue_name(r.routing_key, service);
        bus.bind_queue(&queue, r.exchange, r.routing_key).await?;
        queues.push(queue);
    }
    Ok(queues)
}

#[derive(Debug)]
pub struct EventIngestor {
    store: Arc<dyn GraphStore>,
    bus: Arc<dyn MessageBus>,
    service: String,
    routes: &'static [Route],
    metrics: Arc<MetricsCollector>,
}

impl EventIngestor {
    pub fn new(
        store: Arc<dyn GraphStore>,
        bus: Arc<dyn MessageBus>,
        service: impl Into<String>,
        routes: &'static [Route],
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            bus,
            service: service.into(),
            routes,
            metrics,
        }
    }

    /// Process one delivery to completion, then ack or nack it.
    ///
    /// Undecodable bodies and store failures are nacked without requeue.
    /// Validation and conflict rejections would fail the same way on every
    /// replay, so they are logged and acked.
    #[instrument(skip(self, delivery), fields(queue = %delivery.queue, routing_key = %delivery.routing_key))]
    pub async fn handle(&self, delivery: Delivery) -> AppResult<Disposition> {
        let outcome = match IngestCommand::decode(&delivery.routing_key, &delivery.body) {
            Ok(command) => {
                let name = command.name();
                command
                    .apply(self.store.as_ref())
                    .await
                    .map(|changed| (name, changed))
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok((command, changed)) => {
                debug!(command, changed, "Delivery applied");
                self.settle(delivery, Disposition::Acked).await
            }
            Err(e) if matches!(e.kind(), ErrorKind::Validation | ErrorKind::Conflict) => {
                warn!(error = %e, "Delivery rejected by the store, acknowledging");
                self.settle(delivery, Disposition::Acked).await
            }
            Err(e) => {
                error!(error = %e, "Delivery failed, dead-lettering");
                self.settle(delivery, Disposition::DeadLettered).await
            }
        }
    }

    async fn settle(&self, delivery: Delivery, disposition: Disposition) -> AppResult<Disposition> {
        match disposition {
            Disposition::Acked => {
                delivery.ack().await?;
                self.metrics.record_bus_event(BusEvent::Acked).await;
            }
            Disposition::DeadLettered => {
                delivery.nack(false).await?;
                self.metrics.record_bus_event(BusEvent::DeadLettered).await;
            }
        }
        Ok(disposition)
    }

    /// Declare the topology, then consume every bound queue until `shutdown`
    /// fires or the bus closes. In-flight deliveries finish before returning.
    pub async fn run(self: Arc<Self>, shutdown: Arc<Notify>) -> AppResult<()> {
        let queues = declare_topology(self.bus.as_ref(), &self.service, self.routes).await?;
        let mut streams = Vec::with_capacity(queues.len());
        for queue in &queues {
            let mut rx = self.bus.consume(queue).await?;
            streams.push(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)));
        }
        info!(service = %self.service, queues = queues.len(), "Ingestor consuming");

        let mut deliveries = futures::stream::select_all(streams);
        let mut in_flight: JoinSet<AppResult<Disposition>> = JoinSet::new();
        let notified = shutdown.notified();
        tokio::pin!(notified);

        loop {
            tokio::select! {
                _ = &mut notified => {
                    info!(service = %self.service, "Ingestor stopping");
                    break;
                }
                next = deliveries.next() => match next {
                    Some(delivery) => {
                        let this = Arc::clone(&self);
                        in_flight.spawn(async move { this.handle(delivery).await });
                    }
                    None => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_joined(joined);
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            log_joined(joined);
        }
        Ok(())
    }

    pub fn spawn(self: Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<AppResult<()>> {
        tokio::spawn(self.run(shutdown))
    }
}

fn log_joined(joined: Result<AppResult<Disposition>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!(error = %e, "Cannot settle delivery"),
        Err(e) => error!(error = %e, "Delivery task panicked"),
    }
}
