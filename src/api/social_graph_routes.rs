// Social graph HTTP surface under /api/users/{user_id}

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::app_state::SocialGraphState;
use crate::core::Id;
use crate::error::AppError;
use crate::models::{PendingFriendRequests, User, UserWithRelationships};

fn parse_pair(user_id: &str, other_id: &str) -> Result<(Id, Id), AppError> {
    Ok((Id::parse(user_id)?, Id::parse(other_id)?))
}

pub async fn get_relationships_handler(
    State(state): State<SocialGraphState>,
    AxumPath(user_id): AxumPath<String>,
) -> Result<Json<UserWithRelationships>, AppError> {
    let id = Id::parse(&user_id)?;
    Ok(Json(state.relationships.get_relationships(id).await?))
}

pub async fn get_followers_handler(
    State(state): State<SocialGraphState>,
    AxumPath(user_id): AxumPath<String>,
) -> Result<Json<Vec<User>>, AppError> {
    let id = Id::parse(&user_id)?;
    Ok(Json(state.relationships.get_followers(id).await?))
}

/// People the user follows
pub async fn get_followed_handler(
    State(state): State<SocialGraphState>,
    AxumPath(user_id): AxumPath<String>,
) -> Result<Json<Vec<User>>, AppError> {
    let id = Id::parse(&user_id)?;
    Ok(Json(state.relationships.get_followed(id).await?))
}

pub async fn get_blocked_handler(
    State(state): State<SocialGraphState>,
    AxumPath(user_id): AxumPath<String>,
) -> Result<Json<Vec<User>>, AppError> {
    let id = Id::parse(&user_id)?;
    Ok(Json(state.relationships.get_blocked(id).await?))
}

pub async fn get_friends_handler(
    State(state): State<SocialGraphState>,
    AxumPath(user_id): AxumPath<String>,
) -> Result<Json<Vec<User>>, AppError> {
    let id = Id::parse(&user_id)?;
    Ok(Json(state.relationships.get_friends(id).await?))
}

pub async fn get_friend_requests_handler(
    State(state): State<SocialGraphState>,
    AxumPath(user_id): AxumPath<String>,
) -> Result<Json<PendingFriendRequests>, AppError> {
    let id = Id::parse(&user_id)?;
    Ok(Json(state.relationships.get_pending_friend_requests(id).await?))
}

pub async fn follow_handler(
    State(state): State<SocialGraphState>,
    AxumPath((user_id, followed_id)): AxumPath<(String, String)>,
) -> Result<StatusCode, AppError> {
    let (user, followed) = parse_pair(&user_id, &followed_id)?;
    state.relationships.follow(user, followed).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unfollow_handler(
    State(state): State<SocialGraphState>,
    AxumPath((user_id, followed_id)): AxumPath<(String, String)>,
) -> Result<StatusCode, AppError> {
    let (user, followed) = parse_pair(&user_id, &followed_id)?;
    state.relationships.unfollow(user, followed).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_friend_handler(
    State(state): State<SocialGraphState>,
    AxumPath((user_id, friend_id)): AxumPath<(String, String)>,
) -> Result<StatusCode, AppError> {
    let (user, friend) = parse_pair(&user_id, &friend_id)?;
    state.relationships.remove_friend(user, friend).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_friend_request_handler(
    State(state): State<SocialGraphState>,
    AxumPath((user_id, receiver_id)): AxumPath<(String, String)>,
) -> Result<StatusCode, AppError> {
    let (sender, receiver) = parse_pair(&user_id, &receiver_id)?;
    state.relationships.send_friend_request(sender, receiver).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `user_id` received the request; the path's second id sent it
pub async fn accept_friend_request_handler(
    State(state): State<SocialGraphState>,
    AxumPath((user_id, sender_id)): AxumPath<(String, String)>,
) -> Result<StatusCode, AppError> {
    let (receiver, sender) = parse_pair(&user_id, &sender_id)?;
    state.relationships.accept_friend_request(receiver, sender).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn decline_friend_request_handler(
    State(state): State<SocialGraphState>,
    AxumPath((user_id, sender_id)): AxumPath<(String, String)>,
) -> Result<StatusCode, AppError> {
    let (receiver, sender) = parse_pair(&user_id, &sender_id)?;
    state.relationships.decline_friend_request(receiver, sender).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn block_handler(
    State(state): State<SocialGraphState>,
    AxumPath((user_id, blocked_id)): AxumPath<(String, String)>,
) -> Result<StatusCode, AppError> {
    let (user, blocked) = parse_pair(&user_id, &blocked_id)?;
    state.relationships.block(user, blocked).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unblock_handler(
    State(state): State<SocialGraphState>,
    AxumPath((user_id, blocked_id)): AxumPath<(String, String)>,
) -> Result<StatusCode, AppError> {
    let (user, blocked) = parse_pair(&user_id, &blocked_id)?;
    state.relationships.unblock(user, blocked).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn create_social_graph_router() -> Router<SocialGraphState> {
    Router::new()
        .route("/api/users/{user_id}/relationships", get(get_relationships_handler))

        // Follows
        .route("/api/users/{user_id}/followers", get(get_followers_handler))
        .route("/api/users/{user_id}/followers/me", get(get_followed_handler))
        .route(
            "/api/users/{user_id}/followers/{followed_id}",
            post(follow_handler).delete(unfollow_handler),
        )

        // Blocks
        .route("/api/users/{user_id}/blocks", get(get_blocked_handler))
        .route(
            "/api/users/{user_id}/blocks/{blocked_id}",
            post(block_handler).delete(unblock_handler),
        )

        // Friends and friend requests
        .route("/api/users/{user_id}/friends", get(get_friends_handler))
        .route(
            "/api/users/{user_id}/friends/{friend_id}",
            axum::routing::delete(remove_friend_handler),
        )
        .route("/api/users/{user_id}/friends/requests", get(get_friend_requests_handler))
        .route(
            "/api/users/{user_id}/friends/requests/{receiver_id}",
            post(send_friend_request_handler)
                .put(accept_friend_request_handler)
                .delete(decline_friend_request_handler),
        )
}
