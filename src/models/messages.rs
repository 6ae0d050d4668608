// Bus envelopes. Every message travels as a JSON object; field names are
// camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::core::{Id, Timestamp};

pub const USER_EXCHANGE: &str = "user-exchange";
pub const POST_EXCHANGE: &str = "post-exchange";

/// Routing keys used on both exchanges
pub mod routing_keys {
    pub const USER_CREATED: &str = "user.created";
    pub const USER_UPDATED: &str = "user.updated";
    pub const USER_DELETED: &str = "user.deleted";
    pub const USER_FOLLOWED: &str = "user.followed";
    pub const USER_UNFOLLOWED: &str = "user.unfollowed";
    pub const USER_ADD_FRIEND: &str = "user.add.friend";
    pub const USER_REMOVE_FRIEND: &str = "user.remove.friend";
    pub const USER_SENT_FRIEND: &str = "user.sent.friend";
    pub const USER_FRIENDS_REMOVE: &str = "user.friends.remove";
    pub const USER_BLOCKED: &str = "user.blocked";
    pub const USER_UNBLOCKED: &str = "user.unblocked";

    pub const POST_CREATED: &str = "post.created";
    pub const POST_UPDATED: &str = "post.updated";
    pub const POST_DELETED: &str = "post.deleted";
    pub const POST_LIKED: &str = "post.liked";
    pub const POST_UNLIKED: &str = "post.unliked";
    pub const POST_VIEWED: &str = "post.viewed";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreatedMessage {
    pub id: Id,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserUpdatedMessage {
    pub id: Id,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDeletedMessage {
    pub id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFollowedMessage {
    pub id: Id,
    pub followed_id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUnfollowedMessage {
    pub id: Id,
    pub followed_id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAddedFriendMessage {
    pub id: Id,
    pub friend_id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRemovedFriendMessage {
    pub id: Id,
    pub friend_id: Id,
}

/// Emitted for friend-request traffic (`user.sent.friend`, `user.friends.remove`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFriendRequestMessage {
    pub id: Id,
    pub receiver_id: Id,
}

/// Emitted for `user.blocked` / `user.unblocked`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBlockedMessage {
    pub id: Id,
    pub blocked_id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCreatedMessage {
    pub id: Id,
    pub user_id: Id,
    pub content: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostUpdatedMessage {
    pub id: Id,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDeletedMessage {
    pub id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostLikedMessage {
    pub id: Id,
    pub user_id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostUnlikedMessage {
    pub id: Id,
    pub user_id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostViewedMessage {
    pub id: Id,
    pub user_id: Id,
}
