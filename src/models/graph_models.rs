use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{Id, Timestamp};

/// A user node. Profile attributes only exist on the social-graph side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    pub created_at: Timestamp,
    pub username: Option<String>,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
}

impl User {
    pub fn new(id: Id, created_at: Timestamp) -> Self {
        Self {
            id,
            created_at,
            username: None,
            name: None,
            bio: None,
            location: None,
        }
    }
}

/// Attributes written by `user.updated`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
}

/// A post node (feed service only). `user_id` becomes `None` once the author
/// is deleted; the post itself survives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Id,
    pub user_id: Option<Id>,
    pub created_at: Timestamp,
    pub tags: Vec<String>,
    pub likes: u64,
    pub views: u64,
}

/// Directed, labeled edge kinds. At most one edge per (src, label, dst).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeLabel {
    Follows,
    FriendRequest,
    Friend,
    Blocked,
    Created,
    Liked,
    Viewed,
}

impl EdgeLabel {
    pub const ALL: [EdgeLabel; 7] = [
        EdgeLabel::Follows,
        EdgeLabel::FriendRequest,
        EdgeLabel::Friend,
        EdgeLabel::Blocked,
        EdgeLabel::Created,
        EdgeLabel::Liked,
        EdgeLabel::Viewed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeLabel::Follows => "FOLLOWS",
            EdgeLabel::FriendRequest => "FRIEND_REQUEST",
            EdgeLabel::Friend => "FRIEND",
            EdgeLabel::Blocked => "BLOCKED",
            EdgeLabel::Created => "CREATED",
            EdgeLabel::Liked => "LIKED",
            EdgeLabel::Viewed => "VIEWED",
        }
    }

    /// Labels connecting two users (as opposed to user -> post)
    pub fn is_social(&self) -> bool {
        matches!(
            self,
            EdgeLabel::Follows | EdgeLabel::FriendRequest | EdgeLabel::Friend | EdgeLabel::Blocked
        )
    }
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's neighborhood: every edge incident to the user, grouped by label.
/// Nested collections hold no duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWithRelationships {
    pub user: User,
    pub followers: Vec<User>,
    pub followed: Vec<User>,
    pub blocked: Vec<User>,
    pub friends: Vec<User>,
    pub sent_friend_requests: Vec<User>,
    pub received_friend_requests: Vec<User>,
}

impl UserWithRelationships {
    pub fn empty(user: User) -> Self {
        Self {
            user,
            followers: Vec::new(),
            followed: Vec::new(),
            blocked: Vec::new(),
            friends: Vec::new(),
            sent_friend_requests: Vec::new(),
            received_friend_requests: Vec::new(),
        }
    }

    pub fn pending_friend_requests(&self) -> PendingFriendRequests {
        PendingFriendRequests {
            sent: self.sent_friend_requests.clone(),
            received: self.received_friend_requests.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingFriendRequests {
    pub sent: Vec<User>,
    pub received: Vec<User>,
}

impl PendingFriendRequests {
    pub fn involves(&self, id: Id) -> bool {
        self.sent.iter().chain(self.received.iter()).any(|u| u.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_neighborhood_json_shape() {
        let id = Id::parse("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
        let created = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let hood = UserWithRelationships::empty(User::new(id, created));
        let json = serde_json::to_value(&hood).unwrap();
        assert_eq!(json["user"]["id"], "01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert!(json["user"]["createdAt"].as_str().unwrap().starts_with("2024-05-01T12:00:00"));
        assert!(json["sentFriendRequests"].as_array().unwrap().is_empty());
        assert!(json.get("receivedFriendRequests").is_some());
    }

    #[test]
    fn test_edge_label_names() {
        assert_eq!(EdgeLabel::FriendRequest.as_str(), "FRIEND_REQUEST");
        assert_eq!(
            serde_json::to_string(&EdgeLabel::FriendRequest).unwrap(),
            "\"FRIEND_REQUEST\""
        );
        assert!(EdgeLabel::Blocked.is_social());
        assert!(!EdgeLabel::Liked.is_social());
    }
}
