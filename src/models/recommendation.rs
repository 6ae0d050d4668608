use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{Id, Timestamp};

/// One of the five sub-queries whose union produces the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    Friends,
    Followers,
    Tags,
    Popular,
    Recent,
}

impl CandidateSource {
    /// Fusion order; the first source to produce a post labels it
    pub const ALL: [CandidateSource; 5] = [
        CandidateSource::Friends,
        CandidateSource::Followers,
        CandidateSource::Tags,
        CandidateSource::Popular,
        CandidateSource::Recent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateSource::Friends => "friends",
            CandidateSource::Followers => "followers",
            CandidateSource::Tags => "tags",
            CandidateSource::Popular => "popular",
            CandidateSource::Recent => "recent",
        }
    }
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters shared by every candidate sub-query.
///
/// `cursor` is inclusive: a page starts at the first post whose id is
/// `<= cursor`, which is exactly the id handed out as `next` by the
/// previous page.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub viewer: Id,
    pub min_likes: u64,
    pub limit: usize,
    pub cursor: Option<Id>,
}

impl CandidateQuery {
    pub fn admits(&self, post_id: Id, author: Option<Id>) -> bool {
        let below_cursor = self.cursor.map_or(true, |cursor| post_id <= cursor);
        below_cursor && author != Some(self.viewer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRow {
    pub post_id: Id,
    pub likes: u64,
    pub created_at: Timestamp,
    pub source: CandidateSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRequest {
    pub user_id: Id,
    pub page_size: usize,
    pub min_likes: u64,
    pub cursor: Option<Id>,
}

/// HTTP body of `GET /api/users/{userID}/feed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationPage {
    pub data: Vec<Id>,
    pub per_page: usize,
    pub has_next_page: bool,
    pub next: String,
}
