// Recommendation engine - keyset-paginated fusion of the candidate sources

use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::core::{Id, Timestamp};
use crate::error::{AppError, AppResult};
use crate::infrastructure::graph_store::FeedStore;
use crate::models::{
    CandidateQuery, CandidateRow, CandidateSource, RecommendationPage, RecommendationRequest,
};

#[derive(Debug, Clone)]
pub struct RecommendationSettings {
    pub default_min_likes: u64,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            default_min_likes: 10,
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

/// One post after fusion
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub post_id: Id,
    pub likes: u64,
    pub created_at: Timestamp,
    pub source: CandidateSource,
}

/// Union the per-source rows, keep one entry per post and return the first
/// `take` posts by descending id.
///
/// `batches` must be in fusion order: the first batch that mentions a post
/// decides its source label. Likes and timestamps keep their maximum.
pub fn fuse(batches: Vec<Vec<CandidateRow>>, take: usize) -> Vec<FusedCandidate> {
    let mut by_post: HashMap<Id, FusedCandidate> = HashMap::new();
    for row in batches.into_iter().flatten() {
        by_post
            .entry(row.post_id)
            .and_modify(|fused| {
                fused.likes = fused.likes.max(row.likes);
                fused.created_at = fused.created_at.max(row.created_at);
            })
            .or_insert(FusedCandidate {
                post_id: row.post_id,
                likes: row.likes,
                created_at: row.created_at,
                source: row.source,
            });
    }

    let mut fused: Vec<FusedCandidate> = by_post.into_values().collect();
    fused.sort_by(|a, b| b.post_id.cmp(&a.post_id));
    fused.truncate(take);
    fused
}

#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    store: Arc<dyn FeedStore>,
    settings: RecommendationSettings,
}

impl RecommendationEngine {
    pub fn new(store: Arc<dyn FeedStore>, settings: RecommendationSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &RecommendationSettings {
        &self.settings
    }

    /// Build a request from raw query values. Absent values take the
    /// configured defaults; an empty cursor means the first page.
    pub fn build_request(
        &self,
        user_id: Id,
        page_size: Option<&str>,
        min_likes: Option<&str>,
        cursor: Option<&str>,
    ) -> AppResult<RecommendationRequest> {
        let page_size = match page_size.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| AppError::Validation(format!("invalid pageSize: {}", raw)))?,
            None => self.settings.default_page_size,
        };
        if page_size == 0 || page_size > self.settings.max_page_size {
            return Err(AppError::Validation(format!(
                "pageSize must be between 1 and {}",
                self.settings.max_page_size
            )));
        }

        let min_likes = match min_likes.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| AppError::Validation(format!("invalid minLikes: {}", raw)))?,
            None => self.settings.default_min_likes,
        };

        let cursor = cursor
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Id::parse)
            .transpose()?;

        Ok(RecommendationRequest {
            user_id,
            page_size,
            min_likes,
            cursor,
        })
    }

    #[instrument(skip(self), fields(user_id = %request.user_id))]
    pub async fn recommend(&self, request: &RecommendationRequest) -> AppResult<RecommendationPage> {
        let limit = request.page_size + 1;
        let query = CandidateQuery {
            viewer: request.user_id,
            min_likes: request.min_likes,
            limit,
            cursor: request.cursor,
        };

        let batches = try_join_all(
            CandidateSource::ALL
                .iter()
                .map(|source| self.store.candidates(*source, &query)),
        )
        .await?;
        let fused = fuse(batches, limit);
        debug!(candidates = fused.len(), "Candidates fused");

        let has_next_page = fused.len() > request.page_size;
        let next = if has_next_page {
            fused[request.page_size].post_id.to_string()
        } else {
            String::new()
        };
        let data = fused
            .iter()
            .take(request.page_size)
            .map(|candidate| candidate.post_id)
            .collect();

        Ok(RecommendationPage {
            data,
            per_page: request.page_size,
            has_next_page,
            next,
        })
    }
}
