// Feed HTTP surface

use axum::{
    extract::{Path as AxumPath, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::app_state::FeedState;
use crate::core::Id;
use crate::error::AppError;
use crate::models::RecommendationPage;

/// Raw query values; parsed by the engine so bad numbers become problem+json 400s
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuery {
    pub page_size: Option<String>,
    pub next: Option<String>,
    pub min_likes: Option<String>,
}

pub async fn get_feed_handler(
    State(state): State<FeedState>,
    AxumPath(user_id): AxumPath<String>,
    Query(params): Query<FeedQuery>,
) -> Result<Json<RecommendationPage>, AppError> {
    let user = Id::parse(&user_id)?;
    let request = state.engine.build_request(
        user,
        params.page_size.as_deref(),
        params.min_likes.as_deref(),
        params.next.as_deref(),
    )?;
    Ok(Json(state.engine.recommend(&request).await?))
}

pub fn create_feed_router() -> Router<FeedState> {
    Router::new().route("/api/users/{user_id}/feed", get(get_feed_handler))
}
