// RPC plane. Services return tonic::Status like a gRPC server would; the JSON
// bridge below exposes them as POST /rpc/<Method> with a grpc-status header.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use tonic::{Code, Status};

use crate::app_state::{FeedState, SocialGraphState};
use crate::core::Id;
use crate::models::UserWithRelationships;
use crate::services::{RecommendationEngine, RelationshipService};

pub const GRPC_STATUS_HEADER: &str = "grpc-status";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUserRelationshipsRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBatchRelationshipsRequest {
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRelationshipsResponse {
    pub relationships: HashMap<String, UserWithRelationships>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPostsRecommendationsRequest {
    pub user_id: String,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub min_likes: Option<u64>,
    #[serde(default)]
    pub last_post_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostsRecommendationsResponse {
    pub post_ids: Vec<String>,
    pub per_page: u32,
    pub has_next_page: bool,
    pub next: String,
}

#[derive(Debug, Clone)]
pub struct RelationshipRpc {
    service: RelationshipService,
}

impl RelationshipRpc {
    pub fn new(service: RelationshipService) -> Self {
        Self { service }
    }

    pub async fn get_user_relationships(
        &self,
        request: GetUserRelationshipsRequest,
    ) -> Result<UserWithRelationships, Status> {
        let id = Id::parse(&request.user_id)?;
        Ok(self.service.get_relationships(id).await?)
    }

    /// One invalid id fails the whole call; unknown users are omitted
    pub async fn get_batch_relationships(
        &self,
        request: GetBatchRelationshipsRequest,
    ) -> Result<BatchRelationshipsResponse, Status> {
        let ids = Id::parse_all(&request.user_ids)?;
        let found = self.service.get_batch_relationships(&ids).await?;
        Ok(BatchRelationshipsResponse {
            relationships: found
                .into_iter()
                .map(|(id, hood)| (id.to_string(), hood))
                .collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FeedRpc {
    engine: RecommendationEngine,
}

impl FeedRpc {
    pub fn new(engine: RecommendationEngine) -> Self {
        Self { engine }
    }

    pub async fn get_posts_recommendations(
        &self,
        request: GetPostsRecommendationsRequest,
    ) -> Result<PostsRecommendationsResponse, Status> {
        let user = Id::parse(&request.user_id)?;
        let per_page = (request.per_page > 0).then(|| request.per_page.to_string());
        let min_likes = request.min_likes.map(|n| n.to_string());
        let query = self.engine.build_request(
            user,
            per_page.as_deref(),
            min_likes.as_deref(),
            Some(request.last_post_id.as_str()),
        )?;
        let page = self.engine.recommend(&query).await?;

        Ok(PostsRecommendationsResponse {
            post_ids: page.data.iter().map(Id::to_string).collect(),
            per_page: page.per_page as u32,
            has_next_page: page.has_next_page,
            next: page.next,
        })
    }
}

fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn decode_request<T: DeserializeOwned>(body: &Bytes) -> Result<T, Status> {
    serde_json::from_slice(body)
        .map_err(|e| Status::invalid_argument(format!("malformed request: {}", e)))
}

/// Render an RPC result as JSON, carrying the status code in `grpc-status`
pub fn rpc_response<T: Serialize>(result: Result<T, Status>) -> Response {
    let (code, mut response) = match result {
        Ok(body) => (Code::Ok, (StatusCode::OK, Json(body)).into_response()),
        Err(status) => {
            let body = serde_json::json!({
                "code": status.code() as i32,
                "message": status.message(),
            });
            (status.code(), (http_status(status.code()), Json(body)).into_response())
        }
    };
    response
        .headers_mut()
        .insert(GRPC_STATUS_HEADER, HeaderValue::from(code as i32));
    response
}

pub async fn get_user_relationships_rpc_handler(
    State(state): State<SocialGraphState>,
    body: Bytes,
) -> Response {
    let rpc = RelationshipRpc::new(state.relationships);
    let result = match decode_request(&body) {
        Ok(request) => rpc.get_user_relationships(request).await,
        Err(status) => Err(status),
    };
    rpc_response(result)
}

pub async fn get_batch_relationships_rpc_handler(
    State(state): State<SocialGraphState>,
    body: Bytes,
) -> Response {
    let rpc = RelationshipRpc::new(state.relationships);
    let result = match decode_request(&body) {
        Ok(request) => rpc.get_batch_relationships(request).await,
        Err(status) => Err(status),
    };
    rpc_response(result)
}

pub async fn get_posts_recommendations_rpc_handler(
    State(state): State<FeedState>,
    body: Bytes,
) -> Response {
    let rpc = FeedRpc::new(state.engine);
    let result = match decode_request(&body) {
        Ok(request) => rpc.get_posts_recommendations(request).await,
        Err(status) => Err(status),
    };
    rpc_response(result)
}

pub fn create_relationship_rpc_router() -> Router<SocialGraphState> {
    Router::new()
        .route(
            "/rpc/GetUserRelationships",
            post(get_user_relationships_rpc_handler),
        )
        .route(
            "/rpc/GetBatchRelationships",
            post(get_batch_relationships_rpc_handler),
        )
}

pub fn create_feed_rpc_router() -> Router<FeedState> {
    Router::new().route(
        "/rpc/GetPostsRecommendations",
        post(get_posts_recommendations_rpc_handler),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_status_mapping() {
        let status: Status = AppError::Validation("bad id".into()).into();
        assert_eq!(status.code(), Code::InvalidArgument);
        let response = rpc_response::<()>(Err(status));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[GRPC_STATUS_HEADER], "3");

        let status: Status = AppError::NotFound("gone".into()).into();
        assert_eq!(status.code(), Code::NotFound);
        let status: Status = AppError::Bus("down".into()).into();
        assert_eq!(status.code(), Code::Internal);
    }

    #[test]
    fn test_ok_carries_zero_status() {
        let response = rpc_response(Ok(serde_json::json!({"ok": true})));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[GRPC_STATUS_HEADER], "0");
    }
}
