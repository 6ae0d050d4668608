#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use social_graph::{
    app_state::Adapters,
    config::Config,
    core::Id,
    infrastructure::{
        bus::InMemoryBus, cache::InMemoryCache, graph_store::GraphStore,
        memory_graph_store::InMemoryGraphStore, monitoring::MetricsCollector,
        security::JwtSettings,
    },
};

pub struct Harness {
    pub store: Arc<InMemoryGraphStore>,
    pub bus: InMemoryBus,
    pub adapters: Adapters,
    pub config: Config,
    pub jwt: JwtSettings,
    pub token: String,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryGraphStore::new());
        let bus = InMemoryBus::new();
        let adapters = Adapters {
            store: store.clone(),
            cache: Arc::new(InMemoryCache::new(1_000)),
            bus: Arc::new(bus.clone()),
            metrics: Arc::new(MetricsCollector::new()),
        };
        let jwt = JwtSettings {
            secret: "integration-secret".to_string(),
            issuer: "https://auth.test".to_string(),
            audience: "social".to_string(),
        };
        let token = jwt
            .issue_token("01ARZ3NDEKTSV4RRFFQ69G5FAV", Duration::from_secs(300))
            .unwrap();
        Self {
            store,
            bus,
            adapters,
            config: Config::from_lookup(":0", |_| None).unwrap(),
            jwt,
            token,
        }
    }

    pub async fn user(&self, n: u128) -> Id {
        let id = Id::from_u128(n);
        self.store.create_user(id, Utc::now()).await.unwrap();
        id
    }
}

pub async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn send_json(
    app: &Router,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
