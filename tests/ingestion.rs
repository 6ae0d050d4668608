mod common;

use serde_json::json;

use common::Harness;
use social_graph::{
    app_state::{FeedState, SocialGraphState, FEED_SERVICE, SOCIAL_GRAPH_SERVICE},
    core::Id,
    infrastructure::{
        bus::{queue_name, MessageBus},
        graph_store::GraphStore,
    },
    models::{messages::{POST_EXCHANGE, USER_EXCHANGE}, EdgeLabel},
    services::{
        ingestor::{declare_topology, Disposition},
        EventIngestor, FEED_ROUTES, SOCIAL_GRAPH_ROUTES,
    },
};

async fn publish(harness: &Harness, exchange: &str, routing_key: &str, body: serde_json::Value) {
    harness
        .bus
        .publish(exchange, routing_key, body.to_string().into_bytes())
        .await
        .unwrap();
}

/// Handle every parked delivery on one queue, in order
async fn drain(harness: &Harness, ingestor: &EventIngestor, service: &str, routing_key: &str) -> Vec<Disposition> {
    let mut deliveries = harness
        .bus
        .consume(&queue_name(routing_key, service))
        .await
        .unwrap();
    let mut outcomes = Vec::new();
    while let Ok(delivery) = deliveries.try_recv() {
        outcomes.push(ingestor.handle(delivery).await.unwrap());
    }
    outcomes
}

#[tokio::test]
async fn test_replayed_user_created_is_idempotent() {
    let harness = Harness::new();
    declare_topology(&harness.bus, SOCIAL_GRAPH_SERVICE, SOCIAL_GRAPH_ROUTES)
        .await
        .unwrap();
    let (_state, ingestor) =
        SocialGraphState::build(&harness.adapters, &harness.config, &harness.jwt);

    let id = Id::from_u128(7);
    let message = json!({ "id": id.to_string(), "createdAt": "2024-03-01T10:00:00Z" });
    publish(&harness, USER_EXCHANGE, "user.created", message.clone()).await;
    publish(&harness, USER_EXCHANGE, "user.created", message).await;

    let queue = queue_name("user.created", SOCIAL_GRAPH_SERVICE);
    let mut deliveries = harness.bus.consume(&queue).await.unwrap();
    for _ in 0..2 {
        let delivery = deliveries.recv().await.unwrap();
        assert_eq!(ingestor.handle(delivery).await.unwrap(), Disposition::Acked);
    }

    assert_eq!(harness.store.user_count().await, 1);
    assert_eq!(harness.bus.acked(&queue).await, 2);
}

#[tokio::test]
async fn test_poison_message_is_dead_lettered() {
    let harness = Harness::new();
    declare_topology(&harness.bus, SOCIAL_GRAPH_SERVICE, SOCIAL_GRAPH_ROUTES)
        .await
        .unwrap();
    let (_state, ingestor) =
        SocialGraphState::build(&harness.adapters, &harness.config, &harness.jwt);

    harness
        .bus
        .publish(USER_EXCHANGE, "user.updated", b"{\"id\": 12}".to_vec())
        .await
        .unwrap();
    let queue = queue_name("user.updated", SOCIAL_GRAPH_SERVICE);
    let mut deliveries = harness.bus.consume(&queue).await.unwrap();
    let delivery = deliveries.recv().await.unwrap();

    assert_eq!(ingestor.handle(delivery).await.unwrap(), Disposition::DeadLettered);
    let dead = harness.bus.dead_letters(&queue).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].routing_key, "user.updated");
}

#[tokio::test]
async fn test_user_deleted_invalidates_cached_neighborhood() {
    let harness = Harness::new();
    declare_topology(&harness.bus, SOCIAL_GRAPH_SERVICE, SOCIAL_GRAPH_ROUTES)
        .await
        .unwrap();
    let (state, ingestor) =
        SocialGraphState::build(&harness.adapters, &harness.config, &harness.jwt);
    let a = harness.user(1).await;
    let b = harness.user(2).await;
    state.relationships.follow(a, b).await.unwrap();
    assert_eq!(state.relationships.get_followers(b).await.unwrap().len(), 1);
    assert!(state.relationships.get_relationships(a).await.is_ok());

    publish(&harness, USER_EXCHANGE, "user.deleted", json!({ "id": a.to_string() })).await;
    let queue = queue_name("user.deleted", SOCIAL_GRAPH_SERVICE);
    let mut deliveries = harness.bus.consume(&queue).await.unwrap();
    ingestor.handle(deliveries.recv().await.unwrap()).await.unwrap();

    assert!(state.relationships.get_relationships(a).await.is_err());
    assert!(state.relationships.get_followers(b).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_feed_projection_of_posts_and_likes() {
    let harness = Harness::new();
    declare_topology(&harness.bus, FEED_SERVICE, FEED_ROUTES).await.unwrap();
    let (_state, ingestor) = FeedState::build(&harness.adapters, &harness.config, &harness.jwt);

    let author = Id::from_u128(1);
    let fan = Id::from_u128(2);
    let post = Id::from_u128(100);
    publish(&harness, USER_EXCHANGE, "user.created", json!({ "id": author.to_string() })).await;
    publish(&harness, USER_EXCHANGE, "user.created", json!({ "id": fan.to_string() })).await;
    publish(
        &harness,
        POST_EXCHANGE,
        "post.created",
        json!({
            "id": post.to_string(),
            "userId": author.to_string(),
            "content": "Rust #Async #rust",
            "createdAt": "2024-03-01T10:00:00Z"
        }),
    )
    .await;
    for _ in 0..2 {
        publish(
            &harness,
            POST_EXCHANGE,
            "post.liked",
            json!({ "id": post.to_string(), "userId": fan.to_string() }),
        )
        .await;
    }
    publish(&harness, USER_EXCHANGE, "user.followed", json!({ "id": fan.to_string(), "followedId": author.to_string() })).await;

    for routing_key in ["user.created", "post.created", "post.liked", "user.followed"] {
        let queue = queue_name(routing_key, FEED_SERVICE);
        let mut deliveries = harness.bus.consume(&queue).await.unwrap();
        while let Ok(delivery) = deliveries.try_recv() {
            assert_eq!(ingestor.handle(delivery).await.unwrap(), Disposition::Acked);
        }
    }

    let stored = harness.store.get_post(post).await.unwrap().unwrap();
    assert_eq!(stored.tags, vec!["async", "rust"]);
    assert_eq!(stored.likes, 1);
    assert!(harness.store.has_edge(fan, EdgeLabel::Follows, author).await);
}

#[tokio::test]
async fn test_post_for_unknown_author_is_dead_lettered() {
    let harness = Harness::new();
    declare_topology(&harness.bus, FEED_SERVICE, FEED_ROUTES).await.unwrap();
    let (_state, ingestor) = FeedState::build(&harness.adapters, &harness.config, &harness.jwt);

    publish(
        &harness,
        POST_EXCHANGE,
        "post.created",
        json!({
            "id": Id::from_u128(100).to_string(),
            "userId": Id::from_u128(9).to_string(),
            "content": "orphan",
            "createdAt": "2024-03-01T10:00:00Z"
        }),
    )
    .await;
    let queue = queue_name("post.created", FEED_SERVICE);
    let mut deliveries = harness.bus.consume(&queue).await.unwrap();
    let delivery = deliveries.recv().await.unwrap();

    assert_eq!(ingestor.handle(delivery).await.unwrap(), Disposition::DeadLettered);
    assert!(harness.store.get_post(Id::from_u128(100)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_user_updated_sets_profile() {
    let harness = Harness::new();
    declare_topology(&harness.bus, SOCIAL_GRAPH_SERVICE, SOCIAL_GRAPH_ROUTES)
        .await
        .unwrap();
    let (_state, ingestor) =
        SocialGraphState::build(&harness.adapters, &harness.config, &harness.jwt);
    let id = harness.user(5).await;

    let update = json!({ "id": id.to_string(), "name": "Grace", "bio": "compilers", "location": "Arlington" });
    publish(&harness, USER_EXCHANGE, "user.updated", update.clone()).await;
    publish(&harness, USER_EXCHANGE, "user.updated", update).await;
    let outcomes = drain(&harness, &ingestor, SOCIAL_GRAPH_SERVICE, "user.updated").await;
    assert_eq!(outcomes, vec![Disposition::Acked, Disposition::Acked]);

    let hood = harness.store.get_user_with_relationships(id).await.unwrap().unwrap();
    assert_eq!(hood.user.name.as_deref(), Some("Grace"));
    assert_eq!(hood.user.bio.as_deref(), Some("compilers"));
    assert_eq!(hood.user.location.as_deref(), Some("Arlington"));
}

#[tokio::test]
async fn test_post_lifecycle_projection() {
    let harness = Harness::new();
    declare_topology(&harness.bus, FEED_SERVICE, FEED_ROUTES).await.unwrap();
    let (_state, ingestor) = FeedState::build(&harness.adapters, &harness.config, &harness.jwt);

    let author = harness.user(1).await;
    let fan = harness.user(2).await;
    let post = Id::from_u128(100);
    let interaction = json!({ "id": post.to_string(), "userId": fan.to_string() });
    publish(
        &harness,
        POST_EXCHANGE,
        "post.created",
        json!({
            "id": post.to_string(),
            "userId": author.to_string(),
            "content": "first #Draft",
            "createdAt": "2024-03-01T10:00:00Z"
        }),
    )
    .await;
    publish(&harness, POST_EXCHANGE, "post.liked", interaction.clone()).await;
    publish(&harness, POST_EXCHANGE, "post.viewed", interaction.clone()).await;
    publish(&harness, POST_EXCHANGE, "post.viewed", interaction.clone()).await;
    publish(&harness, POST_EXCHANGE, "post.unliked", interaction.clone()).await;
    publish(&harness, POST_EXCHANGE, "post.unliked", interaction).await;
    publish(
        &harness,
        POST_EXCHANGE,
        "post.updated",
        json!({ "id": post.to_string(), "content": "final #Rust #release" }),
    )
    .await;

    for routing_key in ["post.created", "post.liked", "post.viewed", "post.unliked", "post.updated"] {
        let outcomes = drain(&harness, &ingestor, FEED_SERVICE, routing_key).await;
        assert!(!outcomes.is_empty(), "{}", routing_key);
        assert!(outcomes.iter().all(|o| *o == Disposition::Acked), "{}", routing_key);
    }

    let stored = harness.store.get_post(post).await.unwrap().unwrap();
    assert_eq!(stored.views, 1);
    assert_eq!(stored.likes, 0);
    assert_eq!(stored.tags, vec!["rust", "release"]);
    assert!(harness.store.has_edge(fan, EdgeLabel::Viewed, post).await);
    assert!(!harness.store.has_edge(fan, EdgeLabel::Liked, post).await);

    publish(&harness, POST_EXCHANGE, "post.deleted", json!({ "id": post.to_string() })).await;
    let outcomes = drain(&harness, &ingestor, FEED_SERVICE, "post.deleted").await;
    assert_eq!(outcomes, vec![Disposition::Acked]);
    assert!(harness.store.get_post(post).await.unwrap().is_none());
    assert!(!harness.store.has_edge(fan, EdgeLabel::Viewed, post).await);
}
