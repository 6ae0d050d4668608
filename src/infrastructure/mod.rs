// Core infrastructure modules
pub mod graph_store;           // Store ports
pub mod memory_graph_store;    // In-process graph adapter
pub mod sqlite_database;       // SQLite graph adapter
pub mod store_decorators;      // Observation wrapper around the ports
pub mod cache;                 // Hash-field cache port and in-process adapter
pub mod cache_layer;           // Read-through cache with targeted invalidation
pub mod bus;                   // Message bus port and in-process broker
pub mod event_emitter;         // Domain event publication
pub mod monitoring;            // Metrics and tracing setup
pub mod security;              // JWT validation
pub mod middleware;            // HTTP middleware

// Re-export core infrastructure components
pub use graph_store::{FeedStore, GraphStore, RecommendationStore};
pub use memory_graph_store::InMemoryGraphStore;
pub use sqlite_database::SqliteGraphStore;
pub use store_decorators::ObservedGraphStore;
pub use cache::{Cache, InMemoryCache};
pub use cache_layer::{CacheSettings, CachedGraphStore, RelationshipField, SOCIAL_GRAPH_NAMESPACE};
pub use bus::{queue_name, Delivery, DeliveryStream, InMemoryBus, MessageBus};
pub use event_emitter::EventEmitter;
pub use monitoring::{init_tracing, MetricsCollector, MetricsSnapshot};
pub use security::{AuthenticatedUser, JwtSettings, JwtValidator};
