// Business services layered over the infrastructure ports
pub mod ingestor;
pub mod recommendation;
pub mod relationship_service;

pub use ingestor::{EventIngestor, IngestCommand, FEED_ROUTES, SOCIAL_GRAPH_ROUTES};
pub use recommendation::{RecommendationEngine, RecommendationSettings};
pub use relationship_service::RelationshipService;
