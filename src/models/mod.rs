// Domain models: graph nodes and edges, bus envelopes, feed types

pub mod graph_models;
pub mod messages;
pub mod recommendation;

pub use graph_models::{
    EdgeLabel, PendingFriendRequests, Post, User, UserProfile, UserWithRelationships,
};
pub use recommendation::{
    CandidateQuery, CandidateRow, CandidateSource, RecommendationPage, RecommendationRequest,
};
