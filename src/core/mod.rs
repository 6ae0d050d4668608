// Core types and primitives

pub mod strong_types;
pub mod tags;

pub use strong_types::{Id, Timestamp, ID_LEN};
pub use tags::extract_tags;
