//! kbase resolve: turns a question into ranked, access-filtered passages.

pub mod resolver;
pub mod types;

pub use kbase_store::{ChunkLocator, Citation};
pub use resolver::Resolver;
pub use types::Passage;
