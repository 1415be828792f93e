//! kbase runtime: the `answer` flow: session bookkeeping, scoped retrieval,
//! bounded generation and cited assistant turns.

pub mod orchestrator;
pub mod types;

pub use orchestrator::Orchestrator;
pub use types::*;
