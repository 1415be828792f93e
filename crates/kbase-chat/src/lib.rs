//! kbase chat: answer generation against an external model.
//!
//! `ChatGenerator` streams tokens from Ollama (`/api/chat`, NDJSON) or an
//! OpenAI-compatible API (`/chat/completions`, SSE), either collected or
//! passed through as a `TokenStream`.
//! Prompt assembly and the source selection policy live beside it.

pub mod config;
pub mod generator;
pub mod prompt;
pub mod providers;
pub mod types;

pub use config::LLMConfig;
pub use generator::{ChatGenerator, Generator, TokenStream};
pub use prompt::{build_messages, select_sources, HISTORY_TURNS};
pub use types::*;
