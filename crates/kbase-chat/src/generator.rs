//! The generation seam and its streaming HTTP implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::providers::{stream_llm, StreamChunk};
use crate::types::{GenerationRequest, ProviderTarget};
use kbase_core::{Error, Result};

/// Answer text as it arrives. An `Err` item ends the stream.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Produces an answer for a prompt conversation.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Stream the answer. Backends without incremental output yield the
    /// whole of `generate` as one fragment.
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TokenStream> {
        let text = self.generate(request).await?;
        Ok(Box::pin(tokio_stream::once(Ok(text))))
    }

    fn model_name(&self) -> &str;
}

/// Streams from the configured provider and collects the tokens.
pub struct ChatGenerator {
    client: Client,
    target: ProviderTarget,
}

impl ChatGenerator {
    pub fn new(target: ProviderTarget) -> Self {
        Self {
            client: Client::new(),
            target,
        }
    }

    pub fn target(&self) -> &ProviderTarget {
        &self.target
    }
}

#[async_trait]
impl Generator for ChatGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let mut stream = stream_llm(&self.client, &self.target, request);
        let mut text = String::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                StreamChunk::Token(t) => text.push_str(&t),
                StreamChunk::Done { tokens_used } => {
                    debug!("{} produced {} tokens", self.target.model, tokens_used);
                    break;
                }
                StreamChunk::Error(e) => {
                    return Err(Error::upstream(format!("{}: {}", self.target.provider, e)));
                }
            }
        }

        if text.trim().is_empty() {
            return Err(Error::upstream(format!(
                "{} returned an empty answer",
                self.target.model
            )));
        }
        Ok(text)
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TokenStream> {
        let mut chunks = stream_llm(&self.client, &self.target, request);
        let provider = self.target.provider.to_string();
        let model = self.target.model.clone();

        Ok(Box::pin(async_stream::stream! {
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    StreamChunk::Token(t) => yield Ok(t),
                    StreamChunk::Done { tokens_used } => {
                        debug!("{} streamed {} tokens", model, tokens_used);
                        break;
                    }
                    StreamChunk::Error(e) => {
                        yield Err(Error::upstream(format!("{}: {}", provider, e)));
                        break;
                    }
                }
            }
        }))
    }

    fn model_name(&self) -> &str {
        &self.target.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LLMProvider, PromptMessage};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base URL.
    async fn serve_once(content_type: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                content_type,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}", addr)
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            messages: vec![PromptMessage::user("How many leave days?")],
            temperature: 0.1,
            max_tokens: 64,
        }
    }

    fn target(provider: LLMProvider, base_url: String) -> ProviderTarget {
        ProviderTarget {
            provider,
            base_url,
            model: "test-model".into(),
            api_key: Some("sk-test".into()),
        }
    }

    #[tokio::test]
    async fn test_collects_ollama_ndjson() {
        let body = concat!(
            "{\"message\":{\"content\":\"20 \"},\"done\":false}\n",
            "{\"message\":{\"content\":\"days.\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true,\"eval_count\":2}\n",
        );
        let url = serve_once("application/x-ndjson", body).await;
        let generator = ChatGenerator::new(target(LLMProvider::Ollama, url));
        assert_eq!(generator.generate(&request()).await.unwrap(), "20 days.");
    }

    #[tokio::test]
    async fn test_collects_openai_sse() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Twenty\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" days\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let url = serve_once("text/event-stream", body).await;
        let generator = ChatGenerator::new(target(LLMProvider::OpenAI, url));
        assert_eq!(generator.generate(&request()).await.unwrap(), "Twenty days");
    }

    #[tokio::test]
    async fn test_streams_openai_fragments() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Twenty\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" days\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let url = serve_once("text/event-stream", body).await;
        let generator = ChatGenerator::new(target(LLMProvider::OpenAI, url));

        let stream = generator.generate_stream(&request()).await.unwrap();
        let fragments: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(fragments.concat(), "Twenty days");
        assert!(fragments.len() >= 2);
    }

    #[tokio::test]
    async fn test_stream_error_is_upstream() {
        let url = serve_once("application/x-ndjson", "{\"error\":\"model not found\"}\n").await;
        let generator = ChatGenerator::new(target(LLMProvider::Ollama, url));

        let stream = generator.generate_stream(&request()).await.unwrap();
        let items: Vec<Result<String>> = stream.collect().await;
        assert!(items.last().unwrap().as_ref().unwrap_err().is_upstream());
    }

    #[tokio::test]
    async fn test_provider_error_is_upstream() {
        let url = serve_once("application/x-ndjson", "{\"error\":\"model not found\"}\n").await;
        let generator = ChatGenerator::new(target(LLMProvider::Ollama, url));
        assert!(generator.generate(&request()).await.unwrap_err().is_upstream());

        let generator = ChatGenerator::new(target(LLMProvider::Ollama, "http://127.0.0.1:9".into()));
        assert!(generator.generate(&request()).await.unwrap_err().is_upstream());
    }
}
