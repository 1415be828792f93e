//! Streaming provider implementations.
//!
//! Ollama streams newline-delimited JSON objects. OpenAI-compatible servers
//! stream SSE `data:` lines terminated by `[DONE]`.

use std::pin::Pin;

use futures::Stream;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_stream::StreamExt;
use tracing::{debug, error};

use crate::types::{GenerationRequest, LLMProvider, ProviderTarget};

/// Boxed stream type for returning different stream implementations.
pub type BoxedStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// A single streamed token or error.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Token(String),
    Done { tokens_used: usize },
    Error(String),
}

/// Stream tokens from the target's provider.
pub fn stream_llm(client: &Client, target: &ProviderTarget, request: &GenerationRequest) -> BoxedStream {
    match target.provider {
        LLMProvider::Ollama => Box::pin(stream_ollama(client.clone(), target.clone(), request.clone())),
        LLMProvider::OpenAI => Box::pin(stream_openai_compat(
            client.clone(),
            target.clone(),
            request.clone(),
        )),
    }
}

/// Splits a byte stream into complete lines.
#[derive(Default)]
struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.find('\n')?;
        let line = self.buffer[..end].trim().to_string();
        self.buffer.drain(..=end);
        Some(line)
    }

    /// Whatever is left once the body ends without a trailing newline.
    fn rest(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    }
}

fn parse_ollama_line(line: &str) -> Option<StreamChunk> {
    let parsed: Value = serde_json::from_str(line).ok()?;
    if let Some(err) = parsed["error"].as_str() {
        return Some(StreamChunk::Error(err.to_string()));
    }
    if parsed["done"].as_bool() == Some(true) {
        let tokens_used = parsed["eval_count"].as_u64().unwrap_or(0) as usize;
        return Some(StreamChunk::Done { tokens_used });
    }
    match parsed["message"]["content"].as_str() {
        Some(content) if !content.is_empty() => Some(StreamChunk::Token(content.to_string())),
        _ => None,
    }
}

/// `None` for keep-alives and unparsable lines.
fn parse_sse_line(line: &str) -> Option<StreamChunk> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(StreamChunk::Done { tokens_used: 0 });
    }
    let parsed: Value = serde_json::from_str(data).ok()?;
    if let Some(msg) = parsed["error"]["message"].as_str() {
        return Some(StreamChunk::Error(msg.to_string()));
    }
    match parsed["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => Some(StreamChunk::Token(content.to_string())),
        _ => None,
    }
}

fn stream_ollama(
    client: Client,
    target: ProviderTarget,
    request: GenerationRequest,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    let url = format!("{}/api/chat", target.base_url.trim_end_matches('/'));

    async_stream::stream! {
        let body = json!({
            "model": target.model,
            "messages": request.messages,
            "stream": true,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        debug!("Streaming from {} with model {}", url, target.model);

        let response = match client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                yield StreamChunk::Error(format!("Request failed: {}", e));
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            yield StreamChunk::Error(format!("API error {}: {}", status, body));
            return;
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut token_count = 0usize;

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => lines.push(&bytes),
                Err(e) => {
                    yield StreamChunk::Error(format!("Stream read error: {}", e));
                    return;
                }
            }
            while let Some(line) = lines.next_line() {
                match parse_ollama_line(&line) {
                    Some(StreamChunk::Token(t)) => {
                        token_count += 1;
                        yield StreamChunk::Token(t);
                    }
                    Some(StreamChunk::Done { tokens_used }) => {
                        yield StreamChunk::Done { tokens_used: tokens_used.max(token_count) };
                        return;
                    }
                    Some(StreamChunk::Error(e)) => {
                        error!("Ollama error: {}", e);
                        yield StreamChunk::Error(e);
                        return;
                    }
                    None => {}
                }
            }
        }

        if let Some(line) = lines.rest() {
            if let Some(chunk) = parse_ollama_line(&line) {
                yield chunk;
                return;
            }
        }
        yield StreamChunk::Done { tokens_used: token_count };
    }
}

fn stream_openai_compat(
    client: Client,
    target: ProviderTarget,
    request: GenerationRequest,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    let url = format!("{}/chat/completions", target.base_url.trim_end_matches('/'));

    async_stream::stream! {
        let body = json!({
            "model": target.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        debug!("Streaming from {} with model {}", url, target.model);

        let mut builder = client.post(&url).json(&body);
        if let Some(key) = &target.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                yield StreamChunk::Error(format!("Request failed: {}", e));
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            yield StreamChunk::Error(format!("API error {}: {}", status, body));
            return;
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut token_count = 0usize;

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => lines.push(&bytes),
                Err(e) => {
                    yield StreamChunk::Error(format!("Stream read error: {}", e));
                    return;
                }
            }
            while let Some(line) = lines.next_line() {
                match parse_sse_line(&line) {
                    Some(StreamChunk::Token(t)) => {
                        token_count += 1;
                        yield StreamChunk::Token(t);
                    }
                    Some(StreamChunk::Done { .. }) => {
                        yield StreamChunk::Done { tokens_used: token_count };
                        return;
                    }
                    Some(StreamChunk::Error(e)) => {
                        error!("Completion API error: {}", e);
                        yield StreamChunk::Error(e);
                        return;
                    }
                    None => {}
                }
            }
        }

        yield StreamChunk::Done { tokens_used: token_count };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_handles_split_chunks() {
        let mut lines = LineBuffer::default();
        lines.push(b"{\"a\":");
        assert!(lines.next_line().is_none());
        lines.push(b"1}\n{\"b\"");
        assert_eq!(lines.next_line().as_deref(), Some("{\"a\":1}"));
        assert!(lines.next_line().is_none());
        lines.push(b":2}");
        assert_eq!(lines.rest().as_deref(), Some("{\"b\":2}"));
    }

    #[test]
    fn test_parse_ollama_lines() {
        assert_eq!(
            parse_ollama_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#),
            Some(StreamChunk::Token("Hi".into()))
        );
        assert_eq!(
            parse_ollama_line(r#"{"message":{"content":""},"done":true,"eval_count":7}"#),
            Some(StreamChunk::Done { tokens_used: 7 })
        );
        assert_eq!(
            parse_ollama_line(r#"{"error":"model not found"}"#),
            Some(StreamChunk::Error("model not found".into()))
        );
        assert_eq!(parse_ollama_line("garbage"), None);
    }

    #[test]
    fn test_parse_sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            Some(StreamChunk::Token("Hel".into()))
        );
        assert_eq!(parse_sse_line("data: [DONE]"), Some(StreamChunk::Done { tokens_used: 0 }));
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("event: ping"), None);
        assert_eq!(
            parse_sse_line(r#"data: {"error":{"message":"quota"}}"#),
            Some(StreamChunk::Error("quota".into()))
        );
    }
}
