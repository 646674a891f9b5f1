//! Upstream inference service client
//!
//! Opens a streaming generation against Ollama's `/api/generate` endpoint
//! and returns the raw NDJSON response body as a byte stream. Decoding is
//! left to the pipeline.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Raw response body chunks
pub type ByteStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

/// Failure talking to the inference service
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection, timeout or body read failure
    #[error("Upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success HTTP status before streaming started
    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// One generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
}

/// Producer of a streamed generation
#[async_trait]
pub trait GenerationSource: Send + Sync {
    /// Start a generation and return its body stream once headers are in
    async fn generate(&self, request: &GenerateRequest) -> Result<ByteStream, UpstreamError>;
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Ollama HTTP client
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl OllamaClient {
    /// Create a client for `base_url` (e.g. `http://localhost:11434`)
    ///
    /// `connect_timeout` bounds only connection setup. There is no overall
    /// request deadline: a generation may stream for as long as it runs.
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Get generate endpoint URL
    pub fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl GenerationSource for OllamaClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<ByteStream, UpstreamError> {
        let url = self.generate_url();
        debug!(%url, model = %request.model, "Opening upstream generation stream");

        let response = self
            .http_client
            .post(&url)
            .json(&GenerateBody {
                model: &request.model,
                prompt: &request.prompt,
                stream: true,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { status, body });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(UpstreamError::from))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one HTTP request (headers plus `content-length` body)
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending a request");
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let body_len = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + body_len {
                    return;
                }
            }
        }
    }

    /// Serve one NDJSON response whose lines arrive `gap` apart
    async fn serve_slow_ndjson(lines: Vec<&'static str>, gap: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let head = concat!(
                "HTTP/1.1 200 OK\r\n",
                "content-type: application/x-ndjson\r\n",
                "connection: close\r\n\r\n"
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            for line in lines {
                tokio::time::sleep(gap).await;
                socket.write_all(line.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
            }
            socket.shutdown().await.unwrap();
        });

        format!("http://{}", addr)
    }

    #[test]
    fn test_generate_url_strips_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.generate_url(), "http://localhost:11434/api/generate");
    }

    #[test]
    fn test_request_body_asks_for_streaming() {
        let body = serde_json::to_value(GenerateBody {
            model: "llama3",
            prompt: "hi",
            stream: true,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"model": "llama3", "prompt": "hi", "stream": true})
        );
    }

    #[tokio::test]
    async fn test_long_generation_outlives_connect_timeout() {
        let lines = vec![
            "{\"response\":\"slow\",\"done\":false}\n",
            "{\"response\":\" and\",\"done\":false}\n",
            "{\"response\":\" steady\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        ];
        let expected = lines.concat();
        let base_url = serve_slow_ndjson(lines, Duration::from_millis(250)).await;

        // Whole body takes ~1s, ten times the connect timeout
        let client = OllamaClient::new(base_url, Duration::from_millis(100)).unwrap();
        let mut body = client
            .generate(&GenerateRequest {
                model: "llama3".to_string(),
                prompt: "hi".to_string(),
            })
            .await
            .unwrap();

        let mut received = Vec::new();
        while let Some(chunk) = body.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(String::from_utf8(received).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_request_error() {
        // Port 9 (discard) on localhost is expected to refuse connections
        let client = OllamaClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let result = client
            .generate(&GenerateRequest {
                model: "llama3".to_string(),
                prompt: "hi".to_string(),
            })
            .await;
        assert!(matches!(result, Err(UpstreamError::Request(_))));
    }
}
