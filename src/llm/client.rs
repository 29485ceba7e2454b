//! Ollama chat client.
//!
//! Sends a single user message to `/api/chat` with streaming enabled and
//! accumulates the streamed `message.content` fragments into one answer.

use super::stream::ChunkStream;
use crate::config::LlmConfig;
use crate::error::{RagEvalError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Anything that turns a prompt into a generated answer.
#[async_trait]
pub trait Completer {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Message role in a chat request. Only user turns are sent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

/// A message in the chat request.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Request body for `/api/chat`.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    stream: bool,
}

/// Response from `/api/tags`.
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Streaming client for a local Ollama server.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    config: LlmConfig,
}

impl OllamaClient {
    /// Create a new client. Every request is bounded by `config.timeout_secs`.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .build()
            .map_err(|e| RagEvalError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Chat endpoint URL.
    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base())
    }

    /// Generate an answer with the configured model.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        self.complete_with_model(prompt, &self.config.model).await
    }

    /// Generate an answer with an explicit model name.
    ///
    /// Failed attempts are retried up to `max_retries` times.
    pub async fn complete_with_model(&self, prompt: &str, model: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.chat_once(prompt, model).await {
                Ok(answer) => return Ok(answer),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "Completion failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn chat_once(&self, prompt: &str, model: &str) -> Result<String> {
        let request = ChatRequest {
            model,
            messages: vec![Message::user(prompt)],
            stream: true,
        };

        debug!(model, prompt_chars = prompt.len(), "Sending chat request");

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagEvalError::CompletionService(format!(
                "Error from Ollama API ({}): {}",
                status, body
            )));
        }

        ChunkStream::new(Box::pin(response.bytes_stream()))
            .collect_content()
            .await
    }

    /// Readiness probe: the server root answers with a success status.
    pub async fn ping(&self) -> Result<()> {
        let response = self.client.get(format!("{}/", self.base())).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RagEvalError::CompletionService(format!(
                "Server at {} answered {}",
                self.base(),
                status
            )))
        }
    }

    /// Names of the models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base()))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RagEvalError::CompletionService(format!(
                "Listing models failed ({})",
                status
            )));
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl Completer for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.generate(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve each canned `(status line, body)` to one connection, in order.
    /// Returns the base URL and the request bodies that were received.
    async fn serve(responses: Vec<(&'static str, String)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                sink.lock().unwrap().push(request);

                let reply = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/x-ndjson\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (format!("http://{}", addr), received)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        loop {
            let n = socket.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    return text[header_end + 4..].to_string();
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn client_for(base_url: &str, max_retries: u32) -> OllamaClient {
        OllamaClient::new(LlmConfig {
            base_url: base_url.to_string(),
            model: "llama3.2".to_string(),
            timeout_secs: 5,
            max_retries,
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_construction() {
        let client = client_for("http://localhost:11434/", 0);
        assert_eq!(client.endpoint(), "http://localhost:11434/api/chat");

        let client = client_for("http://localhost:11434", 0);
        assert_eq!(client.endpoint(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "llama3.2",
            messages: vec![Message::user("hi")],
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llama3.2",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true
            })
        );
    }

    #[tokio::test]
    async fn test_streamed_answer_is_accumulated() {
        let body = [
            r#"{"model":"llama3.2","message":{"role":"assistant","content":" Paris"},"done":false}"#,
            r#"{"model":"llama3.2","message":{"role":"assistant","content":" is the capital."},"done":false}"#,
            r#"garbage"#,
            r#"{"model":"llama3.2","message":{"role":"assistant","content":""},"done":true}"#,
        ]
        .join("\n");
        let (base, received) = serve(vec![("200 OK", body)]).await;

        let answer = client_for(&base, 0)
            .complete("What is the capital of France?")
            .await
            .unwrap();
        assert_eq!(answer, "Paris is the capital.");

        let request: serde_json::Value =
            serde_json::from_str(&received.lock().unwrap()[0]).unwrap();
        assert_eq!(request["model"], "llama3.2");
        assert_eq!(request["messages"][0]["role"], "user");
        assert_eq!(
            request["messages"][0]["content"],
            "What is the capital of France?"
        );
    }

    #[tokio::test]
    async fn test_error_status_is_completion_error() {
        let (base, _) = serve(vec![(
            "404 Not Found",
            r#"{"error":"model 'llama3.2' not found"}"#.to_string(),
        )])
        .await;

        let err = client_for(&base, 0).complete("hello").await.unwrap_err();
        match err {
            RagEvalError::CompletionService(msg) => {
                assert!(msg.contains("404"));
                assert!(msg.contains("not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retry_after_failure() {
        let (base, received) = serve(vec![
            ("500 Internal Server Error", "busy".to_string()),
            (
                "200 OK",
                r#"{"message":{"content":"ok"},"done":true}"#.to_string(),
            ),
        ])
        .await;

        let answer = client_for(&base, 1).complete("hello").await.unwrap();
        assert_eq!(answer, "ok");
        assert_eq!(received.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_completion_error() {
        // Bind then drop to get a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(&format!("http://{}", addr), 0);
        assert!(matches!(
            client.ping().await,
            Err(RagEvalError::CompletionService(_))
        ));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold the connection without ever answering.
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let client = OllamaClient::new(LlmConfig {
            base_url: format!("http://{}", addr),
            model: "llama3.2".to_string(),
            timeout_secs: 1,
            max_retries: 0,
        })
        .unwrap();

        let err = client.complete("hello").await.unwrap_err();
        match err {
            RagEvalError::CompletionService(msg) => assert!(msg.contains("timed out"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
        server.abort();
    }

    #[tokio::test]
    async fn test_ping_and_list_models() {
        let (base, _) = serve(vec![
            ("200 OK", "Ollama is running".to_string()),
            (
                "200 OK",
                r#"{"models":[{"name":"llama3.2:latest","size":1},{"name":"mistral:7b"}]}"#
                    .to_string(),
            ),
        ])
        .await;

        let client = client_for(&base, 0);
        client.ping().await.unwrap();
        assert_eq!(
            client.list_models().await.unwrap(),
            vec!["llama3.2:latest", "mistral:7b"]
        );
    }
}
