//! HTTP client for the server's OpenAI-compatible API.

use std::error::Error as _;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::sse::{decode_line, Frame, LineSplitter};
use crate::stream::{ChatStream, StreamCancel};
use crate::types::{ChatMessage, ChatRequest, ChatResponse};

/// Total time allowed for one request, streaming body included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const CONTENT_CAPACITY: usize = 16;

const TITLE_PROMPT: &str =
    "Generate a very short title (3-6 words max) for this conversation. Reply with ONLY the title, nothing else.";
const TITLE_CONTEXT_MESSAGES: usize = 4;
const TITLE_MAX_CHARS: usize = 50;
/// Title used when none can be generated.
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Client for one inference server.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    port: Option<u16>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl ChatClient {
    /// Client for a server on `localhost:{port}`.
    pub fn new(port: u16) -> Self {
        let mut client = Self::with_url(format!("http://localhost:{}/v1", port));
        client.port = Some(port);
        client
    }

    /// Client for an explicit base URL such as `http://host:8000/v1`.
    pub fn with_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            port: None,
            model: None,
            temperature: None,
            max_tokens: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    fn request(&self, messages: &[ChatMessage], stream: bool) -> reqwest::RequestBuilder {
        let body = ChatRequest {
            model: self.model.as_deref(),
            messages,
            stream,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        self.client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .json(&body)
    }

    /// Start a streaming completion.
    ///
    /// Returns immediately; the request runs on a spawned task that feeds
    /// the returned [`ChatStream`]. Must be called within a Tokio runtime.
    pub fn stream_chat_completion(&self, messages: &[ChatMessage]) -> ChatStream {
        let request = self
            .request(messages, true)
            .header(ACCEPT, "text/event-stream");
        let (content_tx, content_rx) = mpsc::channel(CONTENT_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(1);
        let cancel = StreamCancel::default();
        let token = cancel.token();

        tokio::spawn(async move {
            match pump(request, &content_tx, &token).await {
                Ok(()) => debug!("chat stream finished"),
                Err(_) if token.is_cancelled() => debug!("chat stream cancelled"),
                Err(err) => {
                    warn!("chat stream failed: {}", err);
                    let _ = error_tx.try_send(err);
                }
            }
        });

        ChatStream::new(content_rx, error_rx, cancel)
    }

    /// Run a completion and wait for the whole response.
    pub async fn chat_completion(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ChatError> {
        let response = self.request(messages, false).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Ask the model for a short title summarizing `messages`.
    ///
    /// Only the first few messages are sent. An empty conversation or an
    /// empty answer yields [`DEFAULT_TITLE`].
    pub async fn generate_title(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        if messages.is_empty() {
            return Ok(DEFAULT_TITLE.to_string());
        }

        let mut prompt = Vec::with_capacity(TITLE_CONTEXT_MESSAGES + 1);
        prompt.push(ChatMessage::system(TITLE_PROMPT));
        prompt.extend(messages.iter().take(TITLE_CONTEXT_MESSAGES).cloned());

        let response = self.chat_completion(&prompt).await?;
        Ok(response
            .content()
            .map(clean_title)
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string()))
    }

    /// Check that the server answers `GET /models` with 200.
    pub async fn check_connection(&self) -> Result<(), ChatError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .timeout(CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ChatError::ServerNotRunning(self.base_url.clone())
                } else {
                    ChatError::Http(e)
                }
            })?;

        let status = response.status();
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(ChatError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

fn clean_title(raw: &str) -> String {
    let title = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    if title.chars().count() > TITLE_MAX_CHARS {
        let cut: String = title.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", cut)
    } else {
        title.to_string()
    }
}

/// Whether to keep reading after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

async fn pump(
    request: reqwest::RequestBuilder,
    content: &mpsc::Sender<String>,
    cancel: &CancellationToken,
) -> Result<(), ChatError> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        response = request.send() => response?,
    };

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(ChatError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let mut body = response.bytes_stream();
    let mut lines = LineSplitter::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            next = body.next() => next,
        };
        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) if is_end_of_body(&e) => break,
            Some(Err(e)) => return Err(ChatError::Stream(e.to_string())),
            None => break,
        };
        for line in lines.push(&bytes) {
            if forward(&line, content, cancel).await == Flow::Stop {
                return Ok(());
            }
        }
    }

    if let Some(line) = lines.finish() {
        forward(&line, content, cancel).await;
    }
    Ok(())
}

async fn forward(line: &str, content: &mpsc::Sender<String>, cancel: &CancellationToken) -> Flow {
    let (delta, finished) = match decode_line(line) {
        Frame::Skip => return Flow::Continue,
        Frame::Done => return Flow::Stop,
        Frame::Chunk { delta, finished } => (delta, finished),
    };

    if let Some(delta) = delta {
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Flow::Stop,
            sent = content.send(delta) => sent,
        };
        // Consumer went away.
        if sent.is_err() {
            return Flow::Stop;
        }
    }

    if finished {
        Flow::Stop
    } else {
        Flow::Continue
    }
}

/// A body that ends abruptly is treated like a clean end of stream.
fn is_end_of_body(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        let text = cause.to_string();
        if text.contains("EOF")
            || text.contains("end of file")
            || text.contains("closed before message completed")
        {
            return true;
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamEvent;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
    }

    async fn client_for(server: &MockServer) -> ChatClient {
        ChatClient::with_url(format!("{}/v1", server.uri()))
    }

    async fn drain(mut stream: ChatStream) -> (Vec<String>, Vec<ChatError>, bool) {
        let mut deltas = Vec::new();
        let mut errors = Vec::new();
        let mut finished = false;
        while let Some(event) = stream.recv().await {
            match event {
                StreamEvent::Delta(delta) => deltas.push(delta),
                StreamEvent::Failed(err) => errors.push(err),
                StreamEvent::Finished => finished = true,
            }
        }
        (deltas, errors, finished)
    }

    #[test]
    fn test_new_uses_localhost_v1() {
        let client = ChatClient::new(8123);
        assert_eq!(client.base_url(), "http://localhost:8123/v1");
        assert_eq!(client.port(), Some(8123));
        assert_eq!(ChatClient::with_url("http://h:1/v1/").base_url(), "http://h:1/v1");
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  \"Rust Ownership Basics\"\n"), "Rust Ownership Basics");
        assert_eq!(clean_title("'quoted'"), "quoted");
        let long = "x".repeat(60);
        assert_eq!(clean_title(&long), format!("{}...", "x".repeat(50)));
        assert_eq!(clean_title("\"\""), "");
    }

    #[tokio::test]
    async fn test_stream_yields_deltas_in_order() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(sse(body))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let stream = client.stream_chat_completion(&[ChatMessage::user("hi")]);
        let (deltas, errors, finished) = drain(stream).await;
        assert_eq!(deltas, vec!["Hel", "lo"]);
        assert!(errors.is_empty());
        assert!(finished);
    }

    #[tokio::test]
    async fn test_stream_skips_malformed_and_foreign_lines() {
        let server = MockServer::start().await;
        let body = concat!(
            ": keep-alive\n",
            "event: ping\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {not valid json}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(sse(body))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let (deltas, errors, finished) =
            drain(client.stream_chat_completion(&[ChatMessage::user("hi")])).await;
        assert_eq!(deltas, vec!["Hel", "lo"]);
        assert!(errors.is_empty());
        assert!(finished);
    }

    #[tokio::test]
    async fn test_stream_stops_at_finish_reason() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(sse(body))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let (deltas, _, finished) =
            drain(client.stream_chat_completion(&[ChatMessage::user("hi")])).await;
        assert_eq!(deltas, vec!["a"]);
        assert!(finished);
    }

    #[tokio::test]
    async fn test_stream_non_200_reports_one_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let (deltas, errors, finished) =
            drain(client.stream_chat_completion(&[ChatMessage::user("hi")])).await;
        assert!(deltas.is_empty());
        assert!(!finished);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ChatError::Status { status, body } => {
                assert_eq!(*status, 500);
                assert_eq!(body, "model not loaded");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("accept", "text/event-stream"))
            .and(body_partial_json(json!({
                "model": "qwen",
                "stream": true,
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .respond_with(sse("data: [DONE]\n\n"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await.with_model("qwen");
        let (deltas, errors, finished) =
            drain(client.stream_chat_completion(&[ChatMessage::user("hi")])).await;
        assert!(deltas.is_empty());
        assert!(errors.is_empty());
        assert!(finished);
    }

    #[tokio::test]
    async fn test_stream_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ChatClient::with_url(format!("http://127.0.0.1:{}/v1", port));
        let (deltas, errors, _) =
            drain(client.stream_chat_completion(&[ChatMessage::user("hi")])).await;
        assert!(deltas.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ChatError::Http(_)));
    }

    #[tokio::test]
    async fn test_cancel_ends_endless_stream() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut request).await;
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            let data = "data: {\"choices\":[{\"delta\":{\"content\":\"tick\"}}]}\n\n";
            let chunk = format!("{:x}\r\n{}\r\n", data.len(), data);
            loop {
                if socket.write_all(chunk.as_bytes()).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let _ = closed_tx.send(());
        });

        let client = ChatClient::with_url(format!("http://127.0.0.1:{}/v1", port));
        let mut stream = client.stream_chat_completion(&[ChatMessage::user("hi")]);
        assert!(matches!(stream.recv().await, Some(StreamEvent::Delta(d)) if d == "tick"));

        let canceller = stream.canceller();
        canceller.cancel();
        assert!(stream.recv().await.is_none());
        drop(stream);

        tokio::time::timeout(Duration::from_secs(10), closed_rx)
            .await
            .expect("producer kept the connection open after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn test_chat_completion_and_title() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "c1",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "  \"Borrow Checker Tips\" "}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let response = client
            .chat_completion(&[ChatMessage::user("hi")])
            .await
            .unwrap();
        assert_eq!(response.usage.total_tokens, 8);

        let messages = vec![
            ChatMessage::user("how do lifetimes work"),
            ChatMessage::assistant("they scope borrows"),
        ];
        assert_eq!(client.generate_title(&messages).await.unwrap(), "Borrow Checker Tips");
        assert_eq!(client.generate_title(&[]).await.unwrap(), DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn test_title_sends_at_most_four_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": ""}}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let messages: Vec<_> = (0..6).map(|i| ChatMessage::user(format!("m{}", i))).collect();
        assert_eq!(client.generate_title(&messages).await.unwrap(), DEFAULT_TITLE);

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let sent = body["messages"].as_array().unwrap();
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[0]["role"], "system");
        assert_eq!(sent[4]["content"], "m3");
    }

    #[tokio::test]
    async fn test_check_connection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;
        assert!(client_for(&server).await.check_connection().await.is_ok());

        let failing = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&failing)
            .await;
        assert!(matches!(
            client_for(&failing).await.check_connection().await,
            Err(ChatError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_check_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ChatClient::with_url(format!("http://127.0.0.1:{}/v1", port));
        assert!(matches!(
            client.check_connection().await,
            Err(ChatError::ServerNotRunning(_))
        ));
    }
}
