use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use knowbot_core::domain::query::BackendKind;
use knowbot_core::errors::BackendError;

use crate::transport::drain_lines;

/// Text deltas of one streamed completion.
pub type TextStream = BoxStream<'static, Result<String, BackendError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn generate(&self, request: &ModelRequest) -> Result<String, BackendError>;

    async fn stream(&self, request: &ModelRequest) -> Result<TextStream, BackendError>;
}

/// OpenAI-compatible `/chat/completions` client.
///
/// `timeout` covers a whole `generate` call. For `stream` it only covers the wait for the
/// response head, so long answers are never cut off.
pub struct HttpModelTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    timeout: Duration,
}

impl HttpModelTransport {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|error| BackendError::transport(BackendKind::Model, error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            model: model.into(),
            timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &ModelRequest, stream: bool) -> Result<reqwest::Response, BackendError> {
        let mut builder = self.client.post(format!("{}/chat/completions", self.base_url)).json(&json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": stream,
        }));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }
        if !stream {
            builder = builder.timeout(self.timeout);
        }

        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| {
                BackendError::transport(BackendKind::Model, format!("no response within {}ms", self.timeout.as_millis()))
            })?
            .map_err(|error| BackendError::transport(BackendKind::Model, error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                backend: BackendKind::Model,
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelTransport for HttpModelTransport {
    async fn generate(&self, request: &ModelRequest) -> Result<String, BackendError> {
        let body = self
            .send(request, false)
            .await?
            .json::<Value>()
            .await
            .map_err(|error| BackendError::protocol(BackendKind::Model, error.to_string()))?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| BackendError::protocol(BackendKind::Model, "missing choices[0].message.content"))
    }

    async fn stream(&self, request: &ModelRequest) -> Result<TextStream, BackendError> {
        let response = self.send(request, true).await?;

        let (tx, rx) = mpsc::channel(64);
        let mut body = response.bytes_stream();
        tokio::spawn(async move {
            let mut buffer = Vec::new();
            while let Some(next) = body.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        let _ = tx
                            .send(Err(BackendError::stream(BackendKind::Model, error.to_string())))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                for line in drain_lines(&mut buffer) {
                    match parse_sse_line(&line) {
                        SseLine::Delta(delta) => {
                            if tx.send(Ok(delta)).await.is_err() {
                                return;
                            }
                        }
                        SseLine::Done => return,
                        SseLine::Skip => {}
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    let Ok(parsed) = serde_json::from_str::<Value>(data) else {
        tracing::debug!(event_name = "agent.model.sse_unparsed", "skipping unparsable sse line");
        return SseLine::Skip;
    };
    match parsed["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => SseLine::Delta(content.to_owned()),
        _ => SseLine::Skip,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::{parse_sse_line, ChatMessage, HttpModelTransport, ModelRequest, ModelTransport, Role, SseLine};
    use crate::transport::testing::serve_once;

    #[tokio::test]
    async fn slow_completion_stream_is_read_to_the_end() {
        let base_url = serve_once(vec![
            (Duration::ZERO, "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n"),
            (Duration::from_millis(600), "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n"),
        ])
        .await;
        let transport =
            HttpModelTransport::new(base_url, None, "llama3.1", Duration::from_millis(200)).expect("transport");
        let request = ModelRequest { messages: vec![ChatMessage::user("hi")], temperature: 0.2, max_tokens: 16 };

        let deltas = transport.stream(&request).await.expect("stream opens").collect::<Vec<_>>().await;

        let text = deltas.into_iter().collect::<Result<String, _>>().expect("no stream error");
        assert_eq!(text, "Hello");
    }

    #[test]
    fn sse_delta_lines_yield_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Delta("Hel".to_owned()));
    }

    #[test]
    fn sse_done_marker_ends_stream() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
    }

    #[test]
    fn sse_comments_roles_and_garbage_are_skipped() {
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("event: message"), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
        assert_eq!(parse_sse_line("data: {oops"), SseLine::Skip);
    }

    #[test]
    fn chat_messages_serialize_with_lowercase_roles() {
        let value = serde_json::to_value(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
        ])
        .expect("serialize");

        assert_eq!(value[0]["role"], "system");
        assert_eq!(value[1]["role"], "user");
        assert_eq!(ChatMessage::user("x").role, Role::User);
    }
}
