use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use knowbot_core::domain::query::BackendKind;
use knowbot_core::errors::BackendError;

/// Records produced by one agent invocation, in arrival order.
pub type AgentRecordStream = BoxStream<'static, Result<AgentStreamRecord, BackendError>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInvocation {
    pub agent_id: String,
    pub alias_id: String,
    pub session_id: String,
    pub input_text: String,
    pub enable_trace: bool,
}

#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn invoke_agent(
        &self,
        invocation: AgentInvocation,
    ) -> Result<AgentRecordStream, BackendError>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStreamRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<AgentChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,
    /// Event kinds this client does not consume (return control, files, ...).
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentChunk {
    /// Base64 encoded UTF-8 text.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,
}

// Attribution fields below are parsed leniently: a sub-field of the wrong shape reads as absent
// so one odd reference cannot fail the record carrying answer text.

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribution {
    #[serde(default, deserialize_with = "lenient_list")]
    pub citations: Vec<AttributionCitation>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionCitation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_response_part: Option<Value>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub retrieved_references: Vec<RetrievedReference>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedReference {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub content: Option<ReferenceContent>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub location: Option<ReferenceLocation>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceContent {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceLocation {
    #[serde(default, rename = "type", deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub s3_location: Option<UriLocation>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub web_location: Option<UrlLocation>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub confluence_location: Option<UrlLocation>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub salesforce_location: Option<UrlLocation>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub share_point_location: Option<UrlLocation>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub kendra_document_location: Option<UriLocation>,
    /// Generic fields carried by location kinds without a dedicated variant.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UriLocation {
    #[serde(default, deserialize_with = "lenient")]
    pub uri: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UrlLocation {
    #[serde(default, deserialize_with = "lenient")]
    pub url: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Keeps the readable items of an array; anything else reads as empty.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items.into_iter().filter_map(|item| serde_json::from_value(item).ok()).collect())
}

/// Invokes an agent gateway over HTTP and reads newline-delimited JSON records.
///
/// `response_timeout` bounds connecting and waiting for the response head. The record stream
/// itself is unbounded.
pub struct HttpAgentTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    response_timeout: Duration,
}

impl HttpAgentTransport {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        response_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(response_timeout)
            .build()
            .map_err(|error| BackendError::transport(BackendKind::Agent, error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            response_timeout,
        })
    }

    fn endpoint(&self, invocation: &AgentInvocation) -> String {
        format!(
            "{}/agents/{}/agentAliases/{}/sessions/{}/text",
            self.base_url, invocation.agent_id, invocation.alias_id, invocation.session_id
        )
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn invoke_agent(
        &self,
        invocation: AgentInvocation,
    ) -> Result<AgentRecordStream, BackendError> {
        let mut request = self.client.post(self.endpoint(&invocation)).json(&json!({
            "inputText": invocation.input_text,
            "enableTrace": invocation.enable_trace,
            "sessionId": invocation.session_id,
        }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = tokio::time::timeout(self.response_timeout, request.send())
            .await
            .map_err(|_| {
                BackendError::transport(
                    BackendKind::Agent,
                    format!("no response within {}ms", self.response_timeout.as_millis()),
                )
            })?
            .map_err(|error| BackendError::transport(BackendKind::Agent, error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                backend: BackendKind::Agent,
                status: status.as_u16(),
                message,
            });
        }

        let (tx, rx) = mpsc::channel(32);
        let mut body = response.bytes_stream();
        tokio::spawn(async move {
            let mut buffer = Vec::new();
            while let Some(next) = body.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        let _ = tx
                            .send(Err(BackendError::stream(BackendKind::Agent, error.to_string())))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                for line in drain_lines(&mut buffer) {
                    match parse_record_line(&line) {
                        Ok(Some(record)) => {
                            if tx.send(Ok(record)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(error) => {
                            let _ = tx.send(Err(error)).await;
                            return;
                        }
                    }
                }
            }

            match parse_record_line(&String::from_utf8_lossy(&buffer)) {
                Ok(Some(record)) => {
                    let _ = tx.send(Ok(record)).await;
                }
                Ok(None) => {}
                Err(error) => {
                    let _ = tx.send(Err(error)).await;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Removes every complete line from `buffer`, leaving a trailing partial line in place.
pub(crate) fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(position) = buffer.iter().position(|byte| *byte == b'\n') {
        let line = buffer.drain(..=position).collect::<Vec<_>>();
        let text = String::from_utf8_lossy(&line);
        lines.push(text.trim_end_matches(['\r', '\n']).to_owned());
    }
    lines
}

fn parse_record_line(line: &str) -> Result<Option<AgentStreamRecord>, BackendError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<AgentStreamRecord>(line)
        .map(Some)
        .map_err(|error| BackendError::protocol(BackendKind::Agent, error.to_string()))
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::testing::{serve_once, serve_silence};
    use super::{drain_lines, parse_record_line, AgentInvocation, AgentStreamRecord, AgentTransport, HttpAgentTransport};
    use crate::citations::{normalize_attribution, FALLBACK_TITLE};

    #[test]
    fn drain_lines_keeps_partial_tail() {
        let mut buffer = b"{\"a\":1}\r\n{\"b\":2}\n{\"c\"".to_vec();
        let lines = drain_lines(&mut buffer);

        assert_eq!(lines, vec!["{\"a\":1}".to_owned(), "{\"b\":2}".to_owned()]);
        assert_eq!(buffer, b"{\"c\"".to_vec());
    }

    #[test]
    fn record_line_parses_chunk_bytes_and_attribution() {
        let line = r#"{"chunk":{"bytes":"aGVsbG8=","attribution":{"citations":[{"retrievedReferences":[{"location":{"type":"WEB","webLocation":{"url":"https://docs.example"}},"metadata":{"title":"Docs"}}]}]}}}"#;

        let record = parse_record_line(line).expect("parse").expect("record");
        let chunk = record.chunk.expect("chunk");
        assert_eq!(chunk.bytes.as_deref(), Some("aGVsbG8="));
        let attribution = chunk.attribution.expect("attribution");
        let reference = &attribution.citations[0].retrieved_references[0];
        let location = reference.location.as_ref().expect("location");
        assert_eq!(location.kind.as_deref(), Some("WEB"));
        assert_eq!(
            location.web_location.as_ref().and_then(|web| web.url.as_deref()),
            Some("https://docs.example")
        );
    }

    #[test]
    fn odd_shaped_reference_fields_read_as_absent() {
        let line = r#"{"chunk":{"bytes":"aGVsbG8=","attribution":{"citations":[{"retrievedReferences":[{"location":{"webLocation":{"url":"https://a"},"s3Location":"s3://nope"},"metadata":"not-an-object","content":{"text":5}},"stray"]}]}}}"#;

        let record = parse_record_line(line).expect("parse").expect("record");
        let chunk = record.chunk.expect("chunk");
        assert_eq!(chunk.bytes.as_deref(), Some("aGVsbG8="));

        let attribution = chunk.attribution.expect("attribution");
        let references = &attribution.citations[0].retrieved_references;
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].metadata, None);
        assert_eq!(references[0].content.as_ref().and_then(|content| content.text.clone()), None);

        let citations = normalize_attribution(&attribution);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].uri, "https://a");
        assert_eq!(citations[0].title, FALLBACK_TITLE);
    }

    #[test]
    fn unconsumed_event_kinds_are_kept_aside() {
        let record = parse_record_line(r#"{"returnControl":{"invocationId":"abc"}}"#)
            .expect("parse")
            .expect("record");

        assert_eq!(record.chunk, None);
        assert!(record.other.contains_key("returnControl"));
        assert_eq!(parse_record_line("   ").expect("blank"), None::<AgentStreamRecord>);
    }

    fn invocation() -> AgentInvocation {
        AgentInvocation {
            agent_id: "AGENT1".to_owned(),
            alias_id: "ALIAS1".to_owned(),
            session_id: "U1-C1-1730000000".to_owned(),
            input_text: "where is the vpn guide?".to_owned(),
            enable_trace: false,
        }
    }

    #[tokio::test]
    async fn record_stream_may_outlast_the_response_timeout() {
        let base_url = serve_once(vec![
            (Duration::ZERO, "{\"chunk\":{\"bytes\":\"aGVs\"}}\n"),
            (Duration::from_millis(600), "{\"chunk\":{\"bytes\":\"bG8=\"}}\n"),
        ])
        .await;
        let transport = HttpAgentTransport::new(base_url, None, Duration::from_millis(200)).expect("transport");

        let records = transport.invoke_agent(invocation()).await.expect("stream opens").collect::<Vec<_>>().await;

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn silent_gateway_fails_after_the_response_timeout() {
        let transport =
            HttpAgentTransport::new(serve_silence().await, None, Duration::from_millis(200)).expect("transport");

        let error = transport.invoke_agent(invocation()).await.err().expect("no response head");

        assert!(error.to_string().contains("no response within 200ms"));
    }

    #[test]
    fn malformed_line_is_a_protocol_error() {
        let error = parse_record_line("{not json").expect_err("should fail");
        assert!(error.to_string().contains("malformed payload"));
    }
}
