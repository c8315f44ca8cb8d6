use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::stream::{self, BoxStream, StreamExt};

use knowbot_core::domain::citation::Citation;
use knowbot_core::domain::query::BackendKind;
use knowbot_core::errors::BackendError;

use crate::citations::normalize_attribution;
use crate::llm::TextStream;
use crate::transport::{AgentRecordStream, AgentStreamRecord, Attribution};

pub type ChunkStream = BoxStream<'static, Result<RawChunk, BackendError>>;

/// Backend-specific unit as read off a transport.
#[derive(Clone, Debug, PartialEq)]
pub enum RawChunk {
    Model(String),
    Tagged(TaggedChunk),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TaggedChunk {
    Text(String),
    Citations(Attribution),
    Complete,
    Unrecognized { kind: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum NormalizedEvent {
    Text(String),
    Citations(Vec<Citation>),
    Complete,
}

/// Returns `None` for chunk kinds that carry nothing for the reader.
pub fn classify(chunk: RawChunk) -> Option<NormalizedEvent> {
    match chunk {
        RawChunk::Model(text) => Some(NormalizedEvent::Text(text)),
        RawChunk::Tagged(TaggedChunk::Text(text)) => Some(NormalizedEvent::Text(text)),
        RawChunk::Tagged(TaggedChunk::Citations(attribution)) => {
            Some(NormalizedEvent::Citations(normalize_attribution(&attribution)))
        }
        RawChunk::Tagged(TaggedChunk::Complete) => Some(NormalizedEvent::Complete),
        RawChunk::Tagged(TaggedChunk::Unrecognized { kind }) => {
            tracing::debug!(event_name = "agent.chunk.unrecognized", kind = %kind, "ignoring chunk");
            None
        }
    }
}

/// An open, single-consumer chunk sequence from one backend.
pub struct StreamHandle {
    source_backend: BackendKind,
    chunks: ChunkStream,
}

impl StreamHandle {
    pub fn new(source_backend: BackendKind, chunks: ChunkStream) -> Self {
        Self { source_backend, chunks }
    }

    pub fn from_model(text: TextStream) -> Self {
        Self::new(BackendKind::Model, text.map(|item| item.map(RawChunk::Model)).boxed())
    }

    /// Tags agent records and closes the sequence with `Complete`.
    pub fn from_agent(records: AgentRecordStream) -> Self {
        let tagged = records
            .flat_map(|record| stream::iter(tag_record(record)))
            .chain(stream::once(async { Ok(RawChunk::Tagged(TaggedChunk::Complete)) }));
        Self::new(BackendKind::Agent, tagged.boxed())
    }

    pub fn source_backend(&self) -> BackendKind {
        self.source_backend
    }

    pub fn into_chunks(self) -> ChunkStream {
        self.chunks
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").field("source_backend", &self.source_backend).finish()
    }
}

fn tag_record(
    record: Result<AgentStreamRecord, BackendError>,
) -> Vec<Result<RawChunk, BackendError>> {
    let record = match record {
        Ok(record) => record,
        Err(error) => return vec![Err(error)],
    };

    let mut tagged = Vec::new();
    if let Some(chunk) = record.chunk {
        if let Some(encoded) = chunk.bytes {
            tagged.push(decode_text(&encoded).map(|text| RawChunk::Tagged(TaggedChunk::Text(text))));
        }
        if let Some(attribution) = chunk.attribution {
            tagged.push(Ok(RawChunk::Tagged(TaggedChunk::Citations(attribution))));
        }
    } else if record.trace.is_some() {
        tracing::trace!(event_name = "agent.chunk.trace", "agent trace record");
    } else if let Some(kind) = record.other.keys().next() {
        tagged.push(Ok(RawChunk::Tagged(TaggedChunk::Unrecognized { kind: kind.clone() })));
    }
    tagged
}

fn decode_text(encoded: &str) -> Result<String, BackendError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|error| BackendError::protocol(BackendKind::Agent, format!("chunk bytes: {error}")))?;
    String::from_utf8(bytes)
        .map_err(|error| BackendError::protocol(BackendKind::Agent, format!("chunk text: {error}")))
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use futures::stream::{self, StreamExt};
    use serde_json::json;

    use knowbot_core::domain::citation::SourceType;
    use knowbot_core::domain::query::BackendKind;
    use knowbot_core::errors::BackendError;

    use super::{classify, NormalizedEvent, RawChunk, StreamHandle, TaggedChunk};
    use crate::transport::{AgentStreamRecord, Attribution};

    fn record(value: serde_json::Value) -> AgentStreamRecord {
        serde_json::from_value(value).expect("record")
    }

    #[test]
    fn model_strings_and_tagged_text_become_text_events() {
        assert_eq!(
            classify(RawChunk::Model("hi".to_owned())),
            Some(NormalizedEvent::Text("hi".to_owned()))
        );
        assert_eq!(
            classify(RawChunk::Tagged(TaggedChunk::Text("yo".to_owned()))),
            Some(NormalizedEvent::Text("yo".to_owned()))
        );
        assert_eq!(classify(RawChunk::Tagged(TaggedChunk::Complete)), Some(NormalizedEvent::Complete));
    }

    #[test]
    fn tagged_citations_pass_through_normalizer() {
        let attribution: Attribution = serde_json::from_value(json!({
            "citations": [{"retrievedReferences": [
                {"location": {"kendraDocumentLocation": {"uri": "kendra://doc"}}, "metadata": {"title": "Doc"}}
            ]}]
        }))
        .expect("attribution");

        let Some(NormalizedEvent::Citations(batch)) =
            classify(RawChunk::Tagged(TaggedChunk::Citations(attribution)))
        else {
            panic!("expected citations event");
        };
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].source_type, SourceType::Kendra);
    }

    #[test]
    fn unrecognized_tag_is_ignored() {
        assert_eq!(
            classify(RawChunk::Tagged(TaggedChunk::Unrecognized { kind: "files".to_owned() })),
            None
        );
    }

    #[tokio::test]
    async fn agent_records_are_tagged_and_terminated_with_complete() {
        let records = vec![
            Ok(record(json!({"chunk": {"bytes": STANDARD.encode("Hello ")}}))),
            Ok(record(json!({"trace": {"step": 1}}))),
            Ok(record(json!({"chunk": {
                "bytes": STANDARD.encode("world"),
                "attribution": {"citations": []}
            }}))),
            Ok(record(json!({"returnControl": {}}))),
        ];
        let handle = StreamHandle::from_agent(stream::iter(records).boxed());
        assert_eq!(handle.source_backend(), BackendKind::Agent);

        let chunks = handle
            .into_chunks()
            .map(|chunk| chunk.expect("chunk"))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(
            chunks,
            vec![
                RawChunk::Tagged(TaggedChunk::Text("Hello ".to_owned())),
                RawChunk::Tagged(TaggedChunk::Text("world".to_owned())),
                RawChunk::Tagged(TaggedChunk::Citations(Attribution::default())),
                RawChunk::Tagged(TaggedChunk::Unrecognized { kind: "returnControl".to_owned() }),
                RawChunk::Tagged(TaggedChunk::Complete),
            ]
        );
    }

    #[tokio::test]
    async fn invalid_base64_surfaces_as_protocol_error() {
        let records = vec![Ok(record(json!({"chunk": {"bytes": "***"}})))];
        let mut chunks = StreamHandle::from_agent(stream::iter(records).boxed()).into_chunks();

        let first = chunks.next().await.expect("item");
        assert!(matches!(first, Err(BackendError::Protocol { backend: BackendKind::Agent, .. })));
    }

    #[tokio::test]
    async fn model_text_is_wrapped_as_model_chunks() {
        let text = stream::iter(vec![Ok("a".to_owned()), Ok("b".to_owned())]).boxed();
        let handle = StreamHandle::from_model(text);
        assert_eq!(handle.source_backend(), BackendKind::Model);

        let chunks = handle.into_chunks().collect::<Vec<_>>().await;
        assert_eq!(chunks, vec![Ok(RawChunk::Model("a".to_owned())), Ok(RawChunk::Model("b".to_owned()))]);
    }
}
