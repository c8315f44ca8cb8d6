use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::citation::Citation;

pub const MAX_SESSION_ID_CHARS: usize = 100;

/// One user question, immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub question_text: String,
    pub user_id: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_id: Option<String>,
}

impl Query {
    pub fn new(
        question_text: impl Into<String>,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            question_text: question_text.into(),
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            knowledge_base_id: None,
        }
    }

    pub fn with_knowledge_base(mut self, knowledge_base_id: impl Into<String>) -> Self {
        self.knowledge_base_id = Some(knowledge_base_id.into());
        self
    }

    /// `{user}-{channel}-{unix seconds}`, capped at 100 characters.
    pub fn session_id(&self, now: DateTime<Utc>) -> String {
        let raw = format!("{}-{}-{}", self.user_id, self.channel_id, now.timestamp());
        raw.chars().take(MAX_SESSION_ID_CHARS).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Agent,
    Model,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Model => "model",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub success: bool,
    pub response_text: String,
    pub source_backend: BackendKind,
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl BackendResponse {
    pub fn success(
        source_backend: BackendKind,
        response_text: impl Into<String>,
        citations: Vec<Citation>,
    ) -> Self {
        Self {
            success: true,
            response_text: response_text.into(),
            source_backend,
            citations,
            error_message: None,
        }
    }

    pub fn failure(source_backend: BackendKind, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            response_text: String::new(),
            source_backend,
            citations: Vec::new(),
            error_message: Some(error_message.into()),
        }
    }

    /// A response the multi knowledge base search may stop on.
    pub fn is_usable(&self) -> bool {
        self.success && !self.response_text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{BackendKind, BackendResponse, Query, MAX_SESSION_ID_CHARS};

    #[test]
    fn session_id_joins_user_channel_and_seconds() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("timestamp");
        let query = Query::new("what is the vpn?", "U123", "C456");

        assert_eq!(query.session_id(now), "U123-C456-1700000000");
    }

    #[test]
    fn session_id_is_bounded_for_long_user_ids() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("timestamp");
        let query = Query::new("q", format!("U{}", "x".repeat(200)), "C1");

        let session_id = query.session_id(now);
        assert!(session_id.chars().count() <= MAX_SESSION_ID_CHARS);
        assert!(session_id.starts_with("Uxxx"));
    }

    #[test]
    fn session_id_truncation_respects_multibyte_characters() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("timestamp");
        let query = Query::new("q", "é".repeat(150), "C1");

        let session_id = query.session_id(now);
        assert_eq!(session_id.chars().count(), MAX_SESSION_ID_CHARS);
    }

    #[test]
    fn failure_response_is_not_usable() {
        let failed = BackendResponse::failure(BackendKind::Agent, "throttled");
        assert!(!failed.is_usable());
        assert_eq!(failed.error_message.as_deref(), Some("throttled"));

        let blank = BackendResponse::success(BackendKind::Agent, "  ", Vec::new());
        assert!(!blank.is_usable());

        let answered = BackendResponse::success(BackendKind::Model, "ok", Vec::new());
        assert!(answered.is_usable());
    }
}
