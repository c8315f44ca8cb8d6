use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of a posted message, used to edit it in place.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: String,
    pub ts: String,
}

impl MessageRef {
    pub fn new(channel_id: impl Into<String>, ts: impl Into<String>) -> Self {
        Self { channel_id: channel_id.into(), ts: ts.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("messaging transport failed: {0}")]
    Transport(String),
    #[error("messaging api `{method}` rejected the call: {error}")]
    Api { method: String, error: String },
    #[error("messaging api returned an unexpected payload: {0}")]
    Protocol(String),
}

/// Outbound chat surface. Every call is a suspension point and may fail independently.
#[async_trait]
pub trait MessagingSurface: Send + Sync {
    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<MessageRef, SurfaceError>;

    async fn update_message(
        &self,
        channel_id: &str,
        message: &MessageRef,
        text: &str,
    ) -> Result<(), SurfaceError>;
}
