use thiserror::Error;

use crate::domain::query::BackendKind;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("{backend} backend is not configured")]
    NotConfigured { backend: BackendKind },
    #[error("{backend} transport failure: {message}")]
    Transport { backend: BackendKind, message: String },
    #[error("{backend} returned status {status}: {message}")]
    Status { backend: BackendKind, status: u16, message: String },
    #[error("{backend} returned a malformed payload: {message}")]
    Protocol { backend: BackendKind, message: String },
    #[error("{backend} stream failed: {message}")]
    Stream { backend: BackendKind, message: String },
}

impl BackendError {
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::NotConfigured { backend }
            | Self::Transport { backend, .. }
            | Self::Status { backend, .. }
            | Self::Protocol { backend, .. }
            | Self::Stream { backend, .. } => *backend,
        }
    }

    pub fn transport(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Transport { backend, message: message.into() }
    }

    pub fn protocol(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Protocol { backend, message: message.into() }
    }

    pub fn stream(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Stream { backend, message: message.into() }
    }
}

/// User-safe classification of a backend failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "I couldn't process that request. Check the question and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "I'm having trouble reaching the AI service right now. Please try again shortly."
            }
            Self::Internal { .. } => "Something went wrong on my side while answering.",
        }
    }
}

impl From<&BackendError> for InterfaceError {
    fn from(value: &BackendError) -> Self {
        let message = value.to_string();
        match value {
            BackendError::NotConfigured { .. } => Self::Internal { message },
            BackendError::Protocol { .. } => Self::BadRequest { message },
            BackendError::Transport { .. } | BackendError::Status { .. } | BackendError::Stream { .. } => {
                Self::ServiceUnavailable { message }
            }
        }
    }
}
