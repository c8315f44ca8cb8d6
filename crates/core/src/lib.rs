//! Shared building blocks for the knowledge-base assistant: layered configuration,
//! the error taxonomy, query and citation types, and the outbound messaging trait.

pub mod config;
pub mod domain;
pub mod errors;
pub mod surface;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::citation::{Citation, CitationList, SourceType};
pub use domain::query::{BackendKind, BackendResponse, Query};
pub use errors::{BackendError, InterfaceError};
pub use surface::{MessageRef, MessagingSurface, SurfaceError};
