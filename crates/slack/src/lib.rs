//! Slack surface for the knowledge-base assistant.
//!
//! - **Events** (`events`) - inbound envelopes, handlers, and the `QuestionService` seam
//! - **Intent routing** (`commands`) - ordered regex table over message text
//! - **Templates** (`blocks`) - canned replies and the answer wrapper
//! - **Web API** (`web`) - `chat.postMessage` / `chat.update` as a `MessagingSurface`
//! - **Signatures** (`signature`) - Events API request verification
//! - **Socket Mode** (`socket`) - websocket ingress opened with the app-level token, with reconnect backoff
//!
//! ```text
//! Slack event → EventDispatcher → Handler → IntentRouter ─┬→ canned template
//!                                                         └→ QuestionService → backends
//! ```

pub mod blocks;
pub mod commands;
pub mod events;
pub mod signature;
pub mod socket;
pub mod web;

pub use commands::{Intent, IntentRouter};
pub use events::{
    default_dispatcher, deliver, dispatcher_with, EventContext, EventDispatcher, HandlerResult, QuestionRequest,
    QuestionService, ServiceStatus, SlackEnvelope, SlackEvent,
};
pub use signature::SignatureVerifier;
pub use web::SlackWebClient;
