//! Backend side of the assistant: talks to the knowledge-base agent and the language model,
//! and reconciles their streamed output into a single chat message.
//!
//! # Flow
//!
//! 1. **Selection** (`selector`) picks the agent when one is configured, otherwise the model,
//!    and falls back to the model once when the agent cannot be opened.
//! 2. **Classification** (`chunk`) turns raw transport chunks into text, citation, or
//!    completion events. Citation payloads go through `citations`.
//! 3. **Accumulation** (`accumulator`) appends text, merges citations, edits the
//!    placeholder message on a fixed cadence, and writes the final answer with its Sources.
//! 4. **Single-shot answers** (`orchestrator`) follow the same routing without progress
//!    edits, including the ordered multi knowledge base search.
//!
//! `AgentRuntime` bundles all of the above into one handle built at startup.

pub mod accumulator;
pub mod chunk;
pub mod citations;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod runtime;
pub mod selector;
pub mod transport;

pub use accumulator::{AccumulatorSettings, StreamAccumulator, StreamOutcome};
pub use chunk::{classify, NormalizedEvent, RawChunk, StreamHandle, TaggedChunk};
pub use orchestrator::QueryOrchestrator;
pub use runtime::{AgentRuntime, Cadence};
pub use selector::{BackendFailure, BackendSelector, DispatchMode};
