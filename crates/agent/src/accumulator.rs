use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;

use knowbot_core::domain::citation::CitationList;
use knowbot_core::domain::query::BackendKind;
use knowbot_core::surface::{MessageRef, MessagingSurface};

use crate::chunk::{classify, NormalizedEvent, StreamHandle};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccumulatorSettings {
    pub update_interval: Duration,
    pub progress_marker: String,
    /// Progress edits are skipped once less than this remains before `deadline`.
    pub budget_reserve: Duration,
    pub deadline: Option<Instant>,
}

/// What one accumulation run did, for logs and callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOutcome {
    pub source_backend: BackendKind,
    pub final_text: String,
    pub citation_count: usize,
    pub progress_updates: usize,
    pub skipped_updates: usize,
    pub stopped_on_complete: bool,
    pub final_update_delivered: bool,
    pub error: Option<String>,
}

struct AccumulationState {
    full_text: String,
    citations: CitationList,
    last_external_update: Instant,
}

pub struct StreamAccumulator {
    settings: AccumulatorSettings,
}

impl StreamAccumulator {
    pub fn new(settings: AccumulatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AccumulatorSettings {
        &self.settings
    }

    /// Drains `handle` into `message`. Never returns an error; failures end up in the message.
    pub async fn run(
        &self,
        handle: StreamHandle,
        surface: &dyn MessagingSurface,
        message: &MessageRef,
    ) -> StreamOutcome {
        let source_backend = handle.source_backend();
        let mut chunks = handle.into_chunks();
        let mut state = AccumulationState {
            full_text: String::new(),
            citations: CitationList::new(),
            last_external_update: Instant::now(),
        };
        let mut outcome = StreamOutcome {
            source_backend,
            final_text: String::new(),
            citation_count: 0,
            progress_updates: 0,
            skipped_updates: 0,
            stopped_on_complete: false,
            final_update_delivered: false,
            error: None,
        };

        while let Some(next) = chunks.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(error) => {
                    tracing::warn!(
                        event_name = "agent.accumulator.stream_failed",
                        backend = %source_backend,
                        error = %error,
                        "stream failed mid-response"
                    );
                    outcome.error = Some(error.to_string());
                    break;
                }
            };

            match classify(chunk) {
                Some(NormalizedEvent::Text(delta)) => state.full_text.push_str(&delta),
                Some(NormalizedEvent::Citations(batch)) => {
                    state.citations.extend(batch);
                }
                Some(NormalizedEvent::Complete) => {
                    outcome.stopped_on_complete = true;
                    break;
                }
                None => {}
            }

            self.maybe_push_progress(&mut state, &mut outcome, surface, message).await;
        }
        drop(chunks);

        let final_text = match &outcome.error {
            Some(error) => format!("❌ Error: {error}"),
            None => state.citations.append_sources_to(&state.full_text),
        };

        match surface.update_message(&message.channel_id, message, &final_text).await {
            Ok(()) => outcome.final_update_delivered = true,
            Err(error) => tracing::warn!(
                event_name = "agent.accumulator.final_update_failed",
                channel_id = %message.channel_id,
                error = %error,
                "could not deliver final text"
            ),
        }

        outcome.citation_count = state.citations.len();
        outcome.final_text = final_text;
        tracing::info!(
            event_name = "agent.accumulator.finished",
            backend = %source_backend,
            chars = outcome.final_text.chars().count(),
            citations = outcome.citation_count,
            progress_updates = outcome.progress_updates,
            skipped_updates = outcome.skipped_updates,
            errored = outcome.error.is_some(),
            "stream accumulated"
        );
        outcome
    }

    async fn maybe_push_progress(
        &self,
        state: &mut AccumulationState,
        outcome: &mut StreamOutcome,
        surface: &dyn MessagingSurface,
        message: &MessageRef,
    ) {
        let now = Instant::now();
        if now.duration_since(state.last_external_update) <= self.settings.update_interval {
            return;
        }

        if let Some(deadline) = self.settings.deadline {
            if deadline.saturating_duration_since(now) < self.settings.budget_reserve {
                outcome.skipped_updates += 1;
                state.last_external_update = now;
                tracing::debug!(
                    event_name = "agent.accumulator.progress_skipped",
                    "execution budget nearly spent, skipping progress edit"
                );
                return;
            }
        }

        let progress = format!("{}{}", state.full_text, self.settings.progress_marker);
        if let Err(error) = surface.update_message(&message.channel_id, message, &progress).await {
            tracing::warn!(
                event_name = "agent.accumulator.progress_failed",
                channel_id = %message.channel_id,
                error = %error,
                "progress edit failed, continuing"
            );
        } else {
            outcome.progress_updates += 1;
        }
        state.last_external_update = Instant::now();
    }
}
