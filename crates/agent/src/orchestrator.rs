use std::sync::Arc;

use futures::StreamExt;

use knowbot_core::domain::citation::CitationList;
use knowbot_core::domain::query::{BackendKind, BackendResponse, Query};
use knowbot_core::errors::BackendError;

use crate::chunk::{classify, NormalizedEvent};
use crate::selector::{BackendFailure, BackendSelector, DispatchMode};

/// Single-shot answers: same routing and fallback as streaming, no progress edits.
#[derive(Clone)]
pub struct QueryOrchestrator {
    selector: Arc<BackendSelector>,
}

impl QueryOrchestrator {
    pub fn new(selector: Arc<BackendSelector>) -> Self {
        Self { selector }
    }

    pub async fn query(&self, query: &Query, mode: DispatchMode) -> BackendResponse {
        let mut agent_error = None;

        if self.selector.uses_agent(mode) {
            match self.query_agent(query).await {
                Ok(response) => return response,
                Err(error) => {
                    tracing::warn!(
                        event_name = "agent.orchestrator.fallback",
                        error = %error,
                        channel_id = %query.channel_id,
                        "agent query failed, falling back to model"
                    );
                    agent_error = Some(error);
                }
            }
        }

        match self.selector.generate(query).await {
            Ok(text) => BackendResponse::success(BackendKind::Model, text, Vec::new()),
            Err(model_error) => {
                let failure = BackendFailure { agent_error, model_error };
                tracing::error!(
                    event_name = "agent.orchestrator.failed",
                    error = %failure,
                    channel_id = %query.channel_id,
                    "no backend answered"
                );
                BackendResponse::failure(BackendKind::Model, failure.user_message())
            }
        }
    }

    /// Drains one agent invocation into a response. No model fallback happens here.
    pub async fn query_agent(&self, query: &Query) -> Result<BackendResponse, BackendError> {
        let mut chunks = self.selector.open_agent_stream(query).await?.into_chunks();
        let mut text = String::new();
        let mut citations = CitationList::new();

        while let Some(chunk) = chunks.next().await {
            match classify(chunk?) {
                Some(NormalizedEvent::Text(delta)) => text.push_str(&delta),
                Some(NormalizedEvent::Citations(batch)) => {
                    citations.extend(batch);
                }
                Some(NormalizedEvent::Complete) => break,
                None => {}
            }
        }

        let response_text = citations.append_sources_to(&text);
        Ok(BackendResponse::success(BackendKind::Agent, response_text, citations.into_vec()))
    }

    /// Tries each knowledge base in order through the agent and keeps the first usable answer.
    pub async fn query_knowledge_bases(&self, query: &Query, knowledge_base_ids: &[String]) -> BackendResponse {
        if self.selector.agent_configured() {
            for knowledge_base_id in knowledge_base_ids {
                let scoped = query.clone().with_knowledge_base(knowledge_base_id.clone());
                match self.query_agent(&scoped).await {
                    Ok(response) if response.is_usable() => {
                        tracing::info!(
                            event_name = "agent.orchestrator.knowledge_base_hit",
                            knowledge_base_id = %knowledge_base_id,
                            "knowledge base answered"
                        );
                        return response;
                    }
                    Ok(_) => tracing::debug!(
                        event_name = "agent.orchestrator.knowledge_base_empty",
                        knowledge_base_id = %knowledge_base_id,
                        "knowledge base returned nothing"
                    ),
                    Err(error) => tracing::warn!(
                        event_name = "agent.orchestrator.knowledge_base_failed",
                        knowledge_base_id = %knowledge_base_id,
                        error = %error,
                        "knowledge base query failed"
                    ),
                }
            }
        }

        let unscoped = Query { knowledge_base_id: None, ..query.clone() };
        self.query(&unscoped, DispatchMode::Auto).await
    }
}
