use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use knowbot_agent::runtime::AgentRuntime;
use knowbot_agent::selector::DispatchMode;
use knowbot_core::config::KnowledgeBaseConfig;
use knowbot_core::domain::query::BackendResponse;
use knowbot_core::surface::MessagingSurface;
use knowbot_slack::blocks::{self, MessageTemplate, THINKING_TEXT};
use knowbot_slack::events::{EventContext, EventHandlerError, QuestionRequest, QuestionService, ServiceStatus};

/// Answers questions by streaming into an in-thread placeholder message.
pub struct StreamingQuestionService {
    runtime: Arc<AgentRuntime>,
    surface: Arc<dyn MessagingSurface>,
}

impl StreamingQuestionService {
    pub fn new(runtime: Arc<AgentRuntime>, surface: Arc<dyn MessagingSurface>) -> Self {
        Self { runtime, surface }
    }

    /// Single-shot path used when no placeholder could be posted.
    async fn answer_without_placeholder(&self, request: &QuestionRequest) -> BackendResponse {
        let query = &request.query;
        match (request.mode, query.knowledge_base_id.clone()) {
            (DispatchMode::DirectModel, _) => self.runtime.query(query, DispatchMode::DirectModel).await,
            (DispatchMode::Auto, Some(knowledge_base_id)) => {
                self.runtime.query_knowledge_bases(query, Some(std::slice::from_ref(&knowledge_base_id))).await
            }
            (DispatchMode::Auto, None) => self.runtime.query_knowledge_bases(query, None).await,
        }
    }
}

#[async_trait]
impl QuestionService for StreamingQuestionService {
    async fn answer(
        &self,
        request: &QuestionRequest,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError> {
        let query = &request.query;
        let placeholder = match self
            .surface
            .post_message(&query.channel_id, THINKING_TEXT, request.thread_ts.as_deref())
            .await
        {
            Ok(placeholder) => placeholder,
            Err(error) => {
                warn!(
                    event_name = "server.ask.placeholder_failed",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %query.channel_id,
                    error = %error,
                    "could not post placeholder, answering in one message"
                );
                let response = self.answer_without_placeholder(request).await;
                return Ok(Some(blocks::answer_message(&response)));
            }
        };

        let handle = match self.runtime.open_stream(query, request.mode).await {
            Ok(handle) => handle,
            Err(failure) => {
                warn!(
                    event_name = "server.ask.backends_failed",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %query.channel_id,
                    error = %failure,
                    "no backend could open a stream"
                );
                if let Err(error) =
                    self.surface.update_message(&placeholder.channel_id, &placeholder, &failure.user_message()).await
                {
                    warn!(
                        event_name = "server.ask.failure_edit_failed",
                        correlation_id = %ctx.correlation_id,
                        channel_id = %query.channel_id,
                        error = %error,
                        "could not edit placeholder with the failure message"
                    );
                }
                return Ok(None);
            }
        };

        let outcome = self.runtime.accumulate(handle, self.surface.as_ref(), &placeholder, ctx.cadence, None).await;
        info!(
            event_name = "server.ask.completed",
            correlation_id = %ctx.correlation_id,
            cadence = ?ctx.cadence,
            channel_id = %query.channel_id,
            user_id = %query.user_id,
            backend = %outcome.source_backend,
            answer_chars = outcome.final_text.chars().count(),
            citation_count = outcome.citation_count,
            progress_updates = outcome.progress_updates,
            skipped_updates = outcome.skipped_updates,
            failed = outcome.error.is_some(),
            "answer streamed"
        );
        Ok(None)
    }

    fn status(&self) -> ServiceStatus {
        ServiceStatus {
            agent_configured: self.runtime.agent_configured(),
            model: self.runtime.model_name().to_owned(),
            knowledge_base_count: self.runtime.knowledge_bases().ids.len(),
        }
    }

    fn knowledge_bases(&self) -> &KnowledgeBaseConfig {
        self.runtime.knowledge_bases()
    }
}
