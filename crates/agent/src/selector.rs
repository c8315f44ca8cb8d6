use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use knowbot_core::domain::query::{BackendKind, Query};
use knowbot_core::errors::{BackendError, InterfaceError};

use crate::chunk::StreamHandle;
use crate::llm::{ChatMessage, ModelRequest, ModelTransport};
use crate::prompts;
use crate::transport::{AgentInvocation, AgentTransport};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchMode {
    #[default]
    Auto,
    /// Skip the agent even when one is configured.
    DirectModel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentTarget {
    pub agent_id: String,
    pub alias_id: String,
    pub enable_trace: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self { temperature: 0.7, max_tokens: 2_000, system_prompt: None }
    }
}

/// Both backends failed for one query.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("no backend could answer: {model_error}")]
pub struct BackendFailure {
    pub agent_error: Option<BackendError>,
    pub model_error: BackendError,
}

impl BackendFailure {
    /// Canned explanation followed by the last error seen, which is the model's.
    pub fn user_message(&self) -> String {
        let interface = InterfaceError::from(&self.model_error);
        format!("❌ {}\nError: {}", interface.user_message(), self.model_error)
    }
}

/// Chooses agent or model per query and owns the single agent to model fallback.
pub struct BackendSelector {
    agent: Option<(AgentTarget, Arc<dyn AgentTransport>)>,
    model: Arc<dyn ModelTransport>,
    settings: ModelSettings,
}

impl BackendSelector {
    pub fn new(model: Arc<dyn ModelTransport>, settings: ModelSettings) -> Self {
        Self { agent: None, model, settings }
    }

    pub fn with_agent(mut self, target: AgentTarget, transport: Arc<dyn AgentTransport>) -> Self {
        self.agent = Some((target, transport));
        self
    }

    pub fn agent_configured(&self) -> bool {
        self.agent.as_ref().is_some_and(|(target, _)| {
            !target.agent_id.trim().is_empty() && !target.alias_id.trim().is_empty()
        })
    }

    pub fn uses_agent(&self, mode: DispatchMode) -> bool {
        mode == DispatchMode::Auto && self.agent_configured()
    }

    pub fn model_request(&self, query: &Query) -> ModelRequest {
        ModelRequest {
            messages: vec![
                ChatMessage::system(prompts::system_prompt(
                    self.settings.system_prompt.as_deref(),
                    query.knowledge_base_id.as_deref(),
                )),
                ChatMessage::user(query.question_text.clone()),
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    pub async fn open_agent_stream(&self, query: &Query) -> Result<StreamHandle, BackendError> {
        let Some((target, transport)) = self.agent.as_ref().filter(|_| self.agent_configured()) else {
            return Err(BackendError::NotConfigured { backend: BackendKind::Agent });
        };

        let invocation = AgentInvocation {
            agent_id: target.agent_id.clone(),
            alias_id: target.alias_id.clone(),
            session_id: query.session_id(Utc::now()),
            input_text: prompts::agent_input(query),
            enable_trace: target.enable_trace,
        };
        tracing::debug!(
            event_name = "agent.selector.invoke_agent",
            session_id = %invocation.session_id,
            "invoking agent"
        );
        let records = transport.invoke_agent(invocation).await?;
        Ok(StreamHandle::from_agent(records))
    }

    pub async fn open_model_stream(&self, query: &Query) -> Result<StreamHandle, BackendError> {
        let text = self.model.stream(&self.model_request(query)).await?;
        Ok(StreamHandle::from_model(text))
    }

    pub async fn generate(&self, query: &Query) -> Result<String, BackendError> {
        self.model.generate(&self.model_request(query)).await
    }

    /// Opens a chunk stream, falling back to the model once if the agent cannot be opened.
    pub async fn open_stream(
        &self,
        query: &Query,
        mode: DispatchMode,
    ) -> Result<StreamHandle, BackendFailure> {
        let mut agent_error = None;

        if self.uses_agent(mode) {
            match self.open_agent_stream(query).await {
                Ok(handle) => {
                    tracing::info!(
                        event_name = "agent.selector.dispatch",
                        backend = %BackendKind::Agent,
                        channel_id = %query.channel_id,
                        user_id = %query.user_id,
                        "streaming from agent"
                    );
                    return Ok(handle);
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "agent.selector.fallback",
                        error = %error,
                        channel_id = %query.channel_id,
                        "agent unavailable, falling back to model"
                    );
                    agent_error = Some(error);
                }
            }
        }

        match self.open_model_stream(query).await {
            Ok(handle) => {
                tracing::info!(
                    event_name = "agent.selector.dispatch",
                    backend = %BackendKind::Model,
                    channel_id = %query.channel_id,
                    user_id = %query.user_id,
                    "streaming from model"
                );
                Ok(handle)
            }
            Err(model_error) => {
                tracing::error!(
                    event_name = "agent.selector.failed",
                    error = %model_error,
                    channel_id = %query.channel_id,
                    "model backend failed"
                );
                Err(BackendFailure { agent_error, model_error })
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;

    use knowbot_core::domain::query::{BackendKind, Query};
    use knowbot_core::errors::BackendError;

    use super::testing::{text_record, AgentScript, ScriptedAgent, ScriptedModel};
    use super::{AgentTarget, BackendSelector, DispatchMode, ModelSettings};
    use crate::llm::Role;

    fn target() -> AgentTarget {
        AgentTarget {
            agent_id: "AGENT1".to_owned(),
            alias_id: "ALIAS1".to_owned(),
            enable_trace: false,
        }
    }

    #[tokio::test]
    async fn configured_agent_is_tried_first() {
        let agent = Arc::new(ScriptedAgent::new(vec![AgentScript::Records(vec![Ok(text_record("hi"))])]));
        let model = Arc::new(ScriptedModel::answering("model"));
        let selector = BackendSelector::new(model.clone(), ModelSettings::default())
            .with_agent(target(), agent.clone());

        let handle = selector
            .open_stream(&Query::new("q", "U1", "C1"), DispatchMode::Auto)
            .await
            .expect("stream");

        assert_eq!(handle.source_backend(), BackendKind::Agent);
        assert_eq!(agent.invocation_count().await, 1);
        assert_eq!(model.request_count().await, 0);
    }

    #[tokio::test]
    async fn agent_open_failure_falls_back_to_model_once() {
        let agent = Arc::new(ScriptedAgent::new(vec![AgentScript::Fail(BackendError::transport(
            BackendKind::Agent,
            "throttled",
        ))]));
        let model = Arc::new(ScriptedModel::answering("from model"));
        let selector = BackendSelector::new(model.clone(), ModelSettings::default())
            .with_agent(target(), agent.clone());

        let handle = selector
            .open_stream(&Query::new("q", "U1", "C1"), DispatchMode::Auto)
            .await
            .expect("fallback stream");

        assert_eq!(handle.source_backend(), BackendKind::Model);
        let text = handle.into_chunks().count().await;
        assert_eq!(text, 2);
        assert_eq!(model.request_count().await, 1);
    }

    #[tokio::test]
    async fn direct_mode_skips_configured_agent() {
        let agent = Arc::new(ScriptedAgent::default());
        let model = Arc::new(ScriptedModel::answering("direct"));
        let selector = BackendSelector::new(model, ModelSettings::default()).with_agent(target(), agent.clone());

        let handle = selector
            .open_stream(&Query::new("q", "U1", "C1"), DispatchMode::DirectModel)
            .await
            .expect("stream");

        assert_eq!(handle.source_backend(), BackendKind::Model);
        assert_eq!(agent.invocation_count().await, 0);
    }

    #[tokio::test]
    async fn blank_agent_id_counts_as_not_configured() {
        let agent = Arc::new(ScriptedAgent::default());
        let selector = BackendSelector::new(Arc::new(ScriptedModel::answering("m")), ModelSettings::default())
            .with_agent(AgentTarget { agent_id: " ".to_owned(), ..target() }, agent.clone());

        assert!(!selector.agent_configured());
        let handle = selector
            .open_stream(&Query::new("q", "U1", "C1"), DispatchMode::Auto)
            .await
            .expect("stream");
        assert_eq!(handle.source_backend(), BackendKind::Model);
        assert_eq!(agent.invocation_count().await, 0);
    }

    #[tokio::test]
    async fn both_backends_failing_yields_structured_failure() {
        let agent = Arc::new(ScriptedAgent::new(vec![AgentScript::Fail(BackendError::transport(
            BackendKind::Agent,
            "down",
        ))]));
        let selector = BackendSelector::new(Arc::new(ScriptedModel::failing()), ModelSettings::default())
            .with_agent(target(), agent);

        let failure = selector
            .open_stream(&Query::new("q", "U1", "C1"), DispatchMode::Auto)
            .await
            .expect_err("both fail");

        assert!(failure.agent_error.is_some());
        assert_eq!(failure.model_error.backend(), BackendKind::Model);
        let message = failure.user_message();
        assert!(message.starts_with("❌ "));
        assert!(message.ends_with(&format!("Error: {}", failure.model_error)));
    }

    #[tokio::test]
    async fn knowledge_base_reaches_agent_input_and_model_prompt() {
        let agent = Arc::new(ScriptedAgent::new(vec![AgentScript::Records(Vec::new())]));
        let selector = BackendSelector::new(Arc::new(ScriptedModel::answering("m")), ModelSettings::default())
            .with_agent(target(), agent.clone());
        let query = Query::new("vacation policy?", "U1", "C1").with_knowledge_base("KB-HR");

        selector.open_stream(&query, DispatchMode::Auto).await.expect("stream");
        let invocations = agent.invocations.lock().await;
        assert_eq!(invocations[0].input_text, "Using knowledge base KB-HR: vacation policy?");
        assert!(invocations[0].session_id.starts_with("U1-C1-"));

        let request = selector.model_request(&query);
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.contains("KB-HR"));
        assert_eq!(request.messages[1].content, "vacation policy?");
    }
}
