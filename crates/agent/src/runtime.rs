use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use knowbot_core::config::{AppConfig, KnowledgeBaseConfig, StreamingConfig};
use knowbot_core::domain::query::{BackendResponse, Query};
use knowbot_core::errors::BackendError;
use knowbot_core::surface::{MessageRef, MessagingSurface};

use crate::accumulator::{AccumulatorSettings, StreamAccumulator, StreamOutcome};
use crate::chunk::StreamHandle;
use crate::llm::{HttpModelTransport, ModelTransport};
use crate::orchestrator::QueryOrchestrator;
use crate::selector::{AgentTarget, BackendFailure, BackendSelector, DispatchMode, ModelSettings};
use crate::transport::{AgentTransport, HttpAgentTransport};

/// How often progress edits are pushed. Socket Mode replies use `Interactive`; the Events API path uses `Background`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Cadence {
    /// A user is watching the placeholder message.
    #[default]
    Interactive,
    Background,
}

/// Process-wide backend handle. Built once at startup and shared by `Arc`.
pub struct AgentRuntime {
    selector: Arc<BackendSelector>,
    orchestrator: QueryOrchestrator,
    streaming: StreamingConfig,
    knowledge_bases: KnowledgeBaseConfig,
    model_name: String,
}

impl AgentRuntime {
    pub fn new(
        selector: BackendSelector,
        streaming: StreamingConfig,
        knowledge_bases: KnowledgeBaseConfig,
        model_name: impl Into<String>,
    ) -> Self {
        let selector = Arc::new(selector);
        Self {
            orchestrator: QueryOrchestrator::new(selector.clone()),
            selector,
            streaming,
            knowledge_bases,
            model_name: model_name.into(),
        }
    }

    /// Builds the HTTP transports described by `config`. An incomplete agent section disables the agent.
    pub fn from_config(config: &AppConfig) -> Result<Self, BackendError> {
        let model: Arc<dyn ModelTransport> = Arc::new(HttpModelTransport::new(
            config.model.base_url.clone(),
            config.model.api_key.clone(),
            config.model.model.clone(),
            Duration::from_secs(config.model.timeout_secs),
        )?);
        let settings = ModelSettings {
            temperature: config.model.temperature,
            max_tokens: config.model.max_tokens,
            system_prompt: config.model.system_prompt.clone(),
        };
        let mut selector = BackendSelector::new(model, settings);

        if let (true, Some(base_url)) = (config.agent.is_configured(), config.agent.base_url.as_deref()) {
            let transport: Arc<dyn AgentTransport> = Arc::new(HttpAgentTransport::new(
                base_url,
                config.agent.api_key.clone(),
                Duration::from_secs(config.agent.timeout_secs),
            )?);
            selector = selector.with_agent(
                AgentTarget {
                    agent_id: config.agent.agent_id.clone(),
                    alias_id: config.agent.alias_id.clone(),
                    enable_trace: config.agent.enable_trace,
                },
                transport,
            );
        } else {
            tracing::info!(
                event_name = "agent.runtime.agent_disabled",
                "agent not configured, answering with the model only"
            );
        }

        Ok(Self::new(
            selector,
            config.streaming.clone(),
            config.knowledge_bases.clone(),
            config.model.model.clone(),
        ))
    }

    pub fn agent_configured(&self) -> bool {
        self.selector.agent_configured()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn knowledge_bases(&self) -> &KnowledgeBaseConfig {
        &self.knowledge_bases
    }

    pub fn accumulator_settings(&self, cadence: Cadence, deadline: Option<Instant>) -> AccumulatorSettings {
        let interval_ms = match cadence {
            Cadence::Interactive => self.streaming.interactive_update_ms,
            Cadence::Background => self.streaming.background_update_ms,
        };
        AccumulatorSettings {
            update_interval: Duration::from_millis(interval_ms),
            progress_marker: self.streaming.progress_marker.clone(),
            budget_reserve: Duration::from_millis(self.streaming.budget_reserve_ms),
            deadline,
        }
    }

    pub async fn open_stream(&self, query: &Query, mode: DispatchMode) -> Result<StreamHandle, BackendFailure> {
        self.selector.open_stream(query, mode).await
    }

    pub async fn accumulate(
        &self,
        handle: StreamHandle,
        surface: &dyn MessagingSurface,
        message: &MessageRef,
        cadence: Cadence,
        deadline: Option<Instant>,
    ) -> StreamOutcome {
        StreamAccumulator::new(self.accumulator_settings(cadence, deadline)).run(handle, surface, message).await
    }

    pub async fn query(&self, query: &Query, mode: DispatchMode) -> BackendResponse {
        self.orchestrator.query(query, mode).await
    }

    /// Searches `ids`, or the configured priority list when `None`.
    pub async fn query_knowledge_bases(&self, query: &Query, ids: Option<&[String]>) -> BackendResponse {
        let ids = ids.unwrap_or(&self.knowledge_bases.ids);
        self.orchestrator.query_knowledge_bases(query, ids).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use knowbot_core::config::{AppConfig, KnowledgeBaseConfig};
    use knowbot_core::domain::query::{BackendKind, Query};

    use super::{AgentRuntime, Cadence};
    use crate::selector::testing::ScriptedModel;
    use crate::selector::{BackendSelector, DispatchMode, ModelSettings};

    fn model_only_runtime(answer: &str) -> AgentRuntime {
        let config = AppConfig::default();
        AgentRuntime::new(
            BackendSelector::new(Arc::new(ScriptedModel::answering(answer)), ModelSettings::default()),
            config.streaming,
            KnowledgeBaseConfig { ids: vec!["KB-1".to_owned()], entries: Vec::new() },
            "test-model",
        )
    }

    #[test]
    fn cadence_selects_configured_interval() {
        let runtime = model_only_runtime("x");

        assert_eq!(
            runtime.accumulator_settings(Cadence::Interactive, None).update_interval,
            Duration::from_millis(2_000)
        );
        assert_eq!(
            runtime.accumulator_settings(Cadence::Background, None).update_interval,
            Duration::from_millis(3_000)
        );
    }

    #[test]
    fn from_config_without_agent_gateway_is_model_only() {
        let mut config = AppConfig::default();
        config.agent.agent_id = "AGENT1".to_owned();

        let runtime = AgentRuntime::from_config(&config).expect("runtime");
        assert!(!runtime.agent_configured());
        assert_eq!(runtime.model_name(), config.model.model);
    }

    #[test]
    fn from_config_with_agent_gateway_enables_agent() {
        let mut config = AppConfig::default();
        config.agent.agent_id = "AGENT1".to_owned();
        config.agent.base_url = Some("http://127.0.0.1:9".to_owned());

        let runtime = AgentRuntime::from_config(&config).expect("runtime");
        assert!(runtime.agent_configured());
    }

    #[tokio::test]
    async fn knowledge_base_query_without_agent_uses_unscoped_model_answer() {
        let runtime = model_only_runtime("general");

        let response = runtime.query_knowledge_bases(&Query::new("q", "U1", "C1"), None).await;
        assert_eq!(response.source_backend, BackendKind::Model);
        assert_eq!(response.response_text, "general");

        let direct = runtime.query(&Query::new("q", "U1", "C1"), DispatchMode::DirectModel).await;
        assert!(direct.success);
    }
}
