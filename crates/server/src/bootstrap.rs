use std::sync::Arc;

use knowbot_agent::runtime::AgentRuntime;
use knowbot_core::config::{AppConfig, ConfigError, LoadOptions};
use knowbot_core::errors::BackendError;
use knowbot_core::surface::{MessagingSurface, SurfaceError};
use knowbot_slack::events::{dispatcher_with, EventDispatcher};
use knowbot_slack::signature::SignatureVerifier;
use knowbot_slack::socket::{ReconnectPolicy, SocketModeRunner, WebSocketTransport};
use knowbot_slack::web::SlackWebClient;
use thiserror::Error;
use tracing::{info, warn};

use crate::events::EventsState;
use crate::health::HealthState;
use crate::services::StreamingQuestionService;

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<AgentRuntime>,
    pub slack: Arc<SlackWebClient>,
    pub dispatcher: Arc<EventDispatcher>,
    pub bot_user_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("backend client setup failed: {0}")]
    Backend(#[source] BackendError),
    #[error("slack client setup failed: {0}")]
    Slack(#[source] SurfaceError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Builds every long-lived handle once. Performs no network calls.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let runtime = Arc::new(AgentRuntime::from_config(&config).map_err(BootstrapError::Backend)?);
    let slack = Arc::new(SlackWebClient::new(config.slack.bot_token.clone()).map_err(BootstrapError::Slack)?);
    let surface: Arc<dyn MessagingSurface> = slack.clone();
    let service = Arc::new(StreamingQuestionService::new(runtime.clone(), surface));
    let dispatcher = Arc::new(dispatcher_with(service));

    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        agent_configured = runtime.agent_configured(),
        model = runtime.model_name(),
        knowledge_base_count = config.knowledge_bases.ids.len(),
        "backend runtime initialized"
    );

    Ok(Application { config, runtime, slack, dispatcher, bot_user_id: None })
}

impl Application {
    /// Best effort: without the bot id, echo and reaction filtering fall back to `bot_id`.
    pub async fn resolve_bot_user_id(&mut self) {
        match self.slack.auth_test().await {
            Ok(identity) => {
                info!(
                    event_name = "system.bootstrap.bot_identity",
                    correlation_id = "bootstrap",
                    bot_user_id = %identity.user_id,
                    team = identity.team.as_deref().unwrap_or("unknown"),
                    "resolved slack bot identity"
                );
                self.bot_user_id = Some(identity.user_id);
            }
            Err(error) => {
                warn!(
                    event_name = "system.bootstrap.bot_identity_failed",
                    correlation_id = "bootstrap",
                    error = %error,
                    "could not resolve slack bot identity"
                );
            }
        }
    }

    pub fn events_state(&self) -> EventsState {
        EventsState {
            dispatcher: self.dispatcher.clone(),
            surface: self.slack.clone(),
            verifier: self.config.slack.signing_secret.clone().map(SignatureVerifier::new),
            bot_user_id: self.bot_user_id.clone(),
        }
    }

    pub fn health_state(&self) -> HealthState {
        HealthState {
            agent_configured: self.runtime.agent_configured(),
            model_name: self.config.model.model.clone(),
            model_base_url: self.config.model.base_url.clone(),
        }
    }

    /// Socket Mode ingress, present only when an app-level token is configured.
    pub fn socket_runner(&self) -> Option<SocketModeRunner> {
        let app_token = self.config.slack.app_token.clone()?;
        let transport = Arc::new(WebSocketTransport::new(self.slack.clone(), app_token));
        let runner =
            SocketModeRunner::new(transport, self.dispatcher.clone(), self.slack.clone(), ReconnectPolicy::default())
                .with_bot_user_id(self.bot_user_id.clone());
        Some(runner)
    }
}
