use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub agent: AgentConfig,
    pub model: ModelConfig,
    pub knowledge_bases: KnowledgeBaseConfig,
    pub streaming: StreamingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub signing_secret: Option<SecretString>,
    pub app_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub agent_id: String,
    pub alias_id: String,
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub enable_trace: bool,
    pub timeout_secs: u64,
}

impl AgentConfig {
    /// An agent without an id, alias, or gateway URL is treated as absent rather than invalid.
    pub fn is_configured(&self) -> bool {
        !self.agent_id.trim().is_empty()
            && !self.alias_id.trim().is_empty()
            && self.base_url.as_deref().map(|url| !url.trim().is_empty()).unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KnowledgeBaseConfig {
    /// Priority order for multi-knowledge-base queries.
    pub ids: Vec<String>,
    pub entries: Vec<KnowledgeBaseEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl KnowledgeBaseConfig {
    pub fn display_name(&self, id: &str) -> String {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.name.clone())
            .unwrap_or_else(|| id.to_owned())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamingConfig {
    pub interactive_update_ms: u64,
    pub background_update_ms: u64,
    pub budget_reserve_ms: u64,
    pub progress_marker: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub events_port: u16,
    pub events_path: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub agent_id: Option<String>,
    pub agent_alias_id: Option<String>,
    pub agent_base_url: Option<String>,
    pub model_base_url: Option<String>,
    pub model_name: Option<String>,
    pub knowledge_base_ids: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_AGENT_ALIAS_ID: &str = "TSTALIASID";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                bot_token: String::new().into(),
                signing_secret: None,
                app_token: None,
            },
            agent: AgentConfig {
                agent_id: String::new(),
                alias_id: DEFAULT_AGENT_ALIAS_ID.to_string(),
                base_url: None,
                api_key: None,
                enable_trace: false,
                timeout_secs: 120,
            },
            model: ModelConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                api_key: None,
                model: "llama3.1".to_string(),
                temperature: 0.7,
                max_tokens: 2_000,
                system_prompt: None,
                timeout_secs: 120,
            },
            knowledge_bases: KnowledgeBaseConfig::default(),
            streaming: StreamingConfig {
                interactive_update_ms: 2_000,
                background_update_ms: 3_000,
                budget_reserve_ms: 3_000,
                progress_marker: " ...".to_string(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                events_port: 3000,
                events_path: "/slack/events".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("knowbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
            if let Some(signing_secret) = slack.signing_secret {
                self.slack.signing_secret = Some(secret_value(signing_secret));
            }
            if let Some(app_token) = slack.app_token {
                self.slack.app_token = Some(secret_value(app_token));
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(agent_id) = agent.agent_id {
                self.agent.agent_id = agent_id;
            }
            if let Some(alias_id) = agent.alias_id {
                self.agent.alias_id = alias_id;
            }
            if let Some(base_url) = agent.base_url {
                self.agent.base_url = Some(base_url);
            }
            if let Some(api_key) = agent.api_key {
                self.agent.api_key = Some(secret_value(api_key));
            }
            if let Some(enable_trace) = agent.enable_trace {
                self.agent.enable_trace = enable_trace;
            }
            if let Some(timeout_secs) = agent.timeout_secs {
                self.agent.timeout_secs = timeout_secs;
            }
        }

        if let Some(model) = patch.model {
            if let Some(base_url) = model.base_url {
                self.model.base_url = base_url;
            }
            if let Some(api_key) = model.api_key {
                self.model.api_key = Some(secret_value(api_key));
            }
            if let Some(name) = model.model {
                self.model.model = name;
            }
            if let Some(temperature) = model.temperature {
                self.model.temperature = temperature;
            }
            if let Some(max_tokens) = model.max_tokens {
                self.model.max_tokens = max_tokens;
            }
            if let Some(system_prompt) = model.system_prompt {
                self.model.system_prompt = Some(system_prompt);
            }
            if let Some(timeout_secs) = model.timeout_secs {
                self.model.timeout_secs = timeout_secs;
            }
        }

        if let Some(knowledge_bases) = patch.knowledge_bases {
            if let Some(ids) = knowledge_bases.ids {
                self.knowledge_bases.ids = ids;
            }
            if let Some(entries) = knowledge_bases.entries {
                self.knowledge_bases.entries = entries;
            }
        }

        if let Some(streaming) = patch.streaming {
            if let Some(interactive_update_ms) = streaming.interactive_update_ms {
                self.streaming.interactive_update_ms = interactive_update_ms;
            }
            if let Some(background_update_ms) = streaming.background_update_ms {
                self.streaming.background_update_ms = background_update_ms;
            }
            if let Some(budget_reserve_ms) = streaming.budget_reserve_ms {
                self.streaming.budget_reserve_ms = budget_reserve_ms;
            }
            if let Some(progress_marker) = streaming.progress_marker {
                self.streaming.progress_marker = progress_marker;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(events_port) = server.events_port {
                self.server.events_port = events_port;
            }
            if let Some(events_path) = server.events_path {
                self.server.events_path = events_path;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("KNOWBOT_SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("KNOWBOT_SLACK_SIGNING_SECRET") {
            self.slack.signing_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("KNOWBOT_SLACK_APP_TOKEN") {
            self.slack.app_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("KNOWBOT_AGENT_ID") {
            self.agent.agent_id = value;
        }
        if let Some(value) = read_env("KNOWBOT_AGENT_ALIAS_ID") {
            self.agent.alias_id = value;
        }
        if let Some(value) = read_env("KNOWBOT_AGENT_BASE_URL") {
            self.agent.base_url = Some(value);
        }
        if let Some(value) = read_env("KNOWBOT_AGENT_API_KEY") {
            self.agent.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("KNOWBOT_AGENT_ENABLE_TRACE") {
            self.agent.enable_trace = parse_bool("KNOWBOT_AGENT_ENABLE_TRACE", &value)?;
        }
        if let Some(value) = read_env("KNOWBOT_AGENT_TIMEOUT_SECS") {
            self.agent.timeout_secs = parse_u64("KNOWBOT_AGENT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("KNOWBOT_MODEL_BASE_URL") {
            self.model.base_url = value;
        }
        if let Some(value) = read_env("KNOWBOT_MODEL_API_KEY") {
            self.model.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("KNOWBOT_MODEL_NAME") {
            self.model.model = value;
        }
        if let Some(value) = read_env("KNOWBOT_MODEL_TEMPERATURE") {
            self.model.temperature = parse_f32("KNOWBOT_MODEL_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("KNOWBOT_MODEL_MAX_TOKENS") {
            self.model.max_tokens = parse_u32("KNOWBOT_MODEL_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("KNOWBOT_MODEL_SYSTEM_PROMPT") {
            self.model.system_prompt = Some(value);
        }
        if let Some(value) = read_env("KNOWBOT_MODEL_TIMEOUT_SECS") {
            self.model.timeout_secs = parse_u64("KNOWBOT_MODEL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("KNOWBOT_KNOWLEDGE_BASE_IDS") {
            self.knowledge_bases.ids = split_list(&value);
        }

        if let Some(value) = read_env("KNOWBOT_STREAMING_INTERACTIVE_UPDATE_MS") {
            self.streaming.interactive_update_ms =
                parse_u64("KNOWBOT_STREAMING_INTERACTIVE_UPDATE_MS", &value)?;
        }
        if let Some(value) = read_env("KNOWBOT_STREAMING_BACKGROUND_UPDATE_MS") {
            self.streaming.background_update_ms =
                parse_u64("KNOWBOT_STREAMING_BACKGROUND_UPDATE_MS", &value)?;
        }
        if let Some(value) = read_env("KNOWBOT_STREAMING_BUDGET_RESERVE_MS") {
            self.streaming.budget_reserve_ms =
                parse_u64("KNOWBOT_STREAMING_BUDGET_RESERVE_MS", &value)?;
        }

        if let Some(value) = read_env("KNOWBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("KNOWBOT_SERVER_EVENTS_PORT") {
            self.server.events_port = parse_u16("KNOWBOT_SERVER_EVENTS_PORT", &value)?;
        }
        if let Some(value) = read_env("KNOWBOT_SERVER_EVENTS_PATH") {
            self.server.events_path = value;
        }
        if let Some(value) = read_env("KNOWBOT_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("KNOWBOT_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("KNOWBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("KNOWBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("KNOWBOT_LOGGING_LEVEL").or_else(|| read_env("KNOWBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("KNOWBOT_LOGGING_FORMAT").or_else(|| read_env("KNOWBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(bot_token);
        }
        if let Some(signing_secret) = overrides.slack_signing_secret {
            self.slack.signing_secret = Some(secret_value(signing_secret));
        }
        if let Some(agent_id) = overrides.agent_id {
            self.agent.agent_id = agent_id;
        }
        if let Some(alias_id) = overrides.agent_alias_id {
            self.agent.alias_id = alias_id;
        }
        if let Some(base_url) = overrides.agent_base_url {
            self.agent.base_url = Some(base_url);
        }
        if let Some(base_url) = overrides.model_base_url {
            self.model.base_url = base_url;
        }
        if let Some(model_name) = overrides.model_name {
            self.model.model = model_name;
        }
        if let Some(ids) = overrides.knowledge_base_ids {
            self.knowledge_bases.ids = ids;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_agent(&self.agent)?;
        validate_model(&self.model)?;
        validate_knowledge_bases(&self.knowledge_bases)?;
        validate_streaming(&self.streaming)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("knowbot.toml"), PathBuf::from("config/knowbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if let Some(app_token) = &slack.app_token {
        if !app_token.expose_secret().starts_with("xapp-") {
            return Err(ConfigError::Validation(
                "slack.app_token must start with `xapp-` when set".to_string(),
            ));
        }
    }

    if let Some(signing_secret) = &slack.signing_secret {
        if signing_secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "slack.signing_secret must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.timeout_secs == 0 || agent.timeout_secs > 900 {
        return Err(ConfigError::Validation(
            "agent.timeout_secs must be in range 1..=900".to_string(),
        ));
    }

    if let Some(base_url) = &agent.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "agent.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_model(model: &ModelConfig) -> Result<(), ConfigError> {
    if !model.base_url.starts_with("http://") && !model.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "model.base_url must start with http:// or https://".to_string(),
        ));
    }

    if model.model.trim().is_empty() {
        return Err(ConfigError::Validation("model.model must not be empty".to_string()));
    }

    if !(0.0..=1.0).contains(&model.temperature) {
        return Err(ConfigError::Validation(
            "model.temperature must be in range 0.0..=1.0".to_string(),
        ));
    }

    if model.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "model.max_tokens must be greater than zero".to_string(),
        ));
    }

    if model.timeout_secs == 0 || model.timeout_secs > 900 {
        return Err(ConfigError::Validation(
            "model.timeout_secs must be in range 1..=900".to_string(),
        ));
    }

    Ok(())
}

fn validate_knowledge_bases(knowledge_bases: &KnowledgeBaseConfig) -> Result<(), ConfigError> {
    if knowledge_bases.ids.iter().any(|id| id.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "knowledge_bases.ids must not contain blank identifiers".to_string(),
        ));
    }

    if let Some(entry) = knowledge_bases.entries.iter().find(|entry| entry.id.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "knowledge_bases.entries `{}` is missing an id",
            entry.name
        )));
    }

    Ok(())
}

fn validate_streaming(streaming: &StreamingConfig) -> Result<(), ConfigError> {
    if streaming.interactive_update_ms == 0 || streaming.background_update_ms == 0 {
        return Err(ConfigError::Validation(
            "streaming update intervals must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.events_port == 0 || server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.events_port and server.health_check_port must be greater than zero"
                .to_string(),
        ));
    }

    if !server.events_path.starts_with('/') {
        return Err(ConfigError::Validation("server.events_path must start with `/`".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    agent: Option<AgentPatch>,
    model: Option<ModelPatch>,
    knowledge_bases: Option<KnowledgeBasePatch>,
    streaming: Option<StreamingPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    signing_secret: Option<String>,
    app_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    agent_id: Option<String>,
    alias_id: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    enable_trace: Option<bool>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgeBasePatch {
    ids: Option<Vec<String>>,
    entries: Option<Vec<KnowledgeBaseEntry>>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamingPatch {
    interactive_update_ms: Option<u64>,
    background_update_ms: Option<u64>,
    budget_reserve_ms: Option<u64>,
    progress_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    events_port: Option<u16>,
    events_path: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
