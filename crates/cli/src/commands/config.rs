use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use knowbot_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let sources = SourceResolver { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    let knowledge_base_ids = if config.knowledge_bases.ids.is_empty() {
        "<none>".to_owned()
    } else {
        config.knowledge_bases.ids.join(",")
    };

    let fields = vec![
        field("slack.bot_token", redact_token(config.slack.bot_token.expose_secret()), &["KNOWBOT_SLACK_BOT_TOKEN"]),
        field("slack.app_token", redact_optional(config.slack.app_token.as_ref()), &["KNOWBOT_SLACK_APP_TOKEN"]),
        field(
            "slack.signing_secret",
            presence(config.slack.signing_secret.is_some()),
            &["KNOWBOT_SLACK_SIGNING_SECRET"],
        ),
        field("agent.agent_id", or_unset(&config.agent.agent_id), &["KNOWBOT_AGENT_ID"]),
        field("agent.alias_id", or_unset(&config.agent.alias_id), &["KNOWBOT_AGENT_ALIAS_ID"]),
        field(
            "agent.base_url",
            config.agent.base_url.clone().unwrap_or_else(|| "<unset>".to_owned()),
            &["KNOWBOT_AGENT_BASE_URL"],
        ),
        field("agent.api_key", presence(config.agent.api_key.is_some()), &["KNOWBOT_AGENT_API_KEY"]),
        field("agent.enable_trace", config.agent.enable_trace.to_string(), &["KNOWBOT_AGENT_ENABLE_TRACE"]),
        field("model.base_url", config.model.base_url.clone(), &["KNOWBOT_MODEL_BASE_URL"]),
        field("model.model", config.model.model.clone(), &["KNOWBOT_MODEL_NAME"]),
        field("model.api_key", presence(config.model.api_key.is_some()), &["KNOWBOT_MODEL_API_KEY"]),
        field("model.temperature", config.model.temperature.to_string(), &["KNOWBOT_MODEL_TEMPERATURE"]),
        field("model.max_tokens", config.model.max_tokens.to_string(), &["KNOWBOT_MODEL_MAX_TOKENS"]),
        field("knowledge_bases.ids", knowledge_base_ids, &["KNOWBOT_KNOWLEDGE_BASE_IDS"]),
        field(
            "streaming.interactive_update_ms",
            config.streaming.interactive_update_ms.to_string(),
            &["KNOWBOT_STREAMING_INTERACTIVE_UPDATE_MS"],
        ),
        field(
            "streaming.background_update_ms",
            config.streaming.background_update_ms.to_string(),
            &["KNOWBOT_STREAMING_BACKGROUND_UPDATE_MS"],
        ),
        field("server.bind_address", config.server.bind_address.clone(), &["KNOWBOT_SERVER_BIND_ADDRESS"]),
        field("server.events_port", config.server.events_port.to_string(), &["KNOWBOT_SERVER_EVENTS_PORT"]),
        field("server.events_path", config.server.events_path.clone(), &["KNOWBOT_SERVER_EVENTS_PATH"]),
        field(
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["KNOWBOT_SERVER_HEALTH_CHECK_PORT"],
        ),
        field("logging.level", config.logging.level.clone(), &["KNOWBOT_LOGGING_LEVEL", "KNOWBOT_LOG_LEVEL"]),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["KNOWBOT_LOGGING_FORMAT", "KNOWBOT_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_owned()];
    lines.extend(
        fields
            .into_iter()
            .map(|(key, value, env_keys)| render_line(key, &value, sources.source_of(key, env_keys))),
    );

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("knowbot.toml"), PathBuf::from("config/knowbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

struct SourceResolver<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

impl SourceResolver<'_> {
    fn source_of(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|env_key| env::var_os(env_key).is_some()) {
            return format!("env ({env_key})");
        }

        if self.doc.is_some_and(|doc| contains_path(doc, key_path)) {
            let file_path =
                self.path.map(|path| path.display().to_string()).unwrap_or_else(|| "config file".to_owned());
            return format!("file ({file_path})");
        }

        "default".to_owned()
    }
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

type Field = (&'static str, String, &'static [&'static str]);

fn field(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Field {
    (key, value, env_keys)
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn or_unset(value: &str) -> String {
    if value.trim().is_empty() {
        "<unset>".to_owned()
    } else {
        value.to_owned()
    }
}

fn presence(is_set: bool) -> String {
    let marker = if is_set { "<redacted>" } else { "<unset>" };
    marker.to_owned()
}

fn redact_optional(token: Option<&SecretString>) -> String {
    token.map(|token| redact_token(token.expose_secret())).unwrap_or_else(|| "<unset>".to_owned())
}

/// Keeps only the Slack token-type prefix, e.g. `xoxb-***`.
pub fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_owned();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_owned()
}
