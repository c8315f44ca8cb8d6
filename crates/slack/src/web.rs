use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use knowbot_core::surface::{MessageRef, MessagingSurface, SurfaceError};

pub const SLACK_API_BASE_URL: &str = "https://slack.com/api";
/// Slack rejects `text` longer than this.
pub const MAX_MESSAGE_CHARS: usize = 40_000;

const TRUNCATION_SUFFIX: &str = "\n…(truncated)";

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct UpdateMessageRequest<'a> {
    channel: &'a str,
    ts: &'a str,
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthIdentity {
    pub user_id: String,
    pub team: Option<String>,
}

/// Bot-token Web API client. Implements the outbound chat surface.
#[derive(Clone)]
pub struct SlackWebClient {
    client: reqwest::Client,
    base_url: String,
    bot_token: SecretString,
}

impl SlackWebClient {
    pub fn new(bot_token: SecretString) -> Result<Self, SurfaceError> {
        Self::with_base_url(bot_token, SLACK_API_BASE_URL)
    }

    pub fn with_base_url(bot_token: SecretString, base_url: impl Into<String>) -> Result<Self, SurfaceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|error| SurfaceError::Transport(error.to_string()))?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_owned(), bot_token })
    }

    /// Resolves the bot's own user id, used to drop echoes and recognise reactions on answers.
    pub async fn auth_test(&self) -> Result<AuthIdentity, SurfaceError> {
        let response = self.call("auth.test", &serde_json::json!({})).await?;
        let user_id = response
            .user_id
            .ok_or_else(|| SurfaceError::Protocol("auth.test response has no user_id".to_owned()))?;
        Ok(AuthIdentity { user_id, team: response.team })
    }

    /// Opens a Socket Mode session and returns its websocket url. Needs the app-level token.
    pub async fn open_socket_connection(&self, app_token: &SecretString) -> Result<String, SurfaceError> {
        let response = self.call_with_token("apps.connections.open", app_token, &serde_json::json!({})).await?;
        response
            .url
            .ok_or_else(|| SurfaceError::Protocol("apps.connections.open response has no url".to_owned()))
    }

    async fn call<B>(&self, method: &str, body: &B) -> Result<ApiResponse, SurfaceError>
    where
        B: Serialize + ?Sized,
    {
        self.call_with_token(method, &self.bot_token, body).await
    }

    async fn call_with_token<B>(&self, method: &str, token: &SecretString, body: &B) -> Result<ApiResponse, SurfaceError>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|error| SurfaceError::Transport(format!("{method}: {error}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| SurfaceError::Transport(format!("{method}: {error}")))?;
        if !status.is_success() {
            return Err(SurfaceError::Api { method: method.to_owned(), error: format!("http {}", status.as_u16()) });
        }

        parse_api_response(method, &bytes)
    }
}

impl std::fmt::Debug for SlackWebClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackWebClient")
            .field("base_url", &self.base_url)
            .field("bot_token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl MessagingSurface for SlackWebClient {
    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<MessageRef, SurfaceError> {
        let text = truncate_for_slack(text);
        let response = self
            .call("chat.postMessage", &PostMessageRequest { channel: channel_id, text: &text, thread_ts })
            .await?;

        let ts = response
            .ts
            .ok_or_else(|| SurfaceError::Protocol("chat.postMessage response has no ts".to_owned()))?;
        Ok(MessageRef::new(response.channel.unwrap_or_else(|| channel_id.to_owned()), ts))
    }

    async fn update_message(
        &self,
        channel_id: &str,
        message: &MessageRef,
        text: &str,
    ) -> Result<(), SurfaceError> {
        let text = truncate_for_slack(text);
        self.call("chat.update", &UpdateMessageRequest { channel: channel_id, ts: &message.ts, text: &text })
            .await
            .map(|_| ())
    }
}

fn parse_api_response(method: &str, bytes: &[u8]) -> Result<ApiResponse, SurfaceError> {
    let response: ApiResponse = serde_json::from_slice(bytes)
        .map_err(|error| SurfaceError::Protocol(format!("{method}: {error}")))?;
    if !response.ok {
        return Err(SurfaceError::Api {
            method: method.to_owned(),
            error: response.error.unwrap_or_else(|| "unknown_error".to_owned()),
        });
    }
    Ok(response)
}

/// Cuts on a char boundary so the result, suffix included, fits the API limit.
pub fn truncate_for_slack(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_owned();
    }

    let keep = MAX_MESSAGE_CHARS - TRUNCATION_SUFFIX.chars().count();
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_SUFFIX);
    truncated
}
