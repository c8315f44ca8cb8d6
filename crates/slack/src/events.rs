use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use knowbot_agent::runtime::Cadence;
use knowbot_agent::selector::DispatchMode;
use knowbot_core::config::KnowledgeBaseConfig;
use knowbot_core::domain::query::Query;
use knowbot_core::surface::{MessageRef, MessagingSurface, SurfaceError};

use crate::{
    blocks::{self, MessageTemplate},
    commands::{Intent, IntentRouter},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    Message(MessageEvent),
    AppMention(MessageEvent),
    MemberJoined(MemberJoinedEvent),
    ReactionAdded(ReactionAddedEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::Message(_) => SlackEventType::Message,
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::MemberJoined(_) => SlackEventType::MemberJoined,
            Self::ReactionAdded(_) => SlackEventType::ReactionAdded,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    /// Messages posted by bots (including this one) and edit/join subtypes never reach a handler.
    pub fn is_self_generated(&self) -> bool {
        match self {
            Self::Message(message) | Self::AppMention(message) => {
                message.bot_id.is_some() || message.subtype.is_some()
            }
            _ => false,
        }
    }

    /// Channel and thread a `Responded` template is posted to.
    pub fn reply_target(&self) -> Option<(&str, Option<&str>)> {
        match self {
            Self::AppMention(message) => Some((message.channel_id.as_str(), Some(message.reply_thread_ts()))),
            Self::Message(message) => Some((message.channel_id.as_str(), message.thread_ts.as_deref())),
            Self::MemberJoined(event) => Some((event.channel_id.as_str(), None)),
            Self::ReactionAdded(event) => Some((event.channel_id.as_str(), Some(event.message_ts.as_str()))),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    Message,
    AppMention,
    MemberJoined,
    ReactionAdded,
    Unsupported,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub channel_type: Option<String>,
    pub subtype: Option<String>,
    pub bot_id: Option<String>,
}

impl MessageEvent {
    pub fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    pub fn is_direct_message(&self) -> bool {
        self.channel_type.as_deref() == Some("im")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberJoinedEvent {
    pub channel_id: String,
    pub user_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionAddedEvent {
    pub channel_id: String,
    pub message_ts: String,
    pub reactor_user_id: String,
    pub reaction: String,
    pub item_user_id: Option<String>,
}

/// Outer Events API payload.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallbackPayload {
    UrlVerification { challenge: String },
    EventCallback { event_id: String, event: ApiEvent },
    #[serde(other)]
    Other,
}

/// Inner `event` object as Slack sends it. Only the fields the handlers read are kept.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ApiEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub reaction: Option<String>,
    #[serde(default)]
    pub item: Option<ApiReactionItem>,
    #[serde(default)]
    pub item_user: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ApiReactionItem {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}

impl ApiEvent {
    pub fn into_event(self) -> SlackEvent {
        match self.kind.as_str() {
            "message" | "app_mention" => {
                let message = MessageEvent {
                    channel_id: self.channel.unwrap_or_default(),
                    user_id: self.user.unwrap_or_default(),
                    text: self.text.unwrap_or_default(),
                    ts: self.ts.unwrap_or_default(),
                    thread_ts: self.thread_ts,
                    channel_type: self.channel_type,
                    subtype: self.subtype,
                    bot_id: self.bot_id,
                };
                if self.kind == "app_mention" {
                    SlackEvent::AppMention(message)
                } else {
                    SlackEvent::Message(message)
                }
            }
            "member_joined_channel" => SlackEvent::MemberJoined(MemberJoinedEvent {
                channel_id: self.channel.unwrap_or_default(),
                user_id: self.user.unwrap_or_default(),
            }),
            "reaction_added" => {
                let item = self.item.unwrap_or_default();
                SlackEvent::ReactionAdded(ReactionAddedEvent {
                    channel_id: item.channel.unwrap_or_default(),
                    message_ts: item.ts.unwrap_or_default(),
                    reactor_user_id: self.user.unwrap_or_default(),
                    reaction: self.reaction.unwrap_or_default(),
                    item_user_id: self.item_user,
                })
            }
            _ => SlackEvent::Unsupported { event_type: self.kind },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
    pub bot_user_id: Option<String>,
    pub cadence: Cadence,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned(), bot_user_id: None, cadence: Cadence::default() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(MessageTemplate),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("question handler failure: {0}")]
    Question(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        if envelope.event.is_self_generated() {
            return Ok(HandlerResult::Ignored);
        }
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Registers every handler against one shared question service.
pub fn dispatcher_with<S>(service: Arc<S>) -> EventDispatcher
where
    S: QuestionService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(AppMentionHandler::new(service.clone()));
    dispatcher.register(DirectMessageHandler::new(service));
    dispatcher.register(MemberJoinedHandler);
    dispatcher.register(ReactionAddedHandler);
    dispatcher
}

pub fn default_dispatcher() -> EventDispatcher {
    dispatcher_with(Arc::new(NoopQuestionService::default()))
}

/// Posts a `Responded` template where the originating event expects its reply.
pub async fn deliver(
    surface: &dyn MessagingSurface,
    event: &SlackEvent,
    result: &HandlerResult,
) -> Result<Option<MessageRef>, SurfaceError> {
    let HandlerResult::Responded(template) = result else {
        return Ok(None);
    };
    let Some((channel_id, thread_ts)) = event.reply_target() else {
        return Ok(None);
    };

    surface.post_message(channel_id, &template.render_text(), thread_ts).await.map(Some)
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuestionRequest {
    pub query: Query,
    pub mode: DispatchMode,
    pub thread_ts: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceStatus {
    pub agent_configured: bool,
    pub model: String,
    pub knowledge_base_count: usize,
}

/// Answers routed questions. Returning `None` means the service already posted its own reply.
#[async_trait]
pub trait QuestionService: Send + Sync {
    async fn answer(
        &self,
        request: &QuestionRequest,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError>;

    fn status(&self) -> ServiceStatus;

    fn knowledge_bases(&self) -> &KnowledgeBaseConfig;
}

#[derive(Default)]
pub struct NoopQuestionService {
    knowledge_bases: KnowledgeBaseConfig,
}

#[async_trait]
impl QuestionService for NoopQuestionService {
    async fn answer(
        &self,
        _request: &QuestionRequest,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError> {
        Ok(Some(blocks::error_message("No answering backend is connected yet.", &ctx.correlation_id)))
    }

    fn status(&self) -> ServiceStatus {
        ServiceStatus { agent_configured: false, model: "none".to_owned(), knowledge_base_count: 0 }
    }

    fn knowledge_bases(&self) -> &KnowledgeBaseConfig {
        &self.knowledge_bases
    }
}

async fn respond_to_message<S>(
    router: &IntentRouter,
    service: &S,
    message: &MessageEvent,
    thread_ts: Option<String>,
    ctx: &EventContext,
) -> Result<HandlerResult, EventHandlerError>
where
    S: QuestionService + ?Sized,
{
    let intent = router.route(&message.text);
    tracing::info!(
        event_name = "slack.events.intent_routed",
        correlation_id = %ctx.correlation_id,
        channel_id = %message.channel_id,
        user_id = %message.user_id,
        intent = intent.label(),
        "routed inbound message"
    );

    let template = match intent {
        Intent::Greeting => blocks::greeting_message(&message.user_id),
        Intent::Help => blocks::help_message(),
        Intent::Thanks => blocks::thanks_message(),
        Intent::Status => {
            let status = service.status();
            blocks::status_message(status.agent_configured, &status.model, status.knowledge_base_count)
        }
        Intent::Info => blocks::knowledge_base_info_message(service.knowledge_bases()),
        Intent::EmptyQuestion => blocks::empty_question_message(),
        Intent::Ask { question, knowledge_base_id, mode } => {
            let mut query = Query::new(question, message.user_id.clone(), message.channel_id.clone());
            query.knowledge_base_id = knowledge_base_id;
            let request = QuestionRequest { query, mode, thread_ts };
            return Ok(match service.answer(&request, ctx).await? {
                Some(template) => HandlerResult::Responded(template),
                None => HandlerResult::Processed,
            });
        }
    };

    Ok(HandlerResult::Responded(template))
}

pub struct AppMentionHandler<S> {
    router: IntentRouter,
    service: Arc<S>,
}

impl<S> AppMentionHandler<S>
where
    S: QuestionService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { router: IntentRouter::new(), service }
    }
}

#[async_trait]
impl<S> EventHandler for AppMentionHandler<S>
where
    S: QuestionService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AppMention
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::AppMention(message) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let thread_ts = Some(message.reply_thread_ts().to_owned());
        respond_to_message(&self.router, self.service.as_ref(), message, thread_ts, ctx).await
    }
}

/// Plain `message` events. Only direct messages are answered; channel chatter needs a mention.
pub struct DirectMessageHandler<S> {
    router: IntentRouter,
    service: Arc<S>,
}

impl<S> DirectMessageHandler<S>
where
    S: QuestionService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { router: IntentRouter::new(), service }
    }
}

#[async_trait]
impl<S> EventHandler for DirectMessageHandler<S>
where
    S: QuestionService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::Message
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::Message(message) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if !message.is_direct_message() {
            return Ok(HandlerResult::Ignored);
        }
        if ctx.bot_user_id.as_deref() == Some(message.user_id.as_str()) {
            return Ok(HandlerResult::Ignored);
        }

        respond_to_message(&self.router, self.service.as_ref(), message, message.thread_ts.clone(), ctx).await
    }
}

pub struct MemberJoinedHandler;

#[async_trait]
impl EventHandler for MemberJoinedHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::MemberJoined
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::MemberJoined(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if ctx.bot_user_id.as_deref() == Some(event.user_id.as_str()) {
            return Ok(HandlerResult::Processed);
        }

        Ok(HandlerResult::Responded(blocks::welcome_message(&event.user_id)))
    }
}

/// Thumbs up/down on the bot's own answers are acknowledged; everything else is a no-op.
pub struct ReactionAddedHandler;

#[async_trait]
impl EventHandler for ReactionAddedHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::ReactionAdded
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::ReactionAdded(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let on_bot_message = matches!(
            (ctx.bot_user_id.as_deref(), event.item_user_id.as_deref()),
            (Some(bot), Some(author)) if bot == author
        );
        let Some(positive) = feedback_polarity(&event.reaction).filter(|_| on_bot_message) else {
            return Ok(HandlerResult::Processed);
        };

        tracing::info!(
            event_name = "slack.events.feedback",
            correlation_id = %ctx.correlation_id,
            channel_id = %event.channel_id,
            user_id = %event.reactor_user_id,
            positive,
            "answer feedback received"
        );
        Ok(HandlerResult::Responded(blocks::feedback_message(positive)))
    }
}

fn feedback_polarity(reaction: &str) -> Option<bool> {
    match normalize_reaction_token(reaction).as_str() {
        "+1" | "thumbsup" | "👍" => Some(true),
        "-1" | "thumbsdown" | "👎" => Some(false),
        _ => None,
    }
}

fn normalize_reaction_token(reaction: &str) -> String {
    reaction.trim().trim_matches(':').to_ascii_lowercase()
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use knowbot_core::config::KnowledgeBaseConfig;
    use knowbot_core::surface::{MessageRef, MessagingSurface, SurfaceError};

    use super::{EventContext, EventHandlerError, QuestionRequest, QuestionService, ServiceStatus};
    use crate::blocks::{self, MessageTemplate};

    #[derive(Default)]
    pub(crate) struct RecordingQuestionService {
        pub(crate) requests: Mutex<Vec<QuestionRequest>>,
        pub(crate) knowledge_bases: KnowledgeBaseConfig,
    }

    #[async_trait]
    impl QuestionService for RecordingQuestionService {
        async fn answer(
            &self,
            request: &QuestionRequest,
            _ctx: &EventContext,
        ) -> Result<Option<MessageTemplate>, EventHandlerError> {
            self.requests.lock().await.push(request.clone());
            Ok(Some(blocks::MessageBuilder::new(format!("answer: {}", request.query.question_text)).build()))
        }

        fn status(&self) -> ServiceStatus {
            ServiceStatus { agent_configured: true, model: "test-model".to_owned(), knowledge_base_count: 2 }
        }

        fn knowledge_bases(&self) -> &KnowledgeBaseConfig {
            &self.knowledge_bases
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct PostedMessage {
        pub(crate) channel_id: String,
        pub(crate) text: String,
        pub(crate) thread_ts: Option<String>,
    }

    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub(crate) posts: Mutex<Vec<PostedMessage>>,
    }

    #[async_trait]
    impl MessagingSurface for RecordingSurface {
        async fn post_message(
            &self,
            channel_id: &str,
            text: &str,
            thread_ts: Option<&str>,
        ) -> Result<MessageRef, SurfaceError> {
            let mut posts = self.posts.lock().await;
            posts.push(PostedMessage {
                channel_id: channel_id.to_owned(),
                text: text.to_owned(),
                thread_ts: thread_ts.map(str::to_owned),
            });
            Ok(MessageRef::new(channel_id, format!("{}.000", posts.len())))
        }

        async fn update_message(
            &self,
            _channel_id: &str,
            _message: &MessageRef,
            _text: &str,
        ) -> Result<(), SurfaceError> {
            Ok(())
        }
    }
}
