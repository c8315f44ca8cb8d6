use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use knowbot_agent::runtime::Cadence;
use knowbot_core::surface::MessagingSurface;
use knowbot_slack::events::{deliver, CallbackPayload, EventContext, EventDispatcher, SlackEnvelope};
use knowbot_slack::signature::{SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};

const RETRY_HEADER: &str = "X-Slack-Retry-Num";

#[derive(Clone)]
pub struct EventsState {
    pub dispatcher: Arc<EventDispatcher>,
    pub surface: Arc<dyn MessagingSurface>,
    pub verifier: Option<SignatureVerifier>,
    pub bot_user_id: Option<String>,
}

pub fn router(events_path: &str, state: EventsState) -> Router {
    Router::new().route(events_path, post(handle_events)).with_state(state)
}

async fn handle_events(State(state): State<EventsState>, headers: HeaderMap, body: Bytes) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Some(verifier) = &state.verifier {
        let timestamp = header_str(&headers, TIMESTAMP_HEADER);
        let signature = header_str(&headers, SIGNATURE_HEADER);
        if let Err(rejection) = verifier.verify(timestamp, signature, &body, Utc::now().timestamp()) {
            warn!(
                event_name = "ingress.events.signature_rejected",
                correlation_id = %correlation_id,
                error = %rejection,
                "rejected events api request"
            );
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let payload: CallbackPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(parse_error) => {
            warn!(
                event_name = "ingress.events.bad_payload",
                correlation_id = %correlation_id,
                error = %parse_error,
                "events api body is not a callback payload"
            );
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let (event_id, api_event) = match payload {
        CallbackPayload::UrlVerification { challenge } => {
            return Json(json!({ "challenge": challenge })).into_response();
        }
        CallbackPayload::Other => return StatusCode::OK.into_response(),
        CallbackPayload::EventCallback { event_id, event } => (event_id, event),
    };

    if let Some(retry) = header_str(&headers, RETRY_HEADER) {
        debug!(
            event_name = "ingress.events.retry_ignored",
            correlation_id = %correlation_id,
            event_id = %event_id,
            retry,
            "ignoring slack delivery retry"
        );
        return StatusCode::OK.into_response();
    }

    let envelope = SlackEnvelope { envelope_id: event_id, event: api_event.into_event() };
    if envelope.event.is_self_generated() {
        return StatusCode::OK.into_response();
    }

    info!(
        event_name = "ingress.events.envelope_received",
        correlation_id = %correlation_id,
        envelope_id = %envelope.envelope_id,
        event_type = ?envelope.event.event_type(),
        "received slack event"
    );

    // Slack already has its 200 by the time the answer streams.
    let context = EventContext { correlation_id, bot_user_id: state.bot_user_id.clone(), cadence: Cadence::Background };
    tokio::spawn(dispatch_and_reply(state, envelope, context));

    StatusCode::OK.into_response()
}

async fn dispatch_and_reply(state: EventsState, envelope: SlackEnvelope, context: EventContext) {
    let result = match state.dispatcher.dispatch(&envelope, &context).await {
        Ok(result) => result,
        Err(dispatch_error) => {
            warn!(
                event_name = "ingress.events.dispatch_failed",
                correlation_id = %context.correlation_id,
                envelope_id = %envelope.envelope_id,
                error = %dispatch_error,
                "event dispatch failed"
            );
            return;
        }
    };

    if let Err(surface_error) = deliver(state.surface.as_ref(), &envelope.event, &result).await {
        warn!(
            event_name = "ingress.events.reply_failed",
            correlation_id = %context.correlation_id,
            error = %surface_error,
            "failed to post handler reply"
        );
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use chrono::Utc;
    use secrecy::SecretString;
    use serde_json::json;
    use tower::ServiceExt;

    use async_trait::async_trait;
    use knowbot_agent::runtime::Cadence;
    use knowbot_core::config::KnowledgeBaseConfig;
    use knowbot_slack::blocks::MessageTemplate;
    use knowbot_slack::events::{
        default_dispatcher, dispatcher_with, EventContext, EventHandlerError, QuestionRequest, QuestionService,
        ServiceStatus,
    };
    use knowbot_slack::signature::SignatureVerifier;
    use tokio::sync::Mutex;

    use super::{router, EventsState};
    use crate::services::testing::{RecordingSurface, SurfaceCall};

    #[derive(Default)]
    struct CadenceRecorder {
        seen: Mutex<Vec<Cadence>>,
        knowledge_bases: KnowledgeBaseConfig,
    }

    #[async_trait]
    impl QuestionService for CadenceRecorder {
        async fn answer(
            &self,
            _request: &QuestionRequest,
            ctx: &EventContext,
        ) -> Result<Option<MessageTemplate>, EventHandlerError> {
            self.seen.lock().await.push(ctx.cadence);
            Ok(None)
        }

        fn status(&self) -> ServiceStatus {
            ServiceStatus { agent_configured: false, model: "test-model".to_owned(), knowledge_base_count: 0 }
        }

        fn knowledge_bases(&self) -> &KnowledgeBaseConfig {
            &self.knowledge_bases
        }
    }

    fn app(surface: Arc<RecordingSurface>, verifier: Option<SignatureVerifier>) -> Router {
        router(
            "/slack/events",
            EventsState {
                dispatcher: Arc::new(default_dispatcher()),
                surface,
                verifier,
                bot_user_id: Some("UBOT".to_owned()),
            },
        )
    }

    fn json_post() -> axum::http::request::Builder {
        Request::builder().method("POST").uri("/slack/events").header("Content-Type", "application/json")
    }

    fn mention(text: &str) -> serde_json::Value {
        json!({
            "type": "event_callback",
            "event_id": "Ev1",
            "event": {"type": "app_mention", "channel": "C1", "user": "U1", "text": text, "ts": "1.5"}
        })
    }

    async fn wait_for_calls(surface: &RecordingSurface, count: usize) -> Vec<SurfaceCall> {
        for _ in 0..50 {
            let calls = surface.calls().await;
            if calls.len() >= count {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        surface.calls().await
    }

    #[tokio::test]
    async fn answers_url_verification_challenge() {
        let body = json!({"type": "url_verification", "challenge": "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P"});
        let request = json_post().body(Body::from(body.to_string())).expect("request");

        let response = app(Arc::new(RecordingSurface::default()), None).oneshot(request).await.expect("router call");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), 1_048_576).await.expect("body");
        let payload: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(payload["challenge"], body["challenge"]);
    }

    #[tokio::test]
    async fn mention_is_acknowledged_then_answered_in_thread() {
        let surface = Arc::new(RecordingSurface::default());
        let body = mention("<@UBOT> hello");
        let request = json_post().body(Body::from(body.to_string())).expect("request");

        let response = app(surface.clone(), None).oneshot(request).await.expect("router call");
        assert_eq!(response.status(), StatusCode::OK);

        let calls = wait_for_calls(&surface, 1).await;
        assert!(matches!(
            calls.first(),
            Some(SurfaceCall::Post { channel_id, thread_ts, text })
                if channel_id == "C1" && thread_ts.as_deref() == Some("1.5") && text.contains("<@U1>")
        ));
    }

    #[tokio::test]
    async fn acknowledged_questions_stream_at_background_cadence() {
        let service = Arc::new(CadenceRecorder::default());
        let app = router(
            "/slack/events",
            EventsState {
                dispatcher: Arc::new(dispatcher_with(service.clone())),
                surface: Arc::new(RecordingSurface::default()),
                verifier: None,
                bot_user_id: Some("UBOT".to_owned()),
            },
        );
        let request =
            json_post().body(Body::from(mention("<@UBOT> what is the vpn address?").to_string())).expect("request");

        assert_eq!(app.oneshot(request).await.expect("router call").status(), StatusCode::OK);

        for _ in 0..50 {
            if !service.seen.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*service.seen.lock().await, vec![Cadence::Background]);
    }

    #[tokio::test]
    async fn retries_and_bot_messages_are_acknowledged_without_dispatch() {
        let surface = Arc::new(RecordingSurface::default());
        let body = mention("hello");
        let retry = json_post().header("X-Slack-Retry-Num", "1").body(Body::from(body.to_string())).expect("request");
        let bot_body = json!({
            "type": "event_callback",
            "event_id": "Ev2",
            "event": {"type": "message", "channel": "D1", "channel_type": "im", "bot_id": "B1", "text": "hi", "ts": "2.0"}
        });
        let bot = json_post().body(Body::from(bot_body.to_string())).expect("request");

        let app = app(surface.clone(), None);
        assert_eq!(app.clone().oneshot(retry).await.expect("router call").status(), StatusCode::OK);
        assert_eq!(app.oneshot(bot).await.expect("router call").status(), StatusCode::OK);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(surface.calls().await.is_empty());
    }

    #[tokio::test]
    async fn unsigned_requests_are_rejected_when_secret_configured() {
        let verifier = SignatureVerifier::new(SecretString::from("signing-secret".to_owned()));
        let body = mention("hello").to_string();
        let timestamp = Utc::now().timestamp().to_string();
        let signature = verifier.sign(&timestamp, body.as_bytes()).expect("sign");
        let app = app(Arc::new(RecordingSurface::default()), Some(verifier));

        let unsigned = Request::builder().method("POST").uri("/slack/events").body(Body::from(body.clone())).expect("request");
        assert_eq!(app.clone().oneshot(unsigned).await.expect("router call").status(), StatusCode::UNAUTHORIZED);

        let signed = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("X-Slack-Request-Timestamp", timestamp)
            .header("X-Slack-Signature", signature)
            .body(Body::from(body))
            .expect("request");
        assert_eq!(app.oneshot(signed).await.expect("router call").status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let request = Request::builder().method("POST").uri("/slack/events").body(Body::from("not json")).expect("request");

        let response = app(Arc::new(RecordingSurface::default()), None).oneshot(request).await.expect("router call");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
