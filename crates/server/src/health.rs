use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone, Debug)]
pub struct HealthState {
    pub agent_configured: bool,
    pub model_name: String,
    pub model_base_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub agent: HealthCheck,
    pub model: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let model = model_check(&state);
    let ready = model.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck { status: "ready", detail: "knowbot-server runtime initialized".to_owned() },
        agent: agent_check(&state),
        model,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn agent_check(state: &HealthState) -> HealthCheck {
    if state.agent_configured {
        HealthCheck { status: "ready", detail: "agent backend configured".to_owned() }
    } else {
        HealthCheck { status: "not_configured", detail: "answers come from the direct model".to_owned() }
    }
}

fn model_check(state: &HealthState) -> HealthCheck {
    if state.model_base_url.trim().is_empty() {
        return HealthCheck { status: "degraded", detail: "model.base_url is not set".to_owned() };
    }
    HealthCheck { status: "ready", detail: format!("{} via {}", state.model_name, state.model_base_url) }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        extract::State,
        http::{Request, StatusCode},
        Json,
    };
    use tower::ServiceExt;

    use crate::health::{health, router, HealthState};

    fn state(agent_configured: bool, model_base_url: &str) -> HealthState {
        HealthState {
            agent_configured,
            model_name: "llama3.1".to_owned(),
            model_base_url: model_base_url.to_owned(),
        }
    }

    #[tokio::test]
    async fn unconfigured_agent_is_reported_but_not_degraded() {
        let (status, Json(payload)) = health(State(state(false, "http://localhost:11434/v1"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.agent.status, "not_configured");
        assert_eq!(payload.model.status, "ready");
    }

    #[tokio::test]
    async fn missing_model_endpoint_is_service_unavailable() {
        let (status, Json(payload)) = health(State(state(true, ""))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.agent.status, "ready");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn router_serves_json_at_health_path() {
        let request = Request::builder().uri("/health").body(Body::empty()).expect("request");

        let response = router(state(true, "http://model")).oneshot(request).await.expect("router call");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), 65_536).await.expect("body");
        let payload: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(payload["model"]["detail"], "llama3.1 via http://model");
        assert!(payload["checked_at"].is_string());
    }
}
