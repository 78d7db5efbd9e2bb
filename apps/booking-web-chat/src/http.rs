//! Endpoints HTTP: `POST /booking-web-chat` e `GET /health`

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common_db::models::BookingState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::any::Any as PanicPayload;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use validator::{Validate, ValidationError};

use crate::built_info;
use crate::dialogue::{BookingEngine, Reply};
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BookingEngine>,
    pub pool: SqlitePool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub clinic_id: String,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub phone: String,
    #[serde(default)]
    pub message: Option<String>,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub state: BookingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_complete: Option<bool>,
}

impl From<Reply> for ChatResponse {
    fn from(reply: Reply) -> Self {
        Self {
            response: reply.text,
            state: reply.state,
            booking_complete: reply.booking_complete.then_some(true),
        }
    }
}

pub fn build_router(state: AppState, max_concurrent_requests: usize) -> Router {
    let routes = Router::new()
        .route("/booking-web-chat", post(booking_web_chat))
        .route("/health", get(health))
        .with_state(state);
    with_layers(routes, max_concurrent_requests)
}

fn with_layers(router: Router, max_concurrent_requests: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(ConcurrencyLimitLayer::new(max_concurrent_requests.max(1)))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Pânico no handler vira 500 com o texto de desculpas
fn panic_response(payload: Box<dyn PanicPayload + Send + 'static>) -> Response {
    let detail = if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "pânico sem mensagem".to_string()
    };
    AppError::Internal(detail).into_response()
}

async fn booking_web_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;

    if let Err(errors) = request.validate() {
        let mut fields: Vec<&str> = errors.field_errors().keys().copied().collect();
        fields.sort_unstable();
        warn!(?fields, "Requisição sem campos obrigatórios");
        return Err(AppError::BadRequest(format!(
            "Campos obrigatórios ausentes: {}",
            fields.join(", ")
        )));
    }

    let reply = state
        .engine
        .handle(
            request.clinic_id.trim(),
            request.phone.trim(),
            request.message.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Json(reply.into()))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "service": built_info::PKG_NAME,
            "version": built_info::PKG_VERSION,
            "database": if database { "ok" } else { "unavailable" },
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use common_db::SessionStore;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    fn app(fixture: &Fixture) -> Router {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 13, 0, 0).unwrap();
        let state = AppState {
            engine: Arc::new(fixture.engine(now)),
            pool: fixture.pool.clone(),
        };
        build_router(state, 8)
    }

    fn chat(body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/booking-web-chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_entry_ping_returns_welcome() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let response = app(&fixture)
            .oneshot(chat(json!({ "clinic_id": "clinica-1", "phone": "5511999990000" })))
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["state"], "WAITING_CPF");
        assert!(body["response"].as_str().unwrap_or_default().contains("**CPF**"));
        assert!(body.get("booking_complete").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_fields_are_bad_request() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;

        let response = app(&fixture)
            .oneshot(chat(json!({ "phone": "5511999990000", "message": "oi" })))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap_or_default().contains("clinic_id"));

        let response = app(&fixture)
            .oneshot(chat(json!({ "clinic_id": "clinica-1", "phone": "" })))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app(&fixture)
            .oneshot(chat(json!({ "clinic_id": " \t ", "phone": "   " })))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Campos obrigatórios ausentes: clinic_id, phone");

        let malformed = Request::builder()
            .method(Method::POST)
            .uri("/booking-web-chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{"))
            .unwrap();
        let response = app(&fixture).oneshot(malformed).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_error_with_fallback() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let router = app(&fixture);
        fixture.pool.close().await;

        let response = router
            .oneshot(chat(json!({ "clinic_id": "clinica-1", "phone": "5511999990000" })))
            .await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["error"].is_string());
        assert!(body["response"].is_string());
        Ok(())
    }

    #[tokio::test]
    async fn test_keys_are_trimmed() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let response = app(&fixture)
            .oneshot(chat(json!({ "clinic_id": " clinica-1 ", "phone": " 5511999990000 " })))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(fixture.sessions.get("clinica-1", "5511999990000").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error_with_fallback() -> anyhow::Result<()> {
        async fn explode() -> &'static str {
            panic!("agenda corrompida")
        }
        let router = with_layers(Router::new().route("/explode", get(explode)), 8);

        let response = router
            .oneshot(Request::builder().uri("/explode").body(Body::empty()).unwrap())
            .await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "internal_error");
        assert_eq!(body["response"], crate::error::GENERIC_APOLOGY);
        Ok(())
    }

    #[tokio::test]
    async fn test_cors_preflight() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let preflight = Request::builder()
            .method(Method::OPTIONS)
            .uri("/booking-web-chat")
            .header(header::ORIGIN, "https://clinica.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = app(&fixture).oneshot(preflight).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).map(|v| v.as_bytes()),
            Some(&b"*"[..])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_health_reports_version_and_database() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let response = app(&fixture)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["version"], built_info::PKG_VERSION);
        assert_eq!(body["database"], "ok");
        Ok(())
    }
}
