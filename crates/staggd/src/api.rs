use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::CommandError;
use crate::engine::Engine;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    entities: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

/// Errors surfaced to API clients
#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Command(CommandError),
}

impl From<CommandError> for ApiError {
    fn from(e: CommandError) -> Self {
        ApiError::Command(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::NotFound(entity_id) => {
                (StatusCode::NOT_FOUND, format!("no entity '{}'", entity_id))
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Command(e) => {
                let status = match e {
                    CommandError::UnknownEntity(_) => StatusCode::NOT_FOUND,
                    CommandError::WrongPlatform { .. } | CommandError::ServiceCall(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    CommandError::IntegrationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, e.to_string())
            }
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            entities: state.engine.entities().len(),
        }),
    )
}

/// Handler for GET /v1/state
#[tracing::instrument(skip(state))]
async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.state_snapshot();
    Json(snapshot.as_ref().clone())
}

/// Handler for GET /v1/entities
#[tracing::instrument(skip(state))]
async fn entities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.entities())
}

/// Handler for GET /v1/entities/:entity_id
#[tracing::instrument(skip(state))]
async fn entity(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine
        .entity(&entity_id)
        .map(Json)
        .ok_or(ApiError::NotFound(entity_id))
}

/// Handler for GET /v1/devices
#[tracing::instrument(skip(state))]
async fn devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.devices())
}

/// Handler for POST /v1/services/:domain/:service
///
/// Commands are queued for the owning integration; the response does not wait
/// for the kettle.
#[tracing::instrument(skip(state, payload))]
async fn call_service(
    State(state): State<Arc<AppState>>,
    Path((domain, service)): Path<(String, String)>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(data) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    tracing::debug!("Calling {}.{} with {}", domain, service, data);
    state.engine.call_service(&domain, &service, &data)?;
    Ok(StatusCode::ACCEPTED)
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/state", get(full_state))
        .route("/v1/entities", get(entities))
        .route("/v1/entities/:entity_id", get(entity))
        .route("/v1/devices", get(devices))
        .route("/v1/services/:domain/:service", post(call_service))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    engine: Arc<Engine>,
    listen: String,
    port: u16,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, engine });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port)
        .parse()
        .with_context(|| format!("invalid API address {}:{}", listen, port))?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::EntityDescriptor;
    use crate::engine::EntityState;
    use crate::engine::Event;
    use crate::engine::FromIntegrationMessage;
    use crate::engine::FromIntegrationSender;
    use crate::engine::Integration;
    use crate::engine::Platform;
    use crate::engine::ToIntegrationMessage;
    use crate::engine::state::ClimateState;
    use crate::engine::state::HvacAction;
    use crate::engine::state::HvacMode;
    use crate::engine::TemperatureUnit;

    /// Announces one kettle climate entity and forwards commands to the test
    struct FakeKettle {
        commands: mpsc::UnboundedSender<ToIntegrationMessage>,
    }

    #[async_trait]
    impl Integration for FakeKettle {
        fn name(&self) -> &str {
            "kitchen"
        }

        async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
            let messages = [
                FromIntegrationMessage::EntityDiscovered {
                    entity_id: "climate.kitchen".to_string(),
                    integration_name: "kitchen".to_string(),
                    descriptor: EntityDescriptor {
                        unique_id: "24:DC:C3:2D:25:B2_climate".to_string(),
                        name: "Kettle".to_string(),
                        platform: Platform::Climate,
                        device_class: None,
                        icon: None,
                        device: None,
                    },
                },
                FromIntegrationMessage::StateChanged {
                    entity_id: "climate.kitchen".to_string(),
                    state: EntityState::Climate(ClimateState {
                        available: true,
                        hvac_mode: Some(HvacMode::Heat),
                        hvac_action: Some(HvacAction::Heating),
                        current_temperature: Some(150.0),
                        target_temperature: Some(205.0),
                        min_temp: 104.0,
                        max_temp: 212.0,
                        target_temperature_step: 1.0,
                        temperature_unit: TemperatureUnit::Fahrenheit,
                    }),
                },
            ];
            for msg in messages {
                tx.send(msg)
                    .await
                    .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;
            }
            Ok(())
        }

        async fn handle_message(
            &mut self,
            msg: ToIntegrationMessage,
        ) -> Result<(), Box<dyn Error + Send>> {
            let _ = self.commands.send(msg);
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
            Ok(())
        }
    }

    async fn router() -> (Router, Arc<Engine>, mpsc::UnboundedReceiver<ToIntegrationMessage>) {
        let engine = Arc::new(Engine::new());
        let mut events = engine.subscribe();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        engine.register_integration(Box::new(FakeKettle { commands }));

        let runner = engine.clone();
        tokio::spawn(async move { runner.run().await });

        // Wait until the state has landed
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let Event::StateChanged { .. } = event {
                break;
            }
        }

        let state = Arc::new(AppState {
            version: "test",
            engine: engine.clone(),
        });
        (create_router(state), engine, commands_rx)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> StatusCode {
        app.oneshot(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
    }

    #[tokio::test]
    async fn test_ping() {
        let (app, _engine, _commands) = router().await;
        let (status, body) = get_json(app, "/v1/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_entity_lookup() {
        let (app, _engine, _commands) = router().await;

        let (status, body) = get_json(app.clone(), "/v1/entities/climate.kitchen").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({
                "entity_id": "climate.kitchen",
                "integration": "kitchen",
                "unique_id": "24:DC:C3:2D:25:B2_climate",
                "name": "Kettle",
                "platform": "climate",
                "state": {
                    "platform": "climate",
                    "state": {
                        "available": true,
                        "hvac_mode": "heat",
                        "hvac_action": "heating",
                        "current_temperature": 150.0,
                        "target_temperature": 205.0,
                        "min_temp": 104.0,
                        "max_temp": 212.0,
                        "target_temperature_step": 1.0,
                        "temperature_unit": "fahrenheit"
                    }
                }
            })
        );

        let (status, _) = get_json(app, "/v1/entities/climate.nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_state_grouped_by_platform() {
        let (app, _engine, _commands) = router().await;
        let (status, body) = get_json(app, "/v1/state").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["climates"]["climate.kitchen"]["target_temperature"], 205.0);
        assert_eq!(body["switches"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_service_call_routed() {
        let (app, _engine, mut commands) = router().await;

        let status = post_json(
            app,
            "/v1/services/climate/set_temperature",
            serde_json::json!({"entity_id": "climate.kitchen", "temperature": 195}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let received = tokio::time::timeout(Duration::from_secs(5), commands.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            received,
            ToIntegrationMessage::ClimateSetTemperature {
                entity_id: "climate.kitchen".to_string(),
                temperature: 195.0,
            }
        );
    }

    #[tokio::test]
    async fn test_service_call_errors() {
        let (app, _engine, _commands) = router().await;

        let cases = [
            ("/v1/services/climate/set_temperature", serde_json::json!({"entity_id": "climate.nope", "temperature": 1}), StatusCode::NOT_FOUND),
            ("/v1/services/climate/set_temperature", serde_json::json!({"entity_id": "climate.kitchen"}), StatusCode::BAD_REQUEST),
            ("/v1/services/switch/turn_on", serde_json::json!({"entity_id": "climate.kitchen"}), StatusCode::BAD_REQUEST),
            ("/v1/services/climate/explode", serde_json::json!({"entity_id": "climate.kitchen"}), StatusCode::BAD_REQUEST),
        ];
        for (uri, body, expected) in cases {
            assert_eq!(post_json(app.clone(), uri, body.clone()).await, expected, "{uri} {body}");
        }
    }

    #[tokio::test]
    async fn test_malformed_service_body() {
        let (app, _engine, mut commands) = router().await;

        let requests = [
            Request::post("/v1/services/climate/turn_on")
                .body(Body::from(r#"{"entity_id": "climate.kitchen"}"#))
                .unwrap(),
            Request::post("/v1/services/climate/turn_on")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        ];
        for request in requests {
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body: Value = serde_json::from_slice(&body).unwrap();
            assert!(body["error"].is_string(), "{body}");
        }
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stopped_integration_unavailable() {
        let (app, engine, _commands) = router().await;
        engine.shutdown().await;

        let status = post_json(
            app,
            "/v1/services/climate/turn_off",
            serde_json::json!({"entity_id": "climate.kitchen"}),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
