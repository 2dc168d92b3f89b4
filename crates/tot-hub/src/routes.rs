use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tot_core::{CommandRequest, ExtractRequest, MindMapReasoner, TitleRequest, UNTITLED};
use tot_transcribe::assemblyai::{request_temporary_token, DEFAULT_API_BASE};
use tracing::{error, info};

pub struct HubState {
    pub reasoner: Arc<dyn MindMapReasoner>,
    pub assemblyai_key: Option<String>,
    pub assemblyai_api_base: String,
    pub http: reqwest::Client,
}

impl HubState {
    pub fn new(reasoner: Arc<dyn MindMapReasoner>, assemblyai_key: Option<String>) -> Self {
        Self {
            reasoner,
            assemblyai_key: assemblyai_key.filter(|key| !key.trim().is_empty()),
            assemblyai_api_base: DEFAULT_API_BASE.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

pub fn router(state: Arc<HubState>) -> Router {
    Router::new()
        .route("/api/extract", post(extract))
        .route("/api/command", post(command))
        .route("/api/title", post(title))
        .route("/api/token", post(token))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

fn failure(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

pub async fn extract(
    State(hub): State<Arc<HubState>>,
    Json(request): Json<ExtractRequest>,
) -> Response {
    match hub.reasoner.extract(&request).await {
        Ok(value) => Json(value).into_response(),
        Err(err) => {
            error!("extract_failed: {err}");
            failure("Extraction failed")
        }
    }
}

pub async fn command(
    State(hub): State<Arc<HubState>>,
    Json(request): Json<CommandRequest>,
) -> Response {
    match hub.reasoner.command(&request).await {
        Ok(value) => Json(value).into_response(),
        Err(err) => {
            error!("command_failed: {err}");
            failure("Command failed")
        }
    }
}

/// Never fails; the caller keeps its title when it sees the placeholder.
pub async fn title(
    State(hub): State<Arc<HubState>>,
    Json(request): Json<TitleRequest>,
) -> Response {
    match hub.reasoner.title(&request).await {
        Ok(value) => Json(value).into_response(),
        Err(err) => {
            error!("title_failed: {err}");
            Json(json!({ "title": UNTITLED })).into_response()
        }
    }
}

pub async fn token(State(hub): State<Arc<HubState>>) -> Response {
    let Some(key) = hub.assemblyai_key.as_deref() else {
        return failure("ASSEMBLYAI_API_KEY is not configured");
    };
    match request_temporary_token(&hub.http, &hub.assemblyai_api_base, key).await {
        Ok(token) => {
            info!("token_issued");
            Json(json!({ "token": token })).into_response()
        }
        Err(err) => {
            error!("token_failed: {err}");
            failure("Failed to create token")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use tot_core::{MindMapData, ReasonerError, ReasonerFailureKind};

    struct FixedReasoner {
        fail: bool,
    }

    #[async_trait]
    impl MindMapReasoner for FixedReasoner {
        async fn extract(&self, request: &ExtractRequest) -> Result<Value, ReasonerError> {
            if self.fail {
                return Err(ReasonerError::new(ReasonerFailureKind::Transport, "down"));
            }
            Ok(json!({"children": [{"text": request.new_text.clone()}]}))
        }

        async fn command(&self, _request: &CommandRequest) -> Result<Value, ReasonerError> {
            Err(ReasonerError::new(ReasonerFailureKind::Status, "529"))
        }

        async fn title(&self, _request: &TitleRequest) -> Result<Value, ReasonerError> {
            Err(ReasonerError::new(ReasonerFailureKind::InvalidOutput, "empty"))
        }
    }

    fn state(fail: bool, key: Option<&str>) -> Arc<HubState> {
        Arc::new(HubState::new(
            Arc::new(FixedReasoner { fail }),
            key.map(str::to_string),
        ))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn extract_request() -> ExtractRequest {
        ExtractRequest {
            new_text: "cut Airtable".to_string(),
            current_map: MindMapData::empty(),
        }
    }

    #[tokio::test]
    async fn extract_forwards_reasoner_output() {
        let response = extract(State(state(false, None)), Json(extract_request())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["children"][0]["text"], "cut Airtable");
    }

    #[tokio::test]
    async fn merge_failures_are_500_with_fixed_message() {
        let response = extract(State(state(true, None)), Json(extract_request())).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"error": "Extraction failed"}));

        let response = command(
            State(state(false, None)),
            Json(CommandRequest {
                command_text: "x".to_string(),
                full_text: "Poppy x".to_string(),
                current_map: MindMapData::empty(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"error": "Command failed"}));
    }

    #[tokio::test]
    async fn title_failure_degrades_to_placeholder() {
        let response = title(
            State(state(false, None)),
            Json(TitleRequest {
                mindmap: MindMapData::empty(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"title": "Untitled"}));
    }

    #[tokio::test]
    async fn token_requires_configured_key() {
        let response = token(State(state(false, None))).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"error": "ASSEMBLYAI_API_KEY is not configured"})
        );

        let mut hub = HubState::new(Arc::new(FixedReasoner { fail: false }), Some("k".into()));
        hub.assemblyai_api_base = "http://127.0.0.1:1".to_string();
        let response = token(State(Arc::new(hub))).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"error": "Failed to create token"}));
    }
}
