use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tot_core::{
    CommandRequest, ExtractRequest, MindMapReasoner, ReasonerError, ReasonerFailureKind,
    TitleRequest,
};

/// Forwards every call to a `tot-hub` instance, which holds the model key.
pub struct HubReasoner {
    client: reqwest::Client,
    base_url: String,
}

impl HubReasoner {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + Sync>(&self, route: &str, body: &T) -> Result<Value, ReasonerError> {
        let url = format!("{}/api/{route}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| ReasonerError::new(ReasonerFailureKind::Transport, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ReasonerError::new(
                ReasonerFailureKind::Status,
                format!("{url} returned {status}: {detail}"),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| ReasonerError::new(ReasonerFailureKind::InvalidOutput, err.to_string()))
    }
}

#[async_trait]
impl MindMapReasoner for HubReasoner {
    async fn extract(&self, request: &ExtractRequest) -> Result<Value, ReasonerError> {
        self.post("extract", request).await
    }

    async fn command(&self, request: &CommandRequest) -> Result<Value, ReasonerError> {
        self.post("command", request).await
    }

    async fn title(&self, request: &TitleRequest) -> Result<Value, ReasonerError> {
        self.post("title", request).await
    }
}
