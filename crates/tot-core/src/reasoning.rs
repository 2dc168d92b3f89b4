use crate::mindmap::MindMapData;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequest {
    pub new_text: String,
    pub current_map: MindMapData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command_text: String,
    pub full_text: String,
    pub current_map: MindMapData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TitleRequest {
    pub mindmap: MindMapData,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReasonerFailureKind {
    Transport,
    Status,
    InvalidOutput,
    Config,
}

impl ReasonerFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Status => "status",
            Self::InvalidOutput => "invalid_output",
            Self::Config => "config",
        }
    }
}

impl std::fmt::Display for ReasonerFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("reasoner error ({kind}): {message}")]
pub struct ReasonerError {
    pub kind: ReasonerFailureKind,
    pub message: String,
}

impl ReasonerError {
    pub fn new(kind: ReasonerFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The language-understanding collaborator. Responses are raw JSON; callers
/// validate them with the `merge` parsers before touching any state.
#[async_trait]
pub trait MindMapReasoner: Send + Sync {
    async fn extract(&self, request: &ExtractRequest) -> Result<Value, ReasonerError>;

    async fn command(&self, request: &CommandRequest) -> Result<Value, ReasonerError>;

    async fn title(&self, request: &TitleRequest) -> Result<Value, ReasonerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_use_camel_case_wire_names() {
        let request = CommandRequest {
            command_text: "rename Marketing to Growth".to_string(),
            full_text: "Poppy rename Marketing to Growth".to_string(),
            current_map: MindMapData::empty(),
        };
        assert_eq!(
            serde_json::to_value(&request).expect("encode"),
            json!({
                "commandText": "rename Marketing to Growth",
                "fullText": "Poppy rename Marketing to Growth",
                "currentMap": {"title": "Conversation", "children": []}
            })
        );

        let decoded: ExtractRequest = serde_json::from_value(json!({
            "newText": "we should cut Airtable",
            "currentMap": {"title": "Conversation", "children": []}
        }))
        .expect("decode");
        assert_eq!(decoded.new_text, "we should cut Airtable");
    }
}
