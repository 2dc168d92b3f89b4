use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a fragment source can emit once connected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SourceEvent {
    Opened,
    /// Interim text for the current utterance, superseded by the next
    /// partial or by a final.
    Partial(String),
    Final(String),
    Closed { reason: String },
    Error(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("source connect failed: {0}")]
    Connect(String),
    #[error("source token request failed: {0}")]
    Token(String),
    #[error("audio input unavailable: {0}")]
    Audio(String),
}
