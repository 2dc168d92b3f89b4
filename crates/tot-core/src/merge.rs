use crate::mindmap::{MindMapData, MindMapNode, DEFAULT_MINDMAP_TITLE, UNTITLED};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("response is not a json object")]
    NotAnObject,
    #[error("response has no children array")]
    MissingChildren,
    #[error("invalid node in children: {0}")]
    InvalidNode(String),
    #[error("remote reported error: {0}")]
    Remote(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReply {
    pub mindmap: MindMapData,
    pub recall: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Replace(MindMapData),
    Passthrough,
}

pub fn parse_extraction_reply(
    value: &Value,
    previous: &MindMapData,
) -> Result<ExtractionReply, ContractError> {
    let mindmap = parse_tree_reply(value, previous)?;
    let recall = value
        .get("recall")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|recall| !recall.is_empty())
        .map(str::to_string);
    Ok(ExtractionReply { mindmap, recall })
}

pub fn parse_command_reply(
    value: &Value,
    previous: &MindMapData,
) -> Result<CommandReply, ContractError> {
    if value.get("passthrough").is_some_and(is_truthy) {
        return Ok(CommandReply::Passthrough);
    }
    parse_tree_reply(value, previous).map(CommandReply::Replace)
}

/// `None` when the service had nothing better than the placeholder title.
pub fn parse_title_reply(value: &Value) -> Option<String> {
    value
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|title| !title.is_empty() && *title != UNTITLED)
        .map(str::to_string)
}

fn parse_tree_reply(value: &Value, previous: &MindMapData) -> Result<MindMapData, ContractError> {
    let object = value.as_object().ok_or(ContractError::NotAnObject)?;
    let Some(children) = object.get("children").and_then(Value::as_array) else {
        if let Some(message) = object.get("error").and_then(Value::as_str) {
            return Err(ContractError::Remote(message.to_string()));
        }
        return Err(ContractError::MissingChildren);
    };

    let children = children
        .iter()
        .map(|child| serde_json::from_value::<MindMapNode>(child.clone()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| ContractError::InvalidNode(err.to_string()))?;

    let title = object
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            if previous.title.trim().is_empty() {
                DEFAULT_MINDMAP_TITLE.to_string()
            } else {
                previous.title.clone()
            }
        });

    Ok(MindMapData { title, children })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => text.eq_ignore_ascii_case("true"),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// Model output is sometimes wrapped in markdown fences.
pub fn strip_code_fences(raw: &str) -> String {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"```(?:json)?\n?|\n?```").ok());
    match fence {
        Some(fence) => fence.replace_all(raw, "").trim().to_string(),
        None => raw.replace("```", "").trim().to_string(),
    }
}
