use crate::prompts::{
    command_system_prompt, command_user_message, extract_user_message, title_user_message,
    EXTRACT_SYSTEM_PROMPT, TITLE_SYSTEM_PROMPT,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tot_core::{
    strip_code_fences, CommandRequest, ExtractRequest, MindMapData, MindMapReasoner,
    ReasonerError, ReasonerFailureKind, TitleRequest, UNTITLED,
};
use tracing::{debug, warn};

pub const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_MODEL: &str = "TOT_ANTHROPIC_MODEL";
pub const ENV_BASE_URL: &str = "TOT_ANTHROPIC_BASE_URL";

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const MERGE_TEMPERATURE: f32 = 0.2;
const MERGE_MAX_TOKENS: u32 = 2000;
const TITLE_TEMPERATURE: f32 = 0.9;
const TITLE_MAX_TOKENS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ReasonerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ReasonerError> {
        let api_key = lookup(ENV_API_KEY)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ReasonerError::new(
                    ReasonerFailureKind::Config,
                    format!("{ENV_API_KEY} is not configured"),
                )
            })?;

        let mut config = Self::new(api_key);
        if let Some(model) = lookup(ENV_MODEL).filter(|model| !model.trim().is_empty()) {
            config.model = model.trim().to_string();
        }
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|url| !url.trim().is_empty()) {
            config.base_url = base_url.trim().to_string();
        }
        Ok(config)
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Talks to the Anthropic Messages API directly.
pub struct AnthropicReasoner {
    client: reqwest::Client,
    config: AnthropicConfig,
    command_prompt: String,
}

impl AnthropicReasoner {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            command_prompt: command_system_prompt("Poppy"),
        }
    }

    /// The wake word doubles as the assistant's name in the command prompt.
    pub fn with_assistant_name(mut self, name: &str) -> Self {
        self.command_prompt = command_system_prompt(&display_name(name));
        self
    }

    pub fn config(&self) -> &AnthropicConfig {
        &self.config
    }

    async fn complete(
        &self,
        system: &str,
        user: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ReasonerError> {
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens,
            temperature,
            system,
            messages: vec![ChatMessage {
                role: "user",
                content: user,
            }],
        };

        let response = self
            .client
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| ReasonerError::new(ReasonerFailureKind::Transport, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ReasonerError::new(
                ReasonerFailureKind::Status,
                format!("messages api returned {status}: {detail}"),
            ));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|err| {
            ReasonerError::new(ReasonerFailureKind::InvalidOutput, err.to_string())
        })?;
        Ok(first_text(&parsed))
    }
}

#[async_trait]
impl MindMapReasoner for AnthropicReasoner {
    async fn extract(&self, request: &ExtractRequest) -> Result<Value, ReasonerError> {
        if request.new_text.trim().is_empty() {
            return Ok(echo(&request.current_map));
        }
        let raw = self
            .complete(
                EXTRACT_SYSTEM_PROMPT,
                extract_user_message(&request.new_text, &request.current_map),
                MERGE_TEMPERATURE,
                MERGE_MAX_TOKENS,
            )
            .await?;
        interpret_extraction(&raw, &request.current_map)
    }

    async fn command(&self, request: &CommandRequest) -> Result<Value, ReasonerError> {
        if request.command_text.trim().is_empty() && request.full_text.trim().is_empty() {
            return Ok(echo(&request.current_map));
        }
        let raw = self
            .complete(
                &self.command_prompt,
                command_user_message(
                    &request.command_text,
                    &request.full_text,
                    &request.current_map,
                ),
                MERGE_TEMPERATURE,
                MERGE_MAX_TOKENS,
            )
            .await?;
        interpret_command(&raw, &request.current_map)
    }

    async fn title(&self, request: &TitleRequest) -> Result<Value, ReasonerError> {
        if request.mindmap.is_empty() {
            return Ok(json!({ "title": UNTITLED }));
        }
        let raw = self
            .complete(
                TITLE_SYSTEM_PROMPT,
                title_user_message(&request.mindmap),
                TITLE_TEMPERATURE,
                TITLE_MAX_TOKENS,
            )
            .await?;
        Ok(json!({ "title": clean_title(&raw) }))
    }
}

fn first_text(response: &MessagesResponse) -> String {
    response
        .content
        .iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text.clone())
        .unwrap_or_default()
}

fn echo(map: &MindMapData) -> Value {
    serde_json::to_value(map).unwrap_or_else(|_| json!({ "title": map.title, "children": [] }))
}

fn parse_model_json(raw: &str) -> Result<Value, ReasonerError> {
    let cleaned = strip_code_fences(raw);
    let cleaned = if cleaned.is_empty() { "{}" } else { &cleaned };
    serde_json::from_str(cleaned).map_err(|err| {
        ReasonerError::new(
            ReasonerFailureKind::InvalidOutput,
            format!("model output is not json: {err}"),
        )
    })
}

fn has_children_array(value: &Value) -> bool {
    value.get("children").is_some_and(Value::is_array)
}

/// The full result passes through so `recall` survives. A parsed reply
/// without a children array falls back to the current map.
pub fn interpret_extraction(raw: &str, current_map: &MindMapData) -> Result<Value, ReasonerError> {
    let value = parse_model_json(raw)?;
    if !has_children_array(&value) {
        warn!("extract_bad_shape: {raw}");
        return Ok(echo(current_map));
    }
    Ok(value)
}

pub fn interpret_command(raw: &str, current_map: &MindMapData) -> Result<Value, ReasonerError> {
    let value = parse_model_json(raw)?;
    if value.get("passthrough").is_some_and(is_truthy) {
        debug!("command_passthrough_flagged");
        return Ok(json!({ "passthrough": true, "currentMap": echo(current_map) }));
    }
    if !has_children_array(&value) {
        warn!("command_bad_shape: {raw}");
        return Ok(echo(current_map));
    }
    Ok(value)
}

/// Trims and strips one layer of wrapping quotes. Blank output becomes the
/// placeholder title.
pub fn clean_title(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix(['"', '\''])
        .unwrap_or(trimmed);
    let unquoted = unquoted.strip_suffix(['"', '\'']).unwrap_or(unquoted);
    if unquoted.trim().is_empty() {
        UNTITLED.to_string()
    } else {
        unquoted.to_string()
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Null => false,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn display_name(wake_word: &str) -> String {
    let mut chars = wake_word.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Poppy".to_string(),
    }
}
