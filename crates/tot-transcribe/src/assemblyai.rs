use crate::audio::AudioInput;
use crate::pcm::SAMPLE_RATE;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tot_core::{SourceError, SourceEvent};
use tot_mind::{FragmentSourceConnector, SourceConnection};
use tracing::{debug, info, warn};
use url::Url;

pub const ENV_API_KEY: &str = "ASSEMBLYAI_API_KEY";
pub const DEFAULT_API_BASE: &str = "https://api.assemblyai.com";
pub const DEFAULT_REALTIME_URL: &str = "wss://api.assemblyai.com/v2/realtime/ws";
/// Lifetime requested for temporary tokens.
pub const TOKEN_EXPIRES_IN_SECS: u64 = 480;

const EVENT_CHANNEL_CAPACITY: usize = 256;

type RealtimeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where temporary streaming tokens come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    ApiKey(String),
    /// A `tot-hub` base URL; the key stays on the hub.
    Hub(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyAiConfig {
    pub token_source: TokenSource,
    pub api_base: String,
    pub realtime_url: String,
}

impl AssemblyAiConfig {
    pub fn new(token_source: TokenSource) -> Self {
        Self {
            token_source,
            api_base: DEFAULT_API_BASE.to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
        }
    }

    /// Prefers a local key; otherwise asks the hub for tokens.
    pub fn from_env(hub_url: Option<&str>) -> Result<Self, SourceError> {
        Self::from_lookup(|key| std::env::var(key).ok(), hub_url)
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        hub_url: Option<&str>,
    ) -> Result<Self, SourceError> {
        if let Some(key) = lookup(ENV_API_KEY).filter(|key| !key.trim().is_empty()) {
            return Ok(Self::new(TokenSource::ApiKey(key.trim().to_string())));
        }
        match hub_url.map(str::trim).filter(|url| !url.is_empty()) {
            Some(hub) => Ok(Self::new(TokenSource::Hub(hub.to_string()))),
            None => Err(SourceError::Token(format!(
                "{ENV_API_KEY} is not configured and no hub url was given"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// `POST /v2/realtime/token` with the account key.
pub async fn request_temporary_token(
    client: &reqwest::Client,
    api_base: &str,
    api_key: &str,
) -> Result<String, SourceError> {
    let url = format!("{}/v2/realtime/token", api_base.trim_end_matches('/'));
    let response = client
        .post(&url)
        .header("Authorization", api_key)
        .json(&json!({ "expires_in": TOKEN_EXPIRES_IN_SECS }))
        .send()
        .await
        .map_err(|err| SourceError::Token(err.to_string()))?;
    read_token(response).await
}

pub async fn fetch_token(
    client: &reqwest::Client,
    config: &AssemblyAiConfig,
) -> Result<String, SourceError> {
    match &config.token_source {
        TokenSource::ApiKey(key) => request_temporary_token(client, &config.api_base, key).await,
        TokenSource::Hub(hub) => {
            let url = format!("{}/api/token", hub.trim_end_matches('/'));
            let response = client
                .post(&url)
                .send()
                .await
                .map_err(|err| SourceError::Token(err.to_string()))?;
            read_token(response).await
        }
    }
}

async fn read_token(response: reqwest::Response) -> Result<String, SourceError> {
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(SourceError::Token(format!("token request returned {status}: {detail}")));
    }
    response
        .json::<TokenResponse>()
        .await
        .map(|body| body.token)
        .map_err(|err| SourceError::Token(err.to_string()))
}

pub fn realtime_url(base: &str, token: &str) -> Result<Url, SourceError> {
    let mut url = Url::parse(base).map_err(|err| SourceError::Connect(format!("{base}: {err}")))?;
    url.query_pairs_mut()
        .append_pair("sample_rate", &SAMPLE_RATE.to_string())
        .append_pair("token", token);
    Ok(url)
}

/// Maps one v2 realtime message to a source event. Messages that carry
/// nothing for the session map to `None`.
pub fn parse_realtime_message(text: &str) -> Option<SourceEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            warn!("realtime_message_invalid: {err}");
            return None;
        }
    };

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Some(SourceEvent::Error(error.to_string()));
    }

    let transcript = value.get("text").and_then(Value::as_str).unwrap_or_default();
    match value.get("message_type").and_then(Value::as_str)? {
        "SessionBegins" => {
            let session_id = value
                .get("session_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            info!("realtime_session_begins: {session_id}");
            Some(SourceEvent::Opened)
        }
        "PartialTranscript" if !transcript.is_empty() => {
            Some(SourceEvent::Partial(transcript.to_string()))
        }
        "FinalTranscript" if !transcript.trim().is_empty() => {
            Some(SourceEvent::Final(transcript.to_string()))
        }
        "SessionTerminated" => Some(SourceEvent::Closed {
            reason: "session terminated".to_string(),
        }),
        _ => None,
    }
}

/// Streams audio to AssemblyAI and turns its transcripts into fragments.
pub struct AssemblyAiSource {
    config: AssemblyAiConfig,
    audio: Arc<dyn AudioInput>,
    client: reqwest::Client,
}

impl AssemblyAiSource {
    pub fn new(config: AssemblyAiConfig, audio: Arc<dyn AudioInput>) -> Self {
        Self {
            config,
            audio,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl FragmentSourceConnector for AssemblyAiSource {
    async fn connect(&self) -> Result<SourceConnection, SourceError> {
        let token = fetch_token(&self.client, &self.config).await?;
        let url = realtime_url(&self.config.realtime_url, &token)?;
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SourceError::Connect(err.to_string()))?;
        let audio = self.audio.open().await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(pump(ws, audio, events_tx, shutdown_rx));
        Ok(SourceConnection::new(events_rx, Some(shutdown_tx)))
    }
}

async fn pump(
    mut ws: RealtimeSocket,
    audio: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<SourceEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut audio = Some(audio);
    let mut terminating = false;

    loop {
        tokio::select! {
            _ = &mut shutdown, if !terminating => {
                debug!("realtime_shutdown_requested");
                let _ = ws.send(terminate_message()).await;
                break;
            }
            msg = ws.next() => {
                let event = match msg {
                    Some(Ok(Message::Text(text))) => match parse_realtime_message(&text) {
                        Some(event) => event,
                        None => continue,
                    },
                    Some(Ok(Message::Close(frame))) => SourceEvent::Closed {
                        reason: frame
                            .map(|frame| frame.reason.to_string())
                            .filter(|reason| !reason.is_empty())
                            .unwrap_or_else(|| "websocket closed".to_string()),
                    },
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => SourceEvent::Error(err.to_string()),
                    None => SourceEvent::Closed {
                        reason: "websocket closed".to_string(),
                    },
                };
                let finished = matches!(event, SourceEvent::Closed { .. } | SourceEvent::Error(_));
                if events.send(event).await.is_err() || finished {
                    break;
                }
            }
            chunk = next_chunk(&mut audio) => match chunk {
                Some(bytes) => {
                    if let Err(err) = ws.send(Message::Binary(bytes)).await {
                        let _ = events.send(SourceEvent::Error(err.to_string())).await;
                        break;
                    }
                }
                None => {
                    // Input ended; let the service flush its last finals.
                    info!("audio_input_ended");
                    audio = None;
                    terminating = true;
                    if ws.send(terminate_message()).await.is_err() {
                        break;
                    }
                }
            },
        }
    }

    let _ = ws.close(None).await;
}

fn terminate_message() -> Message {
    Message::Text(json!({ "terminate_session": true }).to_string())
}

async fn next_chunk(audio: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match audio {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
