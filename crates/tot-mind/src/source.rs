use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tot_core::{SourceError, SourceEvent};

const CHANNEL_SOURCE_CAPACITY: usize = 256;

/// A live connection to a fragment source. Dropping it disconnects.
#[derive(Debug)]
pub struct SourceConnection {
    events: mpsc::Receiver<SourceEvent>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl SourceConnection {
    pub fn new(events: mpsc::Receiver<SourceEvent>, shutdown: Option<oneshot::Sender<()>>) -> Self {
        Self { events, shutdown }
    }

    pub async fn next_event(&mut self) -> Option<SourceEvent> {
        self.events.recv().await
    }

    pub fn disconnect(mut self) {
        self.signal_shutdown();
    }

    fn signal_shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.events.close();
    }
}

impl Drop for SourceConnection {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

#[async_trait]
pub trait FragmentSourceConnector: Send + Sync {
    async fn connect(&self) -> Result<SourceConnection, SourceError>;
}

#[derive(Debug, Default)]
struct ChannelState {
    sender: Option<mpsc::Sender<SourceEvent>>,
    fail_next: Option<String>,
    connects: usize,
}

/// In-process source driven by a [`SourceFeeder`]. Used by the line-driven
/// CLI and by tests.
#[derive(Debug, Clone)]
pub struct ChannelSource {
    state: Arc<Mutex<ChannelState>>,
}

#[derive(Debug, Clone)]
pub struct SourceFeeder {
    state: Arc<Mutex<ChannelState>>,
}

impl ChannelSource {
    pub fn new() -> (Self, SourceFeeder) {
        let state = Arc::new(Mutex::new(ChannelState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            SourceFeeder { state },
        )
    }
}

#[async_trait]
impl FragmentSourceConnector for ChannelSource {
    async fn connect(&self) -> Result<SourceConnection, SourceError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SourceError::Connect("channel source lock poisoned".to_string()))?;
        if let Some(message) = state.fail_next.take() {
            return Err(SourceError::Connect(message));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_SOURCE_CAPACITY);
        state.sender = Some(tx);
        state.connects += 1;
        Ok(SourceConnection::new(rx, None))
    }
}

impl SourceFeeder {
    /// Returns false when nothing is connected.
    pub async fn send(&self, event: SourceEvent) -> bool {
        let sender = match self.state.lock() {
            Ok(state) => state.sender.clone(),
            Err(_) => None,
        };
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn partial(&self, text: impl Into<String>) -> bool {
        self.send(SourceEvent::Partial(text.into())).await
    }

    pub async fn final_text(&self, text: impl Into<String>) -> bool {
        self.send(SourceEvent::Final(text.into())).await
    }

    /// Sends a close event and forgets the connection.
    pub async fn close(&self, reason: impl Into<String>) -> bool {
        let delivered = self
            .send(SourceEvent::Closed {
                reason: reason.into(),
            })
            .await;
        if let Ok(mut state) = self.state.lock() {
            state.sender = None;
        }
        delivered
    }

    pub fn fail_next_connect(&self, message: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next = Some(message.into());
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.sender.as_ref().map(|sender| !sender.is_closed()))
            .unwrap_or(false)
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().map(|state| state.connects).unwrap_or(0)
    }
}
