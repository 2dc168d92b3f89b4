use crate::config::SessionConfig;
use crate::coordinator::{MergeCoordinator, MergeJob, MergeOutcome, MergePhase, MergeTicket};
use crate::recall::RecallNotifier;
use crate::source::{FragmentSourceConnector, SourceConnection};
use crate::thumbnail::ThumbnailRenderer;
use crate::title::generate_title;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tot_core::{
    route_utterance, Conversation, MindMapData, MindMapReasoner, ReasonerError, SessionStatus,
    SourceError, SourceEvent, TranscriptLog, UtteranceRoute, WakeWord,
};
use tot_storage::{ConversationArchive, StorageError};
use tracing::{debug, error, info, warn};

const CONTROL_CAPACITY: usize = 32;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {action} while {status}")]
    InvalidTransition {
        action: &'static str,
        status: SessionStatus,
    },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("archive error: {0}")]
    Archive(#[from] StorageError),
    #[error("conversation not found: {0}")]
    NotFound(String),
    #[error("session runtime has stopped")]
    Closed,
}

/// Observer copy of the session, republished after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub mindmap: MindMapData,
    pub partial: String,
    pub transcript: String,
    pub recall: Option<String>,
    pub processing_command: bool,
    pub phase: MergePhase,
    pub pending_fragments: usize,
    pub conversation_id: Option<String>,
    /// Bumped on every archive write.
    pub archive_revision: u64,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Idle,
            mindmap: MindMapData::empty(),
            partial: String::new(),
            transcript: String::new(),
            recall: None,
            processing_command: false,
            phase: MergePhase::Idle,
            pending_fragments: 0,
            conversation_id: None,
            archive_revision: 0,
        }
    }
}

/// Collaborators the session drives.
#[derive(Clone)]
pub struct SessionDeps {
    pub reasoner: Arc<dyn MindMapReasoner>,
    pub archive: Arc<dyn ConversationArchive>,
    pub source: Arc<dyn FragmentSourceConnector>,
    pub thumbnails: Arc<dyn ThumbnailRenderer>,
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Control {
    Start(Reply<()>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    End(Reply<()>),
    LoadSaved(Box<Conversation>, Reply<()>),
    LoadById(String, Reply<()>),
    DismissRecall,
    Shutdown(oneshot::Sender<()>),
}

enum Completion {
    Extraction {
        ticket: MergeTicket,
        result: Result<Value, ReasonerError>,
    },
    Command {
        ticket: MergeTicket,
        result: Result<Value, ReasonerError>,
    },
    Title {
        conversation_id: String,
        title: Option<String>,
    },
}

#[derive(Clone)]
pub struct SessionHandle {
    control: mpsc::Sender<Control>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(Control::Start).await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.request(Control::Pause).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(Control::Resume).await
    }

    pub async fn end(&self) -> Result<(), SessionError> {
        self.request(Control::End).await
    }

    pub async fn load_saved(&self, conversation: Conversation) -> Result<(), SessionError> {
        self.request(|reply| Control::LoadSaved(Box::new(conversation), reply))
            .await
    }

    pub async fn load_by_id(&self, id: impl Into<String>) -> Result<(), SessionError> {
        let id = id.into();
        self.request(|reply| Control::LoadById(id, reply)).await
    }

    pub async fn dismiss_recall(&self) -> Result<(), SessionError> {
        self.control
            .send(Control::DismissRecall)
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Stops the runtime. Source connections are closed; remote calls still
    /// in flight finish on their own and are ignored.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Shutdown(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    async fn request(
        &self,
        build: impl FnOnce(Reply<()>) -> Control,
    ) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(build(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}

pub fn spawn_session(config: SessionConfig, deps: SessionDeps) -> (SessionHandle, JoinHandle<()>) {
    let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

    let runtime = SessionRuntime {
        wake_word: WakeWord::new(config.wake_word.clone()),
        transcript: TranscriptLog::new(config.stamp_window()),
        recall: RecallNotifier::new(config.recall_ttl),
        coordinator: MergeCoordinator::default(),
        status: SessionStatus::Idle,
        partial: String::new(),
        conversation_id: None,
        archive_revision: 0,
        connection: None,
        completion_tx,
        snapshot_tx,
        config,
        deps,
    };
    let task = tokio::spawn(runtime.run(control_rx, completion_rx));

    (
        SessionHandle {
            control: control_tx,
            snapshots: snapshot_rx,
        },
        task,
    )
}

struct SessionRuntime {
    config: SessionConfig,
    deps: SessionDeps,
    wake_word: WakeWord,
    status: SessionStatus,
    coordinator: MergeCoordinator,
    transcript: TranscriptLog,
    partial: String,
    recall: RecallNotifier,
    conversation_id: Option<String>,
    archive_revision: u64,
    connection: Option<SourceConnection>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionRuntime {
    async fn run(
        mut self,
        mut control_rx: mpsc::Receiver<Control>,
        mut completion_rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            let recall_deadline = self.recall.deadline();
            tokio::select! {
                control = control_rx.recv() => {
                    let Some(control) = control else {
                        break;
                    };
                    if let Control::Shutdown(done) = control {
                        self.disconnect();
                        info!("session_shutdown");
                        let _ = done.send(());
                        break;
                    }
                    self.handle_control(control).await;
                }
                event = next_source_event(&mut self.connection) => {
                    self.handle_source_event(event);
                }
                Some(completion) = completion_rx.recv() => {
                    self.handle_completion(completion);
                }
                _ = sleep_until_deadline(recall_deadline) => {
                    self.recall.expire(Instant::now());
                }
            }
            self.publish();
        }
    }

    // Publishes before replying so callers observe the new state as soon as
    // their request resolves.
    async fn handle_control(&mut self, control: Control) {
        let (result, reply) = match control {
            Control::Start(reply) => (self.start().await, reply),
            Control::Pause(reply) => (self.pause(), reply),
            Control::Resume(reply) => (self.resume().await, reply),
            Control::End(reply) => (self.end(), reply),
            Control::LoadSaved(conversation, reply) => {
                self.load_saved(*conversation);
                (Ok(()), reply)
            }
            Control::LoadById(id, reply) => (self.load_by_id(&id), reply),
            Control::DismissRecall => {
                self.recall.dismiss();
                return;
            }
            Control::Shutdown(done) => {
                let _ = done.send(());
                return;
            }
        };
        self.publish();
        let _ = reply.send(result);
    }

    async fn start(&mut self) -> Result<(), SessionError> {
        self.disconnect();
        self.coordinator.reset(MindMapData::empty());
        self.transcript.clear();
        self.partial.clear();
        self.recall.dismiss();
        self.conversation_id = None;

        match self.deps.source.connect().await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.set_status(SessionStatus::Listening);
                Ok(())
            }
            Err(err) => {
                warn!("source_connect_failed: {err}");
                self.set_status(SessionStatus::Idle);
                Err(err.into())
            }
        }
    }

    fn pause(&mut self) -> Result<(), SessionError> {
        self.require("pause", &[SessionStatus::Listening])?;
        self.pause_and_archive();
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), SessionError> {
        self.require("resume", &[SessionStatus::Paused])?;
        self.coordinator.clear_transient();
        self.partial.clear();

        match self.deps.source.connect().await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.set_status(SessionStatus::Listening);
                Ok(())
            }
            Err(err) => {
                warn!("source_reconnect_failed: {err}");
                Err(err.into())
            }
        }
    }

    fn end(&mut self) -> Result<(), SessionError> {
        self.require("end", &[SessionStatus::Listening, SessionStatus::Paused])?;
        let thumbnail = self.render_thumbnail();
        self.disconnect();
        if !self.coordinator.tree().is_empty() {
            self.persist(thumbnail);
        }

        self.coordinator.reset(MindMapData::empty());
        self.transcript.clear();
        self.partial.clear();
        self.recall.dismiss();
        self.conversation_id = None;
        self.set_status(SessionStatus::Idle);
        Ok(())
    }

    fn load_saved(&mut self, conversation: Conversation) {
        self.disconnect();
        self.coordinator.reset(conversation.mindmap);
        self.transcript =
            TranscriptLog::from_saved(conversation.transcript, self.config.stamp_window());
        self.partial.clear();
        self.recall.dismiss();
        info!("conversation_loaded: id={}", conversation.id);
        self.conversation_id = Some(conversation.id);
        self.set_status(SessionStatus::Paused);
    }

    fn load_by_id(&mut self, id: &str) -> Result<(), SessionError> {
        let conversation = self
            .deps
            .archive
            .get(id)?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        self.load_saved(conversation);
        Ok(())
    }

    fn require(&self, action: &'static str, allowed: &[SessionStatus]) -> Result<(), SessionError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                action,
                status: self.status,
            })
        }
    }

    /// Thumbnail, disconnect, then archive the settled tree.
    fn pause_and_archive(&mut self) {
        let thumbnail = self.render_thumbnail();
        self.disconnect();
        self.partial.clear();
        self.set_status(SessionStatus::Paused);
        if !self.coordinator.tree().is_empty() {
            self.persist(thumbnail);
        }
    }

    fn render_thumbnail(&self) -> Option<String> {
        let tree = self.coordinator.tree();
        if tree.is_empty() {
            return None;
        }
        match self.deps.thumbnails.render(tree) {
            Ok(thumbnail) => Some(thumbnail),
            Err(err) => {
                warn!("thumbnail_failed: {err}");
                None
            }
        }
    }

    fn persist(&mut self, thumbnail: Option<String>) {
        let tree = self.coordinator.tree().clone();
        let saved = self.deps.archive.save(
            &tree,
            self.transcript.as_str(),
            self.conversation_id.as_deref(),
            thumbnail.as_deref(),
        );
        match saved {
            Ok(conversation) => {
                info!(
                    "conversation_archived: id={} nodes={}",
                    conversation.id,
                    tree.node_count()
                );
                self.archive_revision += 1;
                self.conversation_id = Some(conversation.id.clone());
                self.spawn_title(conversation.id, tree);
            }
            Err(err) => error!("archive_save_failed: {err}"),
        }
    }

    fn spawn_title(&self, conversation_id: String, mindmap: MindMapData) {
        let reasoner = Arc::clone(&self.deps.reasoner);
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let title = generate_title(reasoner.as_ref(), &mindmap).await;
            let _ = completions.send(Completion::Title {
                conversation_id,
                title,
            });
        });
    }

    fn handle_source_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Opened => debug!("source_opened"),
            SourceEvent::Partial(text) => self.partial = text,
            SourceEvent::Final(text) => self.handle_final(text),
            SourceEvent::Closed { reason } => self.handle_source_loss(&reason),
            SourceEvent::Error(message) => self.handle_source_loss(&message),
        }
    }

    fn handle_final(&mut self, text: String) {
        self.partial.clear();
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.transcript.append(text, Utc::now());

        match route_utterance(text, &self.wake_word, self.config.min_words) {
            UtteranceRoute::Noise => debug!("utterance_noise: {text:?}"),
            UtteranceRoute::Command {
                command_text,
                full_text,
            } => {
                debug!("utterance_command: {command_text:?}");
                let job = self.coordinator.request_command(command_text, full_text);
                self.dispatch(job);
            }
            UtteranceRoute::Content(content) => {
                self.coordinator.push_fragment(content);
                let job = self.coordinator.request_extraction();
                self.dispatch(job);
            }
        }
    }

    fn handle_source_loss(&mut self, reason: &str) {
        warn!("source_lost: {reason}");
        if self.status != SessionStatus::Listening {
            self.disconnect();
            return;
        }
        if self.coordinator.tree().is_empty() {
            self.disconnect();
            self.partial.clear();
            self.set_status(SessionStatus::Idle);
        } else {
            self.pause_and_archive();
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        let step = match completion {
            Completion::Extraction { ticket, result } => {
                self.coordinator.complete_extraction(ticket, result)
            }
            Completion::Command { ticket, result } => {
                self.coordinator.complete_command(ticket, result)
            }
            Completion::Title {
                conversation_id,
                title,
            } => {
                self.apply_title(&conversation_id, title);
                return;
            }
        };

        if let MergeOutcome::Applied { recall } = step.outcome {
            if let Some(recall) = recall {
                self.recall.show(recall, Instant::now());
            }
            if self.status == SessionStatus::Paused && !self.coordinator.tree().is_empty() {
                let thumbnail = self.render_thumbnail();
                self.persist(thumbnail);
            }
        }
        self.dispatch(step.next);
    }

    fn apply_title(&mut self, conversation_id: &str, title: Option<String>) {
        let Some(title) = title else {
            return;
        };
        match self.deps.archive.update_title(conversation_id, &title) {
            Ok(true) => {
                info!("conversation_titled: id={conversation_id} title={title:?}");
                self.archive_revision += 1;
            }
            Ok(false) => debug!("title_target_missing: id={conversation_id}"),
            Err(err) => error!("archive_title_failed: {err}"),
        }
    }

    fn dispatch(&self, job: Option<MergeJob>) {
        let Some(job) = job else {
            return;
        };
        let reasoner = Arc::clone(&self.deps.reasoner);
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let completion = match job {
                MergeJob::Extract { ticket, request } => Completion::Extraction {
                    ticket,
                    result: reasoner.extract(&request).await,
                },
                MergeJob::Command { ticket, request } => Completion::Command {
                    ticket,
                    result: reasoner.command(&request).await,
                },
            };
            let _ = completions.send(completion);
        });
    }

    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.disconnect();
        }
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            info!("session_status: {} -> {}", self.status, status);
            self.status = status;
        }
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            status: self.status,
            mindmap: self.coordinator.tree().clone(),
            partial: self.partial.clone(),
            transcript: self.transcript.as_str().to_string(),
            recall: self.recall.current(Instant::now()).map(str::to_string),
            processing_command: self.coordinator.processing_command(),
            phase: self.coordinator.phase(),
            pending_fragments: self.coordinator.pending_fragments(),
            conversation_id: self.conversation_id.clone(),
            archive_revision: self.archive_revision,
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn next_source_event(connection: &mut Option<SourceConnection>) -> SourceEvent {
    match connection {
        Some(connection) => match connection.next_event().await {
            Some(event) => event,
            None => SourceEvent::Closed {
                reason: "source stream ended".to_string(),
            },
        },
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
