use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tot_core::render::to_outline;
use tot_core::{MindMapReasoner, SessionStatus};
use tot_mind::{
    spawn_session, ChannelSource, FragmentSourceConnector, MermaidThumbnail, SessionConfig,
    SessionDeps, SessionHandle, SessionSnapshot, SourceFeeder,
};
use tot_storage::ConversationArchive;
use tot_transcribe::{AssemblyAiConfig, AssemblyAiSource, FileAudioInput, PcmFormat};
use tracing::{debug, warn};

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Where fragments come from: typed lines or AssemblyAI streaming
    #[arg(long, value_enum, default_value_t = SourceKind::Lines)]
    pub source: SourceKind,
    /// Raw 16 kHz mono PCM file or FIFO for the assemblyai source
    #[arg(long)]
    pub audio: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = AudioFormat::S16)]
    pub format: AudioFormat,
    /// Pace file audio at its recorded rate
    #[arg(long, default_value_t = false)]
    pub realtime: bool,
    /// Open a saved conversation before reading commands
    #[arg(long)]
    pub load: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Lines,
    Assemblyai,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioFormat {
    S16,
    F32,
}

impl From<AudioFormat> for PcmFormat {
    fn from(format: AudioFormat) -> Self {
        match format {
            AudioFormat::S16 => PcmFormat::S16Le,
            AudioFormat::F32 => PcmFormat::F32Le,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLine {
    Start,
    Pause,
    Resume,
    End,
    Load(String),
    Dismiss,
    Show,
    Quit,
    Help,
    Text(String),
    Unknown(String),
}

const HELP: &str = "/start /pause /resume /end /load <id> /dismiss /show /quit; other lines are spoken text";

pub fn parse_control_line(line: &str) -> Option<ControlLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Some(ControlLine::Text(line.to_string()));
    };
    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    let parsed = match name {
        "start" => ControlLine::Start,
        "pause" => ControlLine::Pause,
        "resume" => ControlLine::Resume,
        "end" => ControlLine::End,
        "load" if !rest.is_empty() => ControlLine::Load(rest.to_string()),
        "dismiss" => ControlLine::Dismiss,
        "show" => ControlLine::Show,
        "quit" | "exit" => ControlLine::Quit,
        "help" => ControlLine::Help,
        _ => ControlLine::Unknown(line.to_string()),
    };
    Some(parsed)
}

/// Lines worth printing when the session moves from `previous` to `next`.
pub fn describe_changes(previous: &SessionSnapshot, next: &SessionSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    if previous.status != next.status {
        lines.push(format!("[status] {}", next.status));
    }
    if !previous.processing_command && next.processing_command {
        lines.push("[command] working on it".to_string());
    }
    if previous.mindmap != next.mindmap {
        lines.push(format!("[map]\n{}", to_outline(&next.mindmap)));
    }
    if previous.recall != next.recall {
        if let Some(message) = &next.recall {
            lines.push(format!("[recall] {message}"));
        }
    }
    if previous.conversation_id != next.conversation_id {
        if let Some(id) = &next.conversation_id {
            lines.push(format!("[saved] {id}"));
        }
    }
    lines
}

pub fn render_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut out = format!(
        "status: {}\nphase: {}\npending fragments: {}\n",
        snapshot.status,
        snapshot.phase.as_str(),
        snapshot.pending_fragments
    );
    if let Some(id) = &snapshot.conversation_id {
        out.push_str(&format!("conversation: {id}\n"));
    }
    if !snapshot.partial.is_empty() {
        out.push_str(&format!("partial: {}\n", snapshot.partial));
    }
    out.push_str(&to_outline(&snapshot.mindmap));
    if !snapshot.transcript.is_empty() {
        out.push_str("\n--- transcript ---\n");
        out.push_str(&snapshot.transcript);
    }
    out
}

fn build_source(
    args: &ListenArgs,
    hub_url: Option<&str>,
) -> Result<(Arc<dyn FragmentSourceConnector>, Option<SourceFeeder>)> {
    match args.source {
        SourceKind::Lines => {
            let (source, feeder) = ChannelSource::new();
            Ok((Arc::new(source), Some(feeder)))
        }
        SourceKind::Assemblyai => {
            let Some(path) = args.audio.clone() else {
                bail!("--audio is required with --source assemblyai");
            };
            let config = AssemblyAiConfig::from_env(hub_url)?;
            let audio = FileAudioInput::new(path, args.format.into()).realtime(args.realtime);
            Ok((Arc::new(AssemblyAiSource::new(config, Arc::new(audio))), None))
        }
    }
}

pub async fn run(
    args: ListenArgs,
    archive: Arc<dyn ConversationArchive>,
    reasoner: Arc<dyn MindMapReasoner>,
    hub_url: Option<&str>,
) -> Result<()> {
    let (source, feeder) = build_source(&args, hub_url)?;
    let deps = SessionDeps {
        reasoner,
        archive,
        source,
        thumbnails: Arc::new(MermaidThumbnail),
    };
    let (session, runtime) = spawn_session(SessionConfig::from_env(), deps);

    let mut updates = session.subscribe();
    let printer = tokio::spawn(async move {
        let mut last = updates.borrow().clone();
        while updates.changed().await.is_ok() {
            let next = updates.borrow_and_update().clone();
            for line in describe_changes(&last, &next) {
                println!("{line}");
            }
            last = next;
        }
    });

    if let Some(id) = args.load.as_deref() {
        if let Err(err) = session.load_by_id(id).await {
            eprintln!("error: {err}");
        }
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(control) = parse_control_line(&line) else {
            continue;
        };
        debug!("control_line: {control:?}");
        if control == ControlLine::Quit {
            break;
        }
        if let Err(err) = apply(&session, feeder.as_ref(), control).await {
            eprintln!("error: {err}");
        }
    }

    if session.snapshot().status == SessionStatus::Listening {
        if let Err(err) = session.pause().await {
            warn!("pause_on_quit_failed: {err}");
        }
    }
    session.shutdown().await?;
    let _ = runtime.await;
    printer.abort();
    Ok(())
}

async fn apply(
    session: &SessionHandle,
    feeder: Option<&SourceFeeder>,
    control: ControlLine,
) -> Result<()> {
    match control {
        ControlLine::Start => session.start().await?,
        ControlLine::Pause => session.pause().await?,
        ControlLine::Resume => session.resume().await?,
        ControlLine::End => session.end().await?,
        ControlLine::Load(id) => session.load_by_id(id).await?,
        ControlLine::Dismiss => session.dismiss_recall().await?,
        ControlLine::Show => println!("{}", render_snapshot(&session.snapshot())),
        ControlLine::Help | ControlLine::Quit => println!("{HELP}"),
        ControlLine::Unknown(line) => println!("unknown command: {line}\n{HELP}"),
        ControlLine::Text(text) => match feeder {
            Some(feeder) => {
                if !feeder.final_text(text).await {
                    bail!("not listening; /start or /resume first");
                }
            }
            None => bail!("typed text is only accepted with --source lines"),
        },
    }
    Ok(())
}
