mod routes;

use clap::Parser;
use routes::{router, HubState};
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tot_reasoner::{AnthropicConfig, AnthropicReasoner};
use tracing::{error, info};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_ADDR: &str = "127.0.0.1:8787";

#[derive(Parser, Debug)]
#[command(name = "tot-hub", about = "HTTP front for the mind map reasoner")]
struct Args {
    #[arg(long, env = "TOT_HUB_ADDR", default_value = DEFAULT_ADDR)]
    addr: String,
    #[arg(long, env = "TOT_LOG_DIR", default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    /// Wake word the command prompt addresses.
    #[arg(long, env = "TOT_WAKE_WORD", default_value = "poppy")]
    wake_word: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args);

    let addr: SocketAddr = match args.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!("invalid_addr: {} ({err})", args.addr);
            return;
        }
    };
    if !addr.ip().is_loopback() {
        error!("invalid_addr: {} is not a loopback address", args.addr);
        return;
    }

    let config = match AnthropicConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("reasoner_config_error: {err}");
            return;
        }
    };
    let reasoner = AnthropicReasoner::new(config).with_assistant_name(&args.wake_word);
    let state = Arc::new(HubState::new(
        Arc::new(reasoner),
        std::env::var(tot_transcribe::assemblyai::ENV_API_KEY).ok(),
    ));
    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!("hub_error: {err}");
            return;
        }
    };

    info!("hub_start: {addr}");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("hub_error: {err}");
    }
}

type SharedLog = Arc<Mutex<std::fs::File>>;

fn init_logging(args: &Args) {
    let level = if args.debug {
        "debug".to_string()
    } else {
        std::env::var("TOT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let file = open_log_file(&args.log_dir).unwrap_or_else(|err| {
        eprintln!("log_file_error: {err}");
        None
    });
    let make_writer = BoxMakeWriter::new(move || TeeWriter(file.clone()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .try_init();
}

/// Stdout, plus the hub log file when `--log-dir` is set.
struct TeeWriter(Option<SharedLog>);

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        if let Some(Ok(mut file)) = self.0.as_ref().map(|file| file.lock()) {
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

fn open_log_file(log_dir: &str) -> io::Result<Option<SharedLog>> {
    if log_dir.trim().is_empty() {
        return Ok(None);
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("tot-hub.log"))?;
    Ok(Some(Arc::new(Mutex::new(file))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_only_with_a_log_dir() {
        assert!(open_log_file("  ").expect("no dir").is_none());

        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("logs");
        let file = open_log_file(&nested.to_string_lossy())
            .expect("open")
            .expect("file");
        TeeWriter(Some(file)).write_all(b"hub_start: test\n").expect("write");
        let written = std::fs::read_to_string(nested.join("tot-hub.log")).expect("read");
        assert_eq!(written, "hub_start: test\n");
    }
}
