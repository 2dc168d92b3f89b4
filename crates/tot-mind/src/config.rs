use crate::recall::DEFAULT_RECALL_TTL;
use std::time::Duration;
use tot_core::transcript::DEFAULT_STAMP_WINDOW_SECS;
use tot_core::{DEFAULT_MIN_WORDS, DEFAULT_WAKE_WORD};
use tracing::warn;

pub const ENV_WAKE_WORD: &str = "TOT_WAKE_WORD";
pub const ENV_MIN_WORDS: &str = "TOT_MIN_WORDS";
pub const ENV_RECALL_TTL_MS: &str = "TOT_RECALL_TTL_MS";
pub const ENV_TRANSCRIPT_STAMP_SECS: &str = "TOT_TRANSCRIPT_STAMP_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub wake_word: String,
    pub min_words: usize,
    pub transcript_stamp_window: Duration,
    pub recall_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wake_word: DEFAULT_WAKE_WORD.to_string(),
            min_words: DEFAULT_MIN_WORDS,
            transcript_stamp_window: Duration::from_secs(DEFAULT_STAMP_WINDOW_SECS as u64),
            recall_ttl: DEFAULT_RECALL_TTL,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlays defaults with whatever `lookup` returns. Unparsable values
    /// are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(wake_word) = lookup(ENV_WAKE_WORD) {
            let wake_word = wake_word.trim();
            if !wake_word.is_empty() {
                config.wake_word = wake_word.to_string();
            }
        }
        if let Some(min_words) = parse_number(&lookup, ENV_MIN_WORDS) {
            config.min_words = min_words as usize;
        }
        if let Some(ttl_ms) = parse_number(&lookup, ENV_RECALL_TTL_MS) {
            config.recall_ttl = Duration::from_millis(ttl_ms);
        }
        if let Some(secs) = parse_number(&lookup, ENV_TRANSCRIPT_STAMP_SECS) {
            config.transcript_stamp_window = Duration::from_secs(secs);
        }

        config
    }

    pub(crate) fn stamp_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.transcript_stamp_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_STAMP_WINDOW_SECS))
    }
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("config_ignored: {key}={raw:?} ({err})");
            None
        }
    }
}
