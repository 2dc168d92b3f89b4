use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_STAMP_WINDOW_SECS: i64 = 15;

/// Cumulative raw transcript. Every finalized fragment lands here, noise
/// included; a `[HH:MM:SS]` stamp opens a new paragraph at most once per
/// window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLog {
    text: String,
    last_stamp: Option<DateTime<Utc>>,
    window: Duration,
}

impl Default for TranscriptLog {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_STAMP_WINDOW_SECS))
    }
}

impl TranscriptLog {
    pub fn new(window: Duration) -> Self {
        Self {
            text: String::new(),
            last_stamp: None,
            window,
        }
    }

    pub fn from_saved(text: impl Into<String>, window: Duration) -> Self {
        Self {
            text: text.into(),
            last_stamp: None,
            window,
        }
    }

    pub fn append(&mut self, fragment: &str, at: DateTime<Utc>) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return;
        }

        let needs_stamp = match self.last_stamp {
            None => true,
            Some(last) => at - last >= self.window,
        };

        if needs_stamp {
            if !self.text.is_empty() {
                self.text.push_str("\n\n");
            }
            self.text.push_str(&format!("[{}] ", at.format("%H:%M:%S")));
            self.last_stamp = Some(at);
        } else if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(fragment);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.last_stamp = None;
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0)
            .single()
            .expect("valid timestamp")
            + Duration::seconds(secs)
    }

    #[test]
    fn stamps_at_most_once_per_window() {
        let mut log = TranscriptLog::default();
        log.append("ok yeah", ts(0));
        log.append("let's cut the Airtable subscription", ts(5));
        log.append("and switch to annual", ts(14));
        log.append("next topic is hiring", ts(15));

        assert_eq!(
            log.as_str(),
            "[09:30:00] ok yeah let's cut the Airtable subscription and switch to annual\n\n[09:30:15] next topic is hiring"
        );
    }

    #[test]
    fn window_is_measured_from_the_last_stamp() {
        let mut log = TranscriptLog::new(Duration::seconds(15));
        log.append("one", ts(0));
        log.append("two", ts(10));
        log.append("three", ts(20));
        log.append("four", ts(30));
        assert_eq!(log.as_str(), "[09:30:00] one two\n\n[09:30:20] three four");
    }

    #[test]
    fn blank_fragments_are_ignored() {
        let mut log = TranscriptLog::default();
        log.append("   ", ts(0));
        assert!(log.is_empty());
    }

    #[test]
    fn saved_transcript_restamps_on_next_fragment() {
        let mut log = TranscriptLog::from_saved("[08:00:00] earlier", Duration::seconds(15));
        log.append("later", ts(0));
        assert_eq!(log.as_str(), "[08:00:00] earlier\n\n[09:30:00] later");
        log.clear();
        assert!(log.is_empty());
    }
}
