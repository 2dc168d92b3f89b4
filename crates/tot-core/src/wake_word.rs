use regex::Regex;

pub const DEFAULT_WAKE_WORD: &str = "poppy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDetection {
    pub is_command: bool,
    pub command_text: String,
}

impl CommandDetection {
    fn not_a_command() -> Self {
        Self {
            is_command: false,
            command_text: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WakeWord {
    keyword: String,
    /// Case-insensitive literal match; `None` only when the keyword is too
    /// large to compile, in which case nothing matches.
    pattern: Option<Regex>,
}

impl PartialEq for WakeWord {
    fn eq(&self, other: &Self) -> bool {
        self.keyword == other.keyword
    }
}

impl Eq for WakeWord {}

impl Default for WakeWord {
    fn default() -> Self {
        Self::new(DEFAULT_WAKE_WORD)
    }
}

impl WakeWord {
    pub fn new(keyword: impl Into<String>) -> Self {
        let keyword = keyword.into();
        let keyword = keyword.trim();
        let keyword = if keyword.is_empty() {
            DEFAULT_WAKE_WORD
        } else {
            keyword
        };
        Self {
            keyword: keyword.to_string(),
            pattern: Regex::new(&format!("(?i){}", regex::escape(keyword))).ok(),
        }
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn mentions(&self, text: &str) -> bool {
        self.pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(text))
    }

    pub fn detect(&self, utterance: &str) -> CommandDetection {
        let Some(found) = self.pattern.as_ref().and_then(|pattern| pattern.find(utterance)) else {
            return CommandDetection::not_a_command();
        };

        let remainder = utterance[found.end()..]
            .trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .trim_end();
        let command_text = if remainder.is_empty() {
            utterance.trim()
        } else {
            remainder
        };

        CommandDetection {
            is_command: true,
            command_text: command_text.to_string(),
        }
    }
}
