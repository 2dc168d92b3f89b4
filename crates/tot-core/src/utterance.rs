use crate::wake_word::WakeWord;

pub const DEFAULT_MIN_WORDS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceRoute {
    /// Too short to act on; only recorded in the raw transcript.
    Noise,
    Command {
        command_text: String,
        full_text: String,
    },
    Content(String),
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn route_utterance(text: &str, wake_word: &WakeWord, min_words: usize) -> UtteranceRoute {
    let text = text.trim();
    if word_count(text) < min_words {
        return UtteranceRoute::Noise;
    }

    let detection = wake_word.detect(text);
    if detection.is_command {
        UtteranceRoute::Command {
            command_text: detection.command_text,
            full_text: text.to_string(),
        }
    } else {
        UtteranceRoute::Content(text.to_string())
    }
}
