pub mod conversation;
pub mod fragment_buffer;
pub mod merge;
pub mod mindmap;
pub mod reasoning;
pub mod render;
pub mod source;
pub mod transcript;
pub mod utterance;
pub mod wake_word;

pub use conversation::{Conversation, SessionStatus};
pub use fragment_buffer::{coalesce, FragmentBuffer};
pub use merge::{
    parse_command_reply, parse_extraction_reply, parse_title_reply, strip_code_fences,
    CommandReply, ContractError, ExtractionReply,
};
pub use mindmap::{MindMapData, MindMapNode, DEFAULT_MINDMAP_TITLE, UNTITLED};
pub use reasoning::{
    CommandRequest, ExtractRequest, MindMapReasoner, ReasonerError, ReasonerFailureKind,
    TitleRequest,
};
pub use source::{SourceError, SourceEvent};
pub use transcript::TranscriptLog;
pub use utterance::{route_utterance, word_count, UtteranceRoute, DEFAULT_MIN_WORDS};
pub use wake_word::{CommandDetection, WakeWord, DEFAULT_WAKE_WORD};
