//! Live session orchestration: the merge coordinator that decides which
//! remote response may replace the mind map, the recall notifier, fragment
//! source plumbing and the session runtime that ties them to the archive.

pub mod config;
pub mod coordinator;
pub mod recall;
pub mod session;
pub mod source;
pub mod thumbnail;
pub mod title;

pub use config::SessionConfig;
pub use coordinator::{
    MergeCoordinator, MergeJob, MergeOutcome, MergePhase, MergeStep, MergeTicket,
};
pub use recall::{RecallNotifier, DEFAULT_RECALL_TTL};
pub use session::{spawn_session, SessionDeps, SessionError, SessionHandle, SessionSnapshot};
pub use source::{ChannelSource, FragmentSourceConnector, SourceConnection, SourceFeeder};
pub use thumbnail::{MermaidThumbnail, ThumbnailError, ThumbnailRenderer};
pub use title::generate_title;
