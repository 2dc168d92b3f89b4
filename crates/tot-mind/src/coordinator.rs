use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use tot_core::{
    coalesce, parse_command_reply, parse_extraction_reply, CommandReply, CommandRequest,
    ExtractRequest, FragmentBuffer, MindMapData, ReasonerError,
};
use tracing::{debug, warn};

/// Identifies one remote merge call. The epoch changes on every reset, so a
/// ticket from before a reset can never match current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MergeTicket {
    pub epoch: u64,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "ticket", rename_all = "snake_case")]
pub enum MergePhase {
    Idle,
    Extracting(MergeTicket),
    CommandInFlight(MergeTicket),
}

impl MergePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting(_) => "extracting",
            Self::CommandInFlight(_) => "command_in_flight",
        }
    }
}

/// A remote call the caller must issue and later report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeJob {
    Extract {
        ticket: MergeTicket,
        request: ExtractRequest,
    },
    Command {
        ticket: MergeTicket,
        request: CommandRequest,
    },
}

impl MergeJob {
    pub fn ticket(&self) -> MergeTicket {
        match self {
            Self::Extract { ticket, .. } | Self::Command { ticket, .. } => *ticket,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The tree was replaced by the response.
    Applied { recall: Option<String> },
    /// The command was ordinary speech; its full text went back into the
    /// buffer.
    Passthrough,
    /// Failed or malformed response; the tree is unchanged.
    Rejected(String),
    /// A command was issued after this extraction started. The response was
    /// dropped and its text requeued.
    Superseded,
    /// The ticket belongs to an earlier epoch.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStep {
    pub outcome: MergeOutcome,
    pub next: Option<MergeJob>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outstanding {
    Extract { text: String },
    Command { full_text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedCommand {
    command_text: String,
    full_text: String,
}

/// Single mutator of the tree. Owns the fragment buffer and decides which
/// remote response is allowed to replace the tree.
#[derive(Debug)]
pub struct MergeCoordinator {
    tree: MindMapData,
    buffer: FragmentBuffer,
    phase: MergePhase,
    epoch: u64,
    next_seq: u64,
    outstanding: BTreeMap<MergeTicket, Outstanding>,
    queued_commands: VecDeque<QueuedCommand>,
    /// Extraction overtaken by a command but still on the wire. No new
    /// extraction is issued until it reports back and its text is requeued.
    preempted: Option<MergeTicket>,
}

impl Default for MergeCoordinator {
    fn default() -> Self {
        Self::new(MindMapData::empty())
    }
}

impl MergeCoordinator {
    pub fn new(tree: MindMapData) -> Self {
        Self {
            tree,
            buffer: FragmentBuffer::new(),
            phase: MergePhase::Idle,
            epoch: 0,
            next_seq: 0,
            outstanding: BTreeMap::new(),
            queued_commands: VecDeque::new(),
            preempted: None,
        }
    }

    pub fn tree(&self) -> &MindMapData {
        &self.tree
    }

    pub fn phase(&self) -> MergePhase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn pending_fragments(&self) -> usize {
        self.buffer.len()
    }

    pub fn queued_commands(&self) -> usize {
        self.queued_commands.len()
    }

    pub fn processing_command(&self) -> bool {
        matches!(self.phase, MergePhase::CommandInFlight(_))
    }

    pub fn push_fragment(&mut self, text: impl Into<String>) {
        self.buffer.push(text);
    }

    /// Replaces the tree and drops everything transient. Responses to calls
    /// issued before this point are ignored when they arrive.
    pub fn reset(&mut self, tree: MindMapData) {
        self.tree = tree;
        self.epoch += 1;
        self.buffer.clear();
        self.phase = MergePhase::Idle;
        self.outstanding.clear();
        self.queued_commands.clear();
        self.preempted = None;
    }

    /// Drops buffered fragments and queued commands but keeps the tree.
    /// Calls already on the wire keep their tickets and still apply.
    pub fn clear_transient(&mut self) {
        self.buffer.clear();
        self.queued_commands.clear();
    }

    pub fn request_extraction(&mut self) -> Option<MergeJob> {
        if self.phase != MergePhase::Idle || self.buffer.is_empty() {
            return None;
        }
        if let Some(preempted) = self.preempted {
            debug!("extraction_deferred: waiting on seq={}", preempted.seq);
            return None;
        }

        let text = coalesce(&self.buffer.drain_all());
        let ticket = self.issue_ticket();
        self.phase = MergePhase::Extracting(ticket);
        self.outstanding
            .insert(ticket, Outstanding::Extract { text: text.clone() });
        debug!(
            "extraction_issued: seq={} chars={}",
            ticket.seq,
            text.chars().count()
        );

        Some(MergeJob::Extract {
            ticket,
            request: ExtractRequest {
                new_text: text,
                current_map: self.tree.clone(),
            },
        })
    }

    /// Preempts any extraction. While another command is in flight the new
    /// one waits its turn.
    pub fn request_command(
        &mut self,
        command_text: impl Into<String>,
        full_text: impl Into<String>,
    ) -> Option<MergeJob> {
        let queued = QueuedCommand {
            command_text: command_text.into(),
            full_text: full_text.into(),
        };
        if self.processing_command() {
            debug!("command_queued: depth={}", self.queued_commands.len() + 1);
            self.queued_commands.push_back(queued);
            return None;
        }
        Some(self.issue_command(queued))
    }

    pub fn complete_extraction(
        &mut self,
        ticket: MergeTicket,
        result: Result<Value, ReasonerError>,
    ) -> MergeStep {
        if ticket.epoch != self.epoch {
            debug!("extraction_stale: seq={} epoch={}", ticket.seq, ticket.epoch);
            return MergeStep {
                outcome: MergeOutcome::Stale,
                next: None,
            };
        }

        let text = match self.outstanding.remove(&ticket) {
            Some(Outstanding::Extract { text }) => text,
            _ => {
                warn!("extraction_unknown_ticket: seq={}", ticket.seq);
                return MergeStep {
                    outcome: MergeOutcome::Stale,
                    next: None,
                };
            }
        };

        if self.phase != MergePhase::Extracting(ticket) {
            debug!("extraction_superseded: seq={} requeued", ticket.seq);
            if self.preempted == Some(ticket) {
                self.preempted = None;
            }
            self.buffer.requeue_front(text);
            return MergeStep {
                outcome: MergeOutcome::Superseded,
                next: self.request_extraction(),
            };
        }

        self.phase = MergePhase::Idle;
        let outcome = match result {
            Ok(value) => match parse_extraction_reply(&value, &self.tree) {
                Ok(reply) => {
                    self.tree = reply.mindmap;
                    MergeOutcome::Applied {
                        recall: reply.recall,
                    }
                }
                Err(err) => {
                    warn!("extraction_rejected: {err}");
                    MergeOutcome::Rejected(err.to_string())
                }
            },
            Err(err) => {
                warn!("extraction_failed: {err}");
                MergeOutcome::Rejected(err.to_string())
            }
        };

        MergeStep {
            outcome,
            next: self.request_extraction(),
        }
    }

    pub fn complete_command(
        &mut self,
        ticket: MergeTicket,
        result: Result<Value, ReasonerError>,
    ) -> MergeStep {
        if ticket.epoch != self.epoch || self.phase != MergePhase::CommandInFlight(ticket) {
            debug!("command_stale: seq={} epoch={}", ticket.seq, ticket.epoch);
            return MergeStep {
                outcome: MergeOutcome::Stale,
                next: None,
            };
        }

        let full_text = match self.outstanding.remove(&ticket) {
            Some(Outstanding::Command { full_text }) => full_text,
            _ => String::new(),
        };
        self.phase = MergePhase::Idle;

        let outcome = match result {
            Ok(value) => match parse_command_reply(&value, &self.tree) {
                Ok(CommandReply::Passthrough) => {
                    debug!("command_passthrough: seq={}", ticket.seq);
                    self.buffer.push(full_text);
                    MergeOutcome::Passthrough
                }
                Ok(CommandReply::Replace(tree)) => {
                    self.tree = tree;
                    MergeOutcome::Applied { recall: None }
                }
                Err(err) => {
                    warn!("command_rejected: {err}");
                    MergeOutcome::Rejected(err.to_string())
                }
            },
            Err(err) => {
                warn!("command_failed: {err}");
                MergeOutcome::Rejected(err.to_string())
            }
        };

        let next = match self.queued_commands.pop_front() {
            Some(queued) => Some(self.issue_command(queued)),
            None => self.request_extraction(),
        };

        MergeStep { outcome, next }
    }

    fn issue_command(&mut self, command: QueuedCommand) -> MergeJob {
        let ticket = self.issue_ticket();
        if let MergePhase::Extracting(preempted) = self.phase {
            debug!(
                "extraction_preempted: seq={} by command seq={}",
                preempted.seq, ticket.seq
            );
            self.preempted = Some(preempted);
        }
        self.phase = MergePhase::CommandInFlight(ticket);
        self.outstanding.insert(
            ticket,
            Outstanding::Command {
                full_text: command.full_text.clone(),
            },
        );

        MergeJob::Command {
            ticket,
            request: CommandRequest {
                command_text: command.command_text,
                full_text: command.full_text,
                current_map: self.tree.clone(),
            },
        }
    }

    fn issue_ticket(&mut self) -> MergeTicket {
        self.next_seq += 1;
        MergeTicket {
            epoch: self.epoch,
            seq: self.next_seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tot_core::{MindMapNode, ReasonerFailureKind};

    fn extract_parts(job: Option<MergeJob>) -> (MergeTicket, ExtractRequest) {
        match job {
            Some(MergeJob::Extract { ticket, request }) => (ticket, request),
            other => panic!("expected extraction job, got {other:?}"),
        }
    }

    fn command_parts(job: Option<MergeJob>) -> (MergeTicket, CommandRequest) {
        match job {
            Some(MergeJob::Command { ticket, request }) => (ticket, request),
            other => panic!("expected command job, got {other:?}"),
        }
    }

    fn finances() -> serde_json::Value {
        json!({
            "title": "Conversation",
            "children": [{"text": "Finances", "children": [{"text": "Cut Airtable"}]}]
        })
    }

    #[test]
    fn idle_with_empty_buffer_issues_nothing() {
        let mut coordinator = MergeCoordinator::default();
        assert_eq!(coordinator.request_extraction(), None);
        assert_eq!(coordinator.phase(), MergePhase::Idle);
    }

    #[test]
    fn extraction_drains_and_coalesces_in_order() {
        let mut coordinator = MergeCoordinator::default();
        coordinator.push_fragment("we should cut");
        coordinator.push_fragment("the Airtable subscription");

        let (ticket, request) = extract_parts(coordinator.request_extraction());
        assert_eq!(request.new_text, "we should cut the Airtable subscription");
        assert_eq!(request.current_map, MindMapData::empty());
        assert_eq!(coordinator.phase(), MergePhase::Extracting(ticket));
        assert_eq!(coordinator.pending_fragments(), 0);
    }

    #[test]
    fn second_extraction_request_is_single_flight() {
        let mut coordinator = MergeCoordinator::default();
        coordinator.push_fragment("first batch of words");
        let (ticket, _) = extract_parts(coordinator.request_extraction());

        coordinator.push_fragment("second batch of words");
        assert_eq!(coordinator.request_extraction(), None);
        assert_eq!(coordinator.pending_fragments(), 1);

        let step = coordinator.complete_extraction(ticket, Ok(finances()));
        assert_eq!(step.outcome, MergeOutcome::Applied { recall: None });
        let (_, request) = extract_parts(step.next);
        assert_eq!(request.new_text, "second batch of words");
        assert_eq!(request.current_map.children[0].text, "Finances");
    }

    #[test]
    fn applied_extraction_replaces_tree_verbatim() {
        let mut coordinator = MergeCoordinator::default();
        coordinator.push_fragment("let's cut the Airtable subscription");
        let (ticket, _) = extract_parts(coordinator.request_extraction());

        let step = coordinator.complete_extraction(ticket, Ok(finances()));
        assert_eq!(step.next, None);
        assert_eq!(
            coordinator.tree(),
            &MindMapData::new(
                "Conversation",
                vec![MindMapNode::branch(
                    "Finances",
                    vec![MindMapNode::leaf("Cut Airtable")]
                )]
            )
        );
        assert_eq!(coordinator.phase(), MergePhase::Idle);
    }

    #[test]
    fn recall_is_forwarded_with_the_tree() {
        let mut coordinator = MergeCoordinator::default();
        coordinator.push_fragment("what were we talking about");
        let (ticket, _) = extract_parts(coordinator.request_extraction());

        let step = coordinator.complete_extraction(
            ticket,
            Ok(json!({"children": [], "recall": "You covered Finances."})),
        );
        assert_eq!(
            step.outcome,
            MergeOutcome::Applied {
                recall: Some("You covered Finances.".to_string())
            }
        );
    }

    #[test]
    fn malformed_or_failed_responses_keep_the_tree() {
        let mut coordinator = MergeCoordinator::default();
        coordinator.push_fragment("let's cut the Airtable subscription");
        let (ticket, _) = extract_parts(coordinator.request_extraction());
        coordinator.complete_extraction(ticket, Ok(finances()));
        let before = coordinator.tree().clone();

        coordinator.push_fragment("something else entirely here");
        let (ticket, _) = extract_parts(coordinator.request_extraction());
        let step = coordinator.complete_extraction(ticket, Ok(json!({"title": "nope"})));
        assert!(matches!(step.outcome, MergeOutcome::Rejected(_)));
        assert_eq!(coordinator.tree(), &before);
        assert_eq!(coordinator.phase(), MergePhase::Idle);

        coordinator.push_fragment("and yet another thought");
        let (ticket, _) = extract_parts(coordinator.request_extraction());
        let step = coordinator.complete_extraction(
            ticket,
            Err(ReasonerError::new(ReasonerFailureKind::Status, "500")),
        );
        assert!(matches!(step.outcome, MergeOutcome::Rejected(_)));
        assert_eq!(coordinator.tree(), &before);
        assert_eq!(coordinator.phase(), MergePhase::Idle);
    }

    #[test]
    fn command_preempts_and_stale_extraction_is_requeued() {
        let mut coordinator = MergeCoordinator::default();
        coordinator.push_fragment("budget for Notion is high");
        let (extract_ticket, _) = extract_parts(coordinator.request_extraction());

        let (command_ticket, request) = command_parts(
            coordinator.request_command("add a Hiring branch", "Poppy add a Hiring branch"),
        );
        assert_eq!(request.command_text, "add a Hiring branch");
        assert_eq!(coordinator.phase(), MergePhase::CommandInFlight(command_ticket));
        assert!(coordinator.processing_command());

        // The extraction answers first but must not win.
        let step = coordinator.complete_extraction(extract_ticket, Ok(finances()));
        assert_eq!(step.outcome, MergeOutcome::Superseded);
        assert_eq!(step.next, None);
        assert_eq!(coordinator.tree(), &MindMapData::empty());
        assert_eq!(coordinator.pending_fragments(), 1);

        let step = coordinator.complete_command(
            command_ticket,
            Ok(json!({"title": "Conversation", "children": [{"text": "Hiring"}]})),
        );
        assert_eq!(step.outcome, MergeOutcome::Applied { recall: None });
        assert_eq!(coordinator.tree().children[0].text, "Hiring");

        let (_, request) = extract_parts(step.next);
        assert_eq!(request.new_text, "budget for Notion is high");
        assert_eq!(request.current_map.children[0].text, "Hiring");
    }

    #[test]
    fn stale_extraction_arriving_after_command_reissues() {
        let mut coordinator = MergeCoordinator::default();
        coordinator.push_fragment("budget for Notion is high");
        let (extract_ticket, _) = extract_parts(coordinator.request_extraction());
        let (command_ticket, _) =
            command_parts(coordinator.request_command("add Hiring", "Poppy add Hiring"));

        let step = coordinator.complete_command(
            command_ticket,
            Ok(json!({"children": [{"text": "Hiring"}]})),
        );
        assert_eq!(step.next, None);

        let step = coordinator.complete_extraction(extract_ticket, Ok(finances()));
        assert_eq!(step.outcome, MergeOutcome::Superseded);
        assert_eq!(coordinator.tree().children[0].text, "Hiring");
        let (_, request) = extract_parts(step.next);
        assert_eq!(request.new_text, "budget for Notion is high");
    }

    #[test]
    fn passthrough_pushes_full_utterance_as_content() {
        let mut coordinator = MergeCoordinator::default();
        let (ticket, _) = command_parts(coordinator.request_command(
            "told me about the launch",
            "Poppy told me about the launch",
        ));

        let step = coordinator.complete_command(
            ticket,
            Ok(json!({"passthrough": true, "currentMap": {"title": "x", "children": []}})),
        );
        assert_eq!(step.outcome, MergeOutcome::Passthrough);
        assert_eq!(coordinator.tree(), &MindMapData::empty());

        let (_, request) = extract_parts(step.next);
        assert_eq!(request.new_text, "Poppy told me about the launch");
    }

    #[test]
    fn commands_run_one_at_a_time_in_order() {
        let mut coordinator = MergeCoordinator::default();
        let (first, _) = command_parts(coordinator.request_command("one", "Poppy one two three"));
        assert_eq!(
            coordinator.request_command("two", "Poppy two three four"),
            None
        );
        assert_eq!(coordinator.queued_commands(), 1);

        let step = coordinator.complete_command(
            first,
            Err(ReasonerError::new(ReasonerFailureKind::Transport, "reset")),
        );
        assert!(matches!(step.outcome, MergeOutcome::Rejected(_)));
        let (second, request) = command_parts(step.next);
        assert_eq!(request.command_text, "two");
        assert_eq!(coordinator.phase(), MergePhase::CommandInFlight(second));
    }

    #[test]
    fn reset_drops_late_responses() {
        let mut coordinator = MergeCoordinator::default();
        coordinator.push_fragment("let's cut the Airtable subscription");
        let (ticket, _) = extract_parts(coordinator.request_extraction());

        coordinator.reset(MindMapData::empty());
        assert_eq!(coordinator.phase(), MergePhase::Idle);

        let step = coordinator.complete_extraction(ticket, Ok(finances()));
        assert_eq!(step.outcome, MergeOutcome::Stale);
        assert!(coordinator.tree().is_empty());
        assert_eq!(coordinator.pending_fragments(), 0);
    }

    #[test]
    fn clear_transient_keeps_tree_and_in_flight_calls() {
        let mut coordinator = MergeCoordinator::default();
        coordinator.push_fragment("let's cut the Airtable subscription");
        let (ticket, _) = extract_parts(coordinator.request_extraction());
        coordinator.complete_extraction(ticket, Ok(finances()));

        coordinator.push_fragment("pending words never sent");
        let (command_ticket, _) = command_parts(coordinator.request_command("x", "Poppy x y z"));
        assert_eq!(coordinator.request_command("y", "Poppy y z w"), None);
        coordinator.clear_transient();

        assert_eq!(coordinator.pending_fragments(), 0);
        assert_eq!(coordinator.queued_commands(), 0);
        assert_eq!(coordinator.phase(), MergePhase::CommandInFlight(command_ticket));
        assert_eq!(coordinator.tree().children[0].text, "Finances");

        let step = coordinator.complete_command(
            command_ticket,
            Ok(json!({"children": [{"text": "Hiring"}]})),
        );
        assert_eq!(step.outcome, MergeOutcome::Applied { recall: None });
        assert_eq!(step.next, None);
        assert_eq!(coordinator.tree().children[0].text, "Hiring");
    }

    #[test]
    fn extraction_in_flight_across_clear_transient_still_applies() {
        let mut coordinator = MergeCoordinator::default();
        coordinator.push_fragment("let's cut the Airtable subscription");
        let (ticket, _) = extract_parts(coordinator.request_extraction());

        coordinator.clear_transient();
        coordinator.push_fragment("spoken after resuming here");
        assert_eq!(coordinator.request_extraction(), None);

        let step = coordinator.complete_extraction(ticket, Ok(finances()));
        assert_eq!(step.outcome, MergeOutcome::Applied { recall: None });
        assert_eq!(coordinator.tree().children[0].text, "Finances");
        let (_, request) = extract_parts(step.next);
        assert_eq!(request.new_text, "spoken after resuming here");
    }

    #[test]
    fn preempted_extraction_blocks_new_extractions_until_it_returns() {
        let mut coordinator = MergeCoordinator::default();
        coordinator.push_fragment("older content spoken first");
        let (older, _) = extract_parts(coordinator.request_extraction());

        let (command, _) = command_parts(
            coordinator.request_command("tell me something", "Poppy tell me something"),
        );
        let step = coordinator.complete_command(command, Ok(json!({"passthrough": true})));
        assert_eq!(step.outcome, MergeOutcome::Passthrough);
        assert_eq!(step.next, None);
        assert_eq!(coordinator.phase(), MergePhase::Idle);
        assert_eq!(coordinator.pending_fragments(), 1);

        coordinator.push_fragment("more words arrive meanwhile");
        assert_eq!(coordinator.request_extraction(), None);

        let step = coordinator.complete_extraction(older, Ok(finances()));
        assert_eq!(step.outcome, MergeOutcome::Superseded);
        let (_, request) = extract_parts(step.next);
        assert_eq!(
            request.new_text,
            "older content spoken first Poppy tell me something more words arrive meanwhile"
        );
        assert!(coordinator.tree().is_empty());
    }

    #[test]
    fn reset_clears_a_preempted_extraction() {
        let mut coordinator = MergeCoordinator::default();
        coordinator.push_fragment("older content spoken first");
        let (older, _) = extract_parts(coordinator.request_extraction());
        command_parts(coordinator.request_command("x", "Poppy x y z"));

        coordinator.reset(MindMapData::empty());
        coordinator.push_fragment("a brand new session starts");
        extract_parts(coordinator.request_extraction());

        let step = coordinator.complete_extraction(older, Ok(finances()));
        assert_eq!(step.outcome, MergeOutcome::Stale);
    }
}
