use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use std::sync::Arc;
use tot_core::render::{to_mermaid, to_outline};
use tot_core::{Conversation, MindMapReasoner};
use tot_mind::generate_title;
use tot_storage::ConversationArchive;

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum ArchiveCommand {
    /// List saved conversations, newest first
    List,
    /// Print one saved conversation
    Show(ShowArgs),
    /// Set a conversation's title
    Rename { id: String, title: String },
    /// Delete a saved conversation
    Delete { id: String },
    /// Ask the reasoner for a fresh title
    Retitle { id: String },
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub id: String,
    #[arg(long, value_enum, default_value_t = ShowFormat::Outline)]
    pub format: ShowFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShowFormat {
    Outline,
    Json,
    Mermaid,
    Transcript,
}

pub fn list_lines(archive: &dyn ConversationArchive) -> Result<Vec<String>> {
    let conversations = archive.list()?;
    Ok(conversations
        .iter()
        .map(|conversation| {
            format!(
                "{}  {}  {}",
                conversation.id,
                conversation.updated_at.format("%Y-%m-%d %H:%M"),
                conversation.title
            )
        })
        .collect())
}

pub fn render_conversation(conversation: &Conversation, format: ShowFormat) -> Result<String> {
    let rendered = match format {
        ShowFormat::Outline => format!(
            "title: {}\n{}",
            conversation.title,
            to_outline(&conversation.mindmap)
        ),
        ShowFormat::Json => serde_json::to_string_pretty(conversation)?,
        ShowFormat::Mermaid => to_mermaid(&conversation.mindmap),
        ShowFormat::Transcript => conversation.transcript.clone(),
    };
    Ok(rendered)
}

fn require(archive: &dyn ConversationArchive, id: &str) -> Result<Conversation> {
    archive
        .get(id)?
        .with_context(|| format!("conversation not found: {id}"))
}

pub fn rename(archive: &dyn ConversationArchive, id: &str, title: &str) -> Result<()> {
    let title = title.trim();
    if title.is_empty() {
        bail!("title must not be empty");
    }
    if !archive.update_title(id, title)? {
        bail!("conversation not found: {id}");
    }
    Ok(())
}

pub fn delete(archive: &dyn ConversationArchive, id: &str) -> Result<()> {
    if !archive.delete(id)? {
        bail!("conversation not found: {id}");
    }
    Ok(())
}

/// Returns the stored title, which is unchanged when the reasoner had
/// nothing usable.
pub async fn retitle(
    archive: &dyn ConversationArchive,
    reasoner: &dyn MindMapReasoner,
    id: &str,
) -> Result<String> {
    let conversation = require(archive, id)?;
    match generate_title(reasoner, &conversation.mindmap).await {
        Some(title) => {
            archive.update_title(id, &title)?;
            Ok(title)
        }
        None => Ok(conversation.title),
    }
}

pub async fn run(
    command: ArchiveCommand,
    archive: &dyn ConversationArchive,
    reasoner: impl FnOnce() -> Result<Arc<dyn MindMapReasoner>>,
) -> Result<()> {
    match command {
        ArchiveCommand::List => {
            let lines = list_lines(archive)?;
            if lines.is_empty() {
                println!("No saved conversations");
            }
            for line in lines {
                println!("{line}");
            }
        }
        ArchiveCommand::Show(args) => {
            let conversation = require(archive, &args.id)?;
            println!("{}", render_conversation(&conversation, args.format)?);
        }
        ArchiveCommand::Rename { id, title } => rename(archive, &id, &title)?,
        ArchiveCommand::Delete { id } => delete(archive, &id)?,
        ArchiveCommand::Retitle { id } => {
            let reasoner = reasoner()?;
            let title = retitle(archive, reasoner.as_ref(), &id).await?;
            println!("{title}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tot_core::{
        CommandRequest, ExtractRequest, MindMapData, MindMapNode, ReasonerError,
        ReasonerFailureKind, TitleRequest,
    };
    use tot_storage::ConversationStore;

    struct TitleOnly(Option<&'static str>);

    #[async_trait::async_trait]
    impl MindMapReasoner for TitleOnly {
        async fn extract(&self, _request: &ExtractRequest) -> Result<Value, ReasonerError> {
            Err(ReasonerError::new(ReasonerFailureKind::Transport, "unused"))
        }

        async fn command(&self, _request: &CommandRequest) -> Result<Value, ReasonerError> {
            Err(ReasonerError::new(ReasonerFailureKind::Transport, "unused"))
        }

        async fn title(&self, _request: &TitleRequest) -> Result<Value, ReasonerError> {
            match self.0 {
                Some(title) => Ok(json!({ "title": title })),
                None => Err(ReasonerError::new(ReasonerFailureKind::Status, "500")),
            }
        }
    }

    fn seeded() -> (ConversationStore, Conversation) {
        let store = ConversationStore::open_in_memory().expect("store");
        let tree = MindMapData::new(
            "Conversation",
            vec![MindMapNode::branch(
                "Finances",
                vec![MindMapNode::leaf("cut Airtable")],
            )],
        );
        let saved = store
            .save(&tree, "cut Airtable", None, None)
            .expect("save");
        (store, saved)
    }

    #[test]
    fn outline_and_transcript_formats() {
        let (_store, saved) = seeded();
        let outline = render_conversation(&saved, ShowFormat::Outline).expect("outline");
        assert!(outline.starts_with(&format!("title: {}\n# ", saved.title)));
        assert!(outline.contains("Finances"));
        assert!(outline.contains("cut Airtable"));

        let transcript = render_conversation(&saved, ShowFormat::Transcript).expect("transcript");
        assert_eq!(transcript, "cut Airtable");

        let json = render_conversation(&saved, ShowFormat::Json).expect("json");
        let parsed: Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed["id"], saved.id.as_str());
        assert!(parsed.get("createdAt").is_some());
    }

    #[test]
    fn rename_rejects_blank_and_unknown() {
        let (store, saved) = seeded();
        assert!(rename(&store, &saved.id, "   ").is_err());
        assert!(rename(&store, "missing", "Budget").is_err());
        rename(&store, &saved.id, " Budget ").expect("rename");
        assert_eq!(store.get(&saved.id).expect("get").expect("row").title, "Budget");
    }

    #[test]
    fn delete_removes_from_listing() {
        let (store, saved) = seeded();
        assert_eq!(list_lines(&store).expect("list").len(), 1);
        delete(&store, &saved.id).expect("delete");
        assert!(list_lines(&store).expect("list").is_empty());
        assert!(delete(&store, &saved.id).is_err());
    }

    #[tokio::test]
    async fn retitle_keeps_old_title_on_failure() {
        let (store, saved) = seeded();

        let kept = retitle(&store, &TitleOnly(None), &saved.id).await.expect("retitle");
        assert_eq!(kept, saved.title);

        let fresh = retitle(&store, &TitleOnly(Some("Cutting Costs")), &saved.id)
            .await
            .expect("retitle");
        assert_eq!(fresh, "Cutting Costs");
        assert_eq!(
            store.get(&saved.id).expect("get").expect("row").title,
            "Cutting Costs"
        );
    }
}
