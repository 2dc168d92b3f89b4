use serde::{Deserialize, Serialize};

pub const DEFAULT_MINDMAP_TITLE: &str = "Conversation";
pub const UNTITLED: &str = "Untitled";
const FALLBACK_TITLE_TOPICS: usize = 3;

/// One labelled node. Depth is whatever the reasoning service returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MindMapNode {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MindMapNode>,
}

impl MindMapNode {
    pub fn leaf(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            children: Vec::new(),
        }
    }

    pub fn branch(text: impl Into<String>, children: Vec<MindMapNode>) -> Self {
        Self {
            text: text.into(),
            children,
        }
    }

    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(MindMapNode::node_count)
            .sum::<usize>()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MindMapData {
    pub title: String,
    pub children: Vec<MindMapNode>,
}

impl Default for MindMapData {
    fn default() -> Self {
        Self::empty()
    }
}

impl MindMapData {
    pub fn empty() -> Self {
        Self {
            title: DEFAULT_MINDMAP_TITLE.to_string(),
            children: Vec::new(),
        }
    }

    pub fn new(title: impl Into<String>, children: Vec<MindMapNode>) -> Self {
        Self {
            title: title.into(),
            children,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.children.iter().map(MindMapNode::node_count).sum()
    }

    pub fn top_level_topics(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|node| node.text.as_str())
    }

    /// Title derived from the first top-level topics, used until an AI
    /// title replaces it.
    pub fn fallback_title(&self) -> String {
        let topics = self
            .top_level_topics()
            .take(FALLBACK_TITLE_TOPICS)
            .collect::<Vec<_>>();
        if topics.is_empty() {
            return UNTITLED.to_string();
        }
        let joined = topics.join(", ");
        if self.children.len() > FALLBACK_TITLE_TOPICS {
            format!("{joined}…")
        } else {
            joined
        }
    }

    pub fn title_or_default(&self) -> &str {
        let trimmed = self.title.trim();
        if trimmed.is_empty() {
            DEFAULT_MINDMAP_TITLE
        } else {
            trimmed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finances() -> MindMapData {
        MindMapData::new(
            "Conversation",
            vec![MindMapNode::branch(
                "Finances",
                vec![MindMapNode::leaf("Cut Airtable")],
            )],
        )
    }

    #[test]
    fn empty_mindmap_has_default_title_and_no_children() {
        let empty = MindMapData::empty();
        assert_eq!(empty.title, "Conversation");
        assert!(empty.is_empty());
        assert_eq!(empty, MindMapData::default());
    }

    #[test]
    fn leaf_children_are_optional_on_the_wire() {
        let parsed: MindMapData = serde_json::from_str(
            r#"{"title":"Conversation","children":[{"text":"Finances","children":[{"text":"Cut Airtable"}]}]}"#,
        )
        .expect("parse mindmap");
        assert_eq!(parsed, finances());

        let encoded = serde_json::to_string(&parsed).expect("encode");
        assert!(!encoded.contains(r#""Cut Airtable","children""#));
    }

    #[test]
    fn fallback_title_joins_first_three_topics() {
        assert_eq!(MindMapData::empty().fallback_title(), "Untitled");
        assert_eq!(finances().fallback_title(), "Finances");

        let many = MindMapData::new(
            "Conversation",
            ["Finances", "Hiring", "Travel", "Recent"]
                .into_iter()
                .map(MindMapNode::leaf)
                .collect(),
        );
        assert_eq!(many.fallback_title(), "Finances, Hiring, Travel…");
    }

    #[test]
    fn node_count_walks_the_whole_tree() {
        assert_eq!(finances().node_count(), 2);
    }
}
