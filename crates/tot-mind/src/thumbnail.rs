use thiserror::Error;
use tot_core::render::to_mermaid;
use tot_core::MindMapData;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("thumbnail render failed: {0}")]
pub struct ThumbnailError(pub String);

/// Produces the archived thumbnail reference for a tree.
pub trait ThumbnailRenderer: Send + Sync {
    fn render(&self, mindmap: &MindMapData) -> Result<String, ThumbnailError>;
}

/// Stores Mermaid `mindmap` source; any Mermaid renderer can rasterize it
/// later.
#[derive(Debug, Default, Clone, Copy)]
pub struct MermaidThumbnail;

impl ThumbnailRenderer for MermaidThumbnail {
    fn render(&self, mindmap: &MindMapData) -> Result<String, ThumbnailError> {
        if mindmap.is_empty() {
            return Err(ThumbnailError("mind map has no nodes".to_string()));
        }
        Ok(to_mermaid(mindmap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tot_core::MindMapNode;

    #[test]
    fn renders_only_non_empty_trees() {
        assert!(MermaidThumbnail.render(&MindMapData::empty()).is_err());

        let tree = MindMapData::new("Conversation", vec![MindMapNode::leaf("Finances")]);
        let thumbnail = MermaidThumbnail.render(&tree).expect("render");
        assert!(thumbnail.starts_with("mindmap\n"));
        assert!(thumbnail.contains("Finances"));
    }
}
