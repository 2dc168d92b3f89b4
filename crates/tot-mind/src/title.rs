use tot_core::{parse_title_reply, MindMapData, MindMapReasoner, TitleRequest};
use tracing::warn;

/// Asks the reasoner for a short title. `None` means keep whatever title is
/// already stored.
pub async fn generate_title(reasoner: &dyn MindMapReasoner, mindmap: &MindMapData) -> Option<String> {
    if mindmap.is_empty() {
        return None;
    }

    let request = TitleRequest {
        mindmap: mindmap.clone(),
    };
    match reasoner.title(&request).await {
        Ok(value) => parse_title_reply(&value),
        Err(err) => {
            warn!("title_failed: {err}");
            None
        }
    }
}
