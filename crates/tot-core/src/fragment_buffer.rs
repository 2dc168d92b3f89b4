use std::collections::VecDeque;

/// Finalized fragments waiting for the next batched merge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FragmentBuffer {
    pending: VecDeque<String>,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: impl Into<String>) {
        self.pending.push_back(text.into());
    }

    /// Puts a batch back at the head, ahead of anything pushed since.
    pub fn requeue_front(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.trim().is_empty() {
            self.pending.push_front(text);
        }
    }

    pub fn drain_all(&mut self) -> Vec<String> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

pub fn coalesce(fragments: &[String]) -> String {
    fragments.join(" ")
}
