use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_RECALL_TTL: Duration = Duration::from_secs(6);

/// Holds at most one recall message. Each `show` re-arms the expiry, so the
/// newest message always gets the full lifetime.
#[derive(Debug, Clone)]
pub struct RecallNotifier {
    ttl: Duration,
    current: Option<(String, Instant)>,
}

impl Default for RecallNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_RECALL_TTL)
    }
}

impl RecallNotifier {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, current: None }
    }

    pub fn show(&mut self, message: impl Into<String>, now: Instant) {
        self.current = Some((message.into(), now + self.ttl));
    }

    pub fn dismiss(&mut self) {
        self.current = None;
    }

    pub fn current(&self, now: Instant) -> Option<&str> {
        match &self.current {
            Some((message, deadline)) if now < *deadline => Some(message.as_str()),
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().map(|(_, deadline)| *deadline)
    }

    /// Returns true when a message was cleared.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.current = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_expires_after_ttl() {
        let t0 = Instant::now();
        let mut recall = RecallNotifier::default();
        recall.show("X", t0);

        assert_eq!(recall.current(t0 + Duration::from_millis(5_999)), Some("X"));
        assert_eq!(recall.current(t0 + Duration::from_secs(6)), None);
        assert!(recall.expire(t0 + Duration::from_secs(6)));
        assert_eq!(recall.deadline(), None);
    }

    #[test]
    fn newer_message_rearms_expiry() {
        let t0 = Instant::now();
        let mut recall = RecallNotifier::default();
        recall.show("X", t0);
        recall.show("Y", t0 + Duration::from_secs(2));

        assert!(!recall.expire(t0 + Duration::from_secs(6)));
        assert_eq!(recall.current(t0 + Duration::from_secs(6)), Some("Y"));
        assert_eq!(recall.current(t0 + Duration::from_secs(8)), None);
    }

    #[test]
    fn dismiss_clears_immediately() {
        let t0 = Instant::now();
        let mut recall = RecallNotifier::new(Duration::from_secs(1));
        recall.show("X", t0);
        recall.dismiss();
        assert_eq!(recall.current(t0), None);
        assert!(!recall.expire(t0 + Duration::from_secs(5)));
    }
}
