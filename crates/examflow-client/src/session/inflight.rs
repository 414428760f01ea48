//! Pending command table.
//!
//! Replies carry no correlation id, so at most one command of each
//! reply-bearing kind may be outstanding. `InProgress` is never tracked: the
//! server stays silent when nothing is held.

use std::time::Duration;

use tokio::time::Instant;

use examflow_protocol::CommandKind;

use super::error::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: CommandKind,
    sent_at: Instant,
    deadline: Instant,
}

/// Commands awaiting a reply, oldest first.
#[derive(Debug, Default)]
pub struct InFlight {
    pending: Vec<Pending>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn tracked(kind: CommandKind) -> bool {
        !matches!(kind, CommandKind::InProgress)
    }

    pub fn is_pending(&self, kind: CommandKind) -> bool {
        self.pending.iter().any(|p| p.kind == kind)
    }

    pub fn pending(&self) -> Vec<CommandKind> {
        self.pending.iter().map(|p| p.kind).collect()
    }

    /// Records a command about to be published.
    pub fn begin(&mut self, kind: CommandKind, now: Instant, timeout: Duration) -> SessionResult<()> {
        if !Self::tracked(kind) {
            return Ok(());
        }
        if self.is_pending(kind) {
            return Err(SessionError::CommandInFlight(kind));
        }
        self.pending.push(Pending {
            kind,
            sent_at: now,
            deadline: now + timeout,
        });
        Ok(())
    }

    /// A reply for `kind` arrived. Returns false if none was pending.
    pub fn complete(&mut self, kind: CommandKind) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.kind != kind);
        self.pending.len() != before
    }

    /// An error reply arrived; it answers the oldest command.
    pub fn complete_oldest(&mut self) -> Option<CommandKind> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0).kind)
        }
    }

    /// Removes and returns commands whose deadline passed, with their age.
    pub fn expire(&mut self, now: Instant) -> Vec<(CommandKind, Duration)> {
        let mut expired = Vec::new();
        self.pending.retain(|p| {
            if p.deadline <= now {
                expired.push((p.kind, now.duration_since(p.sent_at)));
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.deadline).min()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(15);

    #[tokio::test(start_paused = true)]
    async fn second_request_of_same_kind_is_rejected() {
        let mut inflight = InFlight::new();
        let now = Instant::now();
        inflight.begin(CommandKind::TakeNext, now, TIMEOUT).unwrap();
        assert_eq!(
            inflight.begin(CommandKind::TakeNext, now, TIMEOUT),
            Err(SessionError::CommandInFlight(CommandKind::TakeNext))
        );
        inflight.begin(CommandKind::QueueSize, now, TIMEOUT).unwrap();
        assert_eq!(
            inflight.pending(),
            vec![CommandKind::TakeNext, CommandKind::QueueSize]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn in_progress_is_not_tracked() {
        let mut inflight = InFlight::new();
        let now = Instant::now();
        inflight.begin(CommandKind::InProgress, now, TIMEOUT).unwrap();
        inflight.begin(CommandKind::InProgress, now, TIMEOUT).unwrap();
        assert!(inflight.pending().is_empty());
        assert_eq!(inflight.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn replies_clear_their_kind() {
        let mut inflight = InFlight::new();
        let now = Instant::now();
        inflight.begin(CommandKind::TakeNext, now, TIMEOUT).unwrap();
        assert!(inflight.complete(CommandKind::TakeNext));
        assert!(!inflight.complete(CommandKind::TakeNext));
        inflight.begin(CommandKind::TakeNext, now, TIMEOUT).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn error_reply_clears_oldest() {
        let mut inflight = InFlight::new();
        let now = Instant::now();
        inflight.begin(CommandKind::QueueSize, now, TIMEOUT).unwrap();
        inflight
            .begin(CommandKind::TakeNext, now + Duration::from_secs(1), TIMEOUT)
            .unwrap();

        assert_eq!(inflight.complete_oldest(), Some(CommandKind::QueueSize));
        assert_eq!(inflight.pending(), vec![CommandKind::TakeNext]);
        assert_eq!(inflight.complete_oldest(), Some(CommandKind::TakeNext));
        assert_eq!(inflight.complete_oldest(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_after_timeout() {
        let mut inflight = InFlight::new();
        let start = Instant::now();
        inflight.begin(CommandKind::TakeNext, start, TIMEOUT).unwrap();
        inflight
            .begin(CommandKind::QueueSize, start + Duration::from_secs(5), TIMEOUT)
            .unwrap();

        assert_eq!(inflight.next_deadline(), Some(start + TIMEOUT));
        assert!(inflight.expire(start + Duration::from_secs(14)).is_empty());

        let expired = inflight.expire(start + TIMEOUT);
        assert_eq!(expired, vec![(CommandKind::TakeNext, TIMEOUT)]);
        assert_eq!(inflight.pending(), vec![CommandKind::QueueSize]);
        assert_eq!(
            inflight.next_deadline(),
            Some(start + Duration::from_secs(20))
        );
    }
}
