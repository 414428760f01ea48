//! Exam-workflow destinations and command bodies.
//!
//! These strings are fixed by the backend and must match byte for byte.

use serde::Serialize;

use crate::error::ProtocolResult;

/// Endpoint path appended to the server base URL.
pub const ENDPOINT_PATH: &str = "/ws/exam-workflow";

/// Private delivery of the item assigned by take-next or in-process.
pub const QUEUE_ITEM_DETAILS: &str = "/user/queue/exam-workflow/item/details";
/// Private reply to a queue-size query (bare JSON integer).
pub const QUEUE_SIZE_REPLY: &str = "/user/queue/query-size-reply";
/// Private command rejections (plain text).
pub const ERRORS: &str = "/user/queue/errors";

pub const TAKE_NEXT: &str = "/app/exam-workflow/queue/take-next";
pub const IN_PROCESS: &str = "/app/exam-workflow/item/in-process";
pub const QUERY_QUEUE_SIZE: &str = "/app/exam-workflow/query/queue-size";

/// Logical queue used by the reception/billing desk.
pub const RECEPTION_QUEUE: &str = "reception";

/// Public broadcast topic for one queue.
pub fn queue_broadcast(queue_id: &str) -> String {
    format!("/topic/exam-workflow/queue/{}/list", queue_id)
}

/// Command kinds, used to gate duplicate requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    TakeNext,
    InProgress,
    QueueSize,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TakeNext => "take-next",
            Self::InProgress => "in-progress",
            Self::QueueSize => "queue-size",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TakeNextRequest<'a> {
    queue_id: &'a str,
}

/// A command published by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCommand {
    /// Ask for the next item of a queue.
    TakeNext { queue_id: String },
    /// Ask for redelivery of the item already held.
    InProgress,
    /// Ask for the current size of a queue.
    QueueSize { queue_id: String },
}

impl QueueCommand {
    pub fn take_next(queue_id: impl Into<String>) -> Self {
        Self::TakeNext {
            queue_id: queue_id.into(),
        }
    }

    pub fn queue_size(queue_id: impl Into<String>) -> Self {
        Self::QueueSize {
            queue_id: queue_id.into(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::TakeNext { .. } => CommandKind::TakeNext,
            Self::InProgress => CommandKind::InProgress,
            Self::QueueSize { .. } => CommandKind::QueueSize,
        }
    }

    pub fn destination(&self) -> &'static str {
        match self {
            Self::TakeNext { .. } => TAKE_NEXT,
            Self::InProgress => IN_PROCESS,
            Self::QueueSize { .. } => QUERY_QUEUE_SIZE,
        }
    }

    /// Body of the SEND frame.
    ///
    /// take-next is JSON, queue-size is the bare queue id, in-process is empty.
    pub fn body(&self) -> ProtocolResult<String> {
        match self {
            Self::TakeNext { queue_id } => Ok(serde_json::to_string(&TakeNextRequest {
                queue_id,
            })?),
            Self::InProgress => Ok(String::new()),
            Self::QueueSize { queue_id } => Ok(queue_id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_topic_per_queue() {
        assert_eq!(
            queue_broadcast("cardiology"),
            "/topic/exam-workflow/queue/cardiology/list"
        );
        assert_eq!(
            queue_broadcast(RECEPTION_QUEUE),
            "/topic/exam-workflow/queue/reception/list"
        );
    }

    #[test]
    fn command_bodies() {
        let take = QueueCommand::take_next("cardiology");
        assert_eq!(take.destination(), "/app/exam-workflow/queue/take-next");
        assert_eq!(take.body().unwrap(), r#"{"queueId":"cardiology"}"#);

        let size = QueueCommand::queue_size("dept-7");
        assert_eq!(size.destination(), "/app/exam-workflow/query/queue-size");
        assert_eq!(size.body().unwrap(), "dept-7");

        assert_eq!(QueueCommand::InProgress.body().unwrap(), "");
        assert_eq!(
            QueueCommand::InProgress.destination(),
            "/app/exam-workflow/item/in-process"
        );
    }

    #[test]
    fn queue_id_is_json_escaped() {
        let take = QueueCommand::take_next(r#"a"b"#);
        assert_eq!(take.body().unwrap(), r#"{"queueId":"a\"b"}"#);
    }
}
