use serde::{Deserialize, Serialize};

use crate::poll::Snapshot;

/// Frames a viewer can send over its socket.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum IncomingMessage {
    JoinPoll(String),
    LeavePoll(String),
}

impl std::fmt::Display for IncomingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::JoinPoll(poll_id) => write!(f, "join {poll_id}"),
            Self::LeavePoll(poll_id) => write!(f, "leave {poll_id}"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum OutgoingMessage {
    PollUpdated(Snapshot),
    Subscribed(String),
    Unsubscribed(String),
    Error(String),
}

impl OutgoingMessage {
    pub fn json(&self) -> String {
        match serde_json::to_string(&self) {
            Ok(text) => text,
            Err(e) => {
                error!("Could not serialize outgoing message: {e}");
                String::new()
            }
        }
    }
}
