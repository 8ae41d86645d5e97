//! Event Emitter
//!
//! Ordered, one-directional push stream of turn lifecycle events. The
//! emitter owns the sending half of a bounded channel and a cancellation
//! token; a closed receiver means the client went away and cancels the turn.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::tool::DeferredAction;

/// Events emitted while processing a turn
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    /// Final answer text delta
    Text { content: String },

    /// Reasoning delta (never persisted)
    Thought { content: String },

    /// Emitted before the tool runs
    ToolCall {
        name: String,
        args: serde_json::Value,
    },

    /// Emitted after the tool runs
    ToolResult {
        name: String,
        result: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deferred: Option<DeferredAction>,
    },

    /// Conversation title generated after the first exchange
    Title { title: String },

    Error { message: String },

    /// Terminal marker
    Done { conversation_id: String },
}

impl AgentEvent {
    /// Event name used for SSE `event:` fields
    pub fn event_type(&self) -> &'static str {
        match self {
            AgentEvent::Text { .. } => "text",
            AgentEvent::Thought { .. } => "thought",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::Title { .. } => "title",
            AgentEvent::Error { .. } => "error",
            AgentEvent::Done { .. } => "done",
        }
    }
}

/// Sending side of a turn's event stream
#[derive(Clone, Debug)]
pub struct EventEmitter {
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<AgentEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Emitter plus the receiver the caller drains
    pub fn channel(buffer: usize, cancel: CancellationToken) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx, cancel), rx)
    }

    /// Push an event; returns false once the turn is cancelled.
    ///
    /// Nothing is sent after cancellation. A send to a closed receiver
    /// cancels the token.
    pub async fn emit(&self, event: AgentEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
            return false;
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let event = AgentEvent::ToolCall {
            name: "list_projects".into(),
            args: json!({}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["name"], "list_projects");

        let done = serde_json::to_value(AgentEvent::Done {
            conversation_id: "c1".into(),
        })
        .unwrap();
        assert_eq!(done, json!({"type": "done", "conversationId": "c1"}));
    }

    #[test]
    fn test_event_type_matches_tag() {
        let events = vec![
            AgentEvent::Text { content: "a".into() },
            AgentEvent::Thought { content: "b".into() },
            AgentEvent::ToolResult {
                name: "x".into(),
                result: json!({}),
                deferred: None,
            },
            AgentEvent::Title { title: "t".into() },
            AgentEvent::Error { message: "e".into() },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.event_type());
        }
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels() {
        let cancel = CancellationToken::new();
        let (emitter, rx) = EventEmitter::channel(4, cancel.clone());
        drop(rx);

        assert!(!emitter.emit(AgentEvent::Text { content: "x".into() }).await);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_no_events_after_cancel() {
        let cancel = CancellationToken::new();
        let (emitter, mut rx) = EventEmitter::channel(4, cancel.clone());

        assert!(emitter.emit(AgentEvent::Text { content: "a".into() }).await);
        cancel.cancel();
        assert!(!emitter.emit(AgentEvent::Text { content: "b".into() }).await);
        drop(emitter);

        assert_eq!(rx.recv().await, Some(AgentEvent::Text { content: "a".into() }));
        assert_eq!(rx.recv().await, None);
    }
}
