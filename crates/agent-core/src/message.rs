//! Conversation Messages
//!
//! Turns and parts: the transcript format shared by the store, the turn loop
//! and every provider. A [`Turn`] is one role-tagged, ordered list of
//! [`Part`]s.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Role of a turn's author
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User input, or system-authored follow-ups sent on the user's behalf
    User,
    /// Upstream model output
    Model,
    /// Tool results answering the preceding model turn's calls
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Model => write!(f, "model"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A tagged payload within a turn.
///
/// `continuation_token` is opaque upstream state. It is carried on tool calls
/// and echoed verbatim on the matching tool result, never interpreted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Part {
    Text {
        text: String,
    },
    Binary {
        mime_type: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    ToolCall {
        name: String,
        args: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        continuation_token: Option<String>,
    },
    ToolResult {
        name: String,
        response: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        continuation_token: Option<String>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Part::Binary { .. })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Raw bytes with their mime type (uploads, tool-produced images)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryData {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl BinaryData {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn into_part(self) -> Part {
        Part::Binary {
            mime_type: self.mime_type,
            data: self.data,
        }
    }
}

/// One role-tagged, ordered list of parts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            parts: Vec::new(),
        }
    }

    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Model,
            parts,
        }
    }

    pub fn tool(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Tool,
            parts,
        }
    }

    /// Append text, merging into the previous part when it is also text
    pub fn push_text(&mut self, text: &str) {
        if let Some(Part::Text { text: last }) = self.parts.last_mut() {
            last.push_str(text);
        } else {
            self.parts.push(Part::text(text));
        }
    }

    pub fn push(&mut self, part: Part) {
        self.parts.push(part);
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    pub fn has_binary(&self) -> bool {
        self.parts.iter().any(Part::is_binary)
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.parts.iter().filter_map(|p| match p {
            Part::ToolCall {
                name,
                continuation_token,
                ..
            } => Some((name.as_str(), continuation_token.as_deref())),
            _ => None,
        })
    }
}

/// Check the replay invariants of a transcript.
///
/// - a tool turn holds only tool results, never binary parts
/// - every tool result answers a call from the most recent model turn, by
///   name, carrying that call's continuation token unchanged
pub fn validate_transcript(history: &[Turn]) -> Result<()> {
    let mut open_calls: VecDeque<(String, Option<String>)> = VecDeque::new();

    for (index, turn) in history.iter().enumerate() {
        match turn.role {
            Role::Model => {
                open_calls = turn
                    .tool_calls()
                    .map(|(name, token)| (name.to_string(), token.map(String::from)))
                    .collect();
            }
            Role::Tool => {
                for part in &turn.parts {
                    let Part::ToolResult {
                        name,
                        continuation_token,
                        ..
                    } = part
                    else {
                        return Err(AgentError::InvalidTranscript(format!(
                            "turn {index}: tool turn contains a non-result part"
                        )));
                    };

                    let pos = open_calls
                        .iter()
                        .position(|(call, _)| call == name)
                        .ok_or_else(|| {
                            AgentError::InvalidTranscript(format!(
                                "turn {index}: result for '{name}' has no matching call"
                            ))
                        })?;
                    let (_, token) = open_calls.remove(pos).unwrap_or_default();

                    if token != *continuation_token {
                        return Err(AgentError::InvalidTranscript(format!(
                            "turn {index}: continuation token for '{name}' was not echoed"
                        )));
                    }
                }
            }
            Role::User => {
                if turn.parts.iter().any(|p| matches!(p, Part::ToolResult { .. })) {
                    return Err(AgentError::InvalidTranscript(format!(
                        "turn {index}: user turn contains a tool result"
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Length of the longest prefix that leaves no tool call unanswered.
///
/// A model turn with calls and no following tool turn cannot be replayed
/// upstream, so an interrupted loop persists only up to this point.
pub fn consistent_prefix_len(history: &[Turn]) -> usize {
    match history.last() {
        Some(turn) if turn.role == Role::Model && turn.tool_calls().next().is_some() => {
            history.len() - 1
        }
        _ => history.len(),
    }
}

/// Serde adapter storing bytes as standard base64 strings
pub mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, token: Option<&str>) -> Part {
        Part::ToolCall {
            name: name.into(),
            args: json!({}),
            continuation_token: token.map(String::from),
        }
    }

    fn result(name: &str, token: Option<&str>) -> Part {
        Part::ToolResult {
            name: name.into(),
            response: json!({"ok": true}),
            continuation_token: token.map(String::from),
        }
    }

    #[test]
    fn test_push_text_merges_contiguous_text() {
        let mut turn = Turn::new(Role::Model);
        turn.push_text("Hello");
        turn.push_text(", world");
        turn.push(call("list_projects", None));
        turn.push_text("after");

        assert_eq!(turn.parts.len(), 3);
        assert_eq!(turn.parts[0].as_text(), Some("Hello, world"));
        assert_eq!(turn.text(), "Hello, worldafter");
    }

    #[test]
    fn test_part_serialization_uses_camel_case() {
        let part = Part::Binary {
            mime_type: "image/png".into(),
            data: vec![1, 2, 3],
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "binary");
        assert_eq!(json["mimeType"], "image/png");
        assert_eq!(json["data"], "AQID");

        let back: Part = serde_json::from_value(json).unwrap();
        assert_eq!(back, part);

        let with_token = serde_json::to_value(call("x", Some("sig"))).unwrap();
        assert_eq!(with_token["continuationToken"], "sig");
        let without = serde_json::to_value(call("x", None)).unwrap();
        assert!(without.get("continuationToken").is_none());
    }

    #[test]
    fn test_validate_accepts_well_formed_transcript() {
        let history = vec![
            Turn::user(vec![Part::text("list my projects")]),
            Turn::model(vec![call("list_projects", Some("sig-1"))]),
            Turn::tool(vec![result("list_projects", Some("sig-1"))]),
            Turn::model(vec![Part::text("You have two projects.")]),
        ];
        assert!(validate_transcript(&history).is_ok());
    }

    #[test]
    fn test_validate_rejects_binary_in_tool_turn() {
        let history = vec![
            Turn::model(vec![call("view_card_image", None)]),
            Turn::tool(vec![
                result("view_card_image", None),
                BinaryData::new("image/png", vec![0]).into_part(),
            ]),
        ];
        assert!(matches!(
            validate_transcript(&history),
            Err(AgentError::InvalidTranscript(_))
        ));
    }

    #[test]
    fn test_validate_rejects_dropped_token() {
        let history = vec![
            Turn::model(vec![call("list_projects", Some("sig-1"))]),
            Turn::tool(vec![result("list_projects", None)]),
        ];
        assert!(validate_transcript(&history).is_err());
    }

    #[test]
    fn test_consistent_prefix_drops_unanswered_calls() {
        let mut history = vec![
            Turn::user(vec![Part::text("hi")]),
            Turn::model(vec![call("list_projects", None)]),
        ];
        assert_eq!(consistent_prefix_len(&history), 1);

        history.push(Turn::tool(vec![result("list_projects", None)]));
        assert_eq!(consistent_prefix_len(&history), 3);
    }
}
