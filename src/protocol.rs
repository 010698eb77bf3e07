//! Wire protocol: envelopes, parts, tool payloads.
//!
//! Every turn between harness and agent is an envelope carrying an ordered
//! list of parts. A part is either free text or a JSON data payload. Data
//! payloads carry exactly one of `tools`, `tool_calls`, or `tool_results`.
//! The interpretation of an envelope depends only on its parts, in order,
//! not on transport framing.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::EvalError;

// ---------------------------------------------------------------------------
// Parts and envelopes
// ---------------------------------------------------------------------------

/// One ordered element of an envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Part {
    Text { text: String },
    Data { data: Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn data(data: Value) -> Self {
        Part::Data { data }
    }
}

/// A single message in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub role: String,
    pub parts: Vec<Part>,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl Envelope {
    pub fn new(role: impl Into<String>, parts: Vec<Part>) -> Self {
        Envelope {
            role: role.into(),
            parts,
            message_id: Uuid::new_v4().to_string(),
            context_id: None,
        }
    }

    /// Opening turn: combined instruction text plus the tool catalog as a
    /// data part. The agent sees the tool descriptors exactly once, here.
    pub fn first_turn(instructions: impl Into<String>, tools: &[ToolDescriptor]) -> Result<Self> {
        let tools_json = serde_json::to_value(tools)?;
        Ok(Envelope::new(
            "user",
            vec![
                Part::text(instructions),
                Part::data(json!({ "tools": tools_json })),
            ],
        ))
    }

    /// Follow-up user utterance, plain text only.
    pub fn user_text(text: impl Into<String>) -> Self {
        Envelope::new("user", vec![Part::text(text)])
    }

    /// Tool results for a previously requested batch, order-preserving.
    pub fn tool_results(results: &[ToolResult]) -> Result<Self> {
        let payload = serde_json::to_value(results)?;
        Ok(Envelope::new(
            "user",
            vec![Part::data(json!({ "tool_results": payload }))],
        ))
    }

    /// Concatenated text of all text parts, in order.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                Part::Data { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ---------------------------------------------------------------------------
// Tool payloads
// ---------------------------------------------------------------------------

/// Tool offered to the agent in the opening turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped parameter object.
    pub parameters: Value,
}

/// One invocation requested by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
    /// Correlates results back to calls. Generated when the agent omits it.
    #[serde(default = "new_call_id")]
    pub tool_call_id: String,
}

fn new_call_id() -> String {
    Uuid::new_v4().to_string()
}

/// Outcome of one tool invocation, echoed back to the agent.
///
/// Failures carry the `"Error: "` prefix in `content` rather than a
/// separate status field, matching what the agent under test is told to
/// expect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_name: String,
    pub tool_call_id: String,
    pub content: String,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, content: impl Into<String>) -> Self {
        ToolResult {
            tool_name: call.tool_name.clone(),
            tool_call_id: call.tool_call_id.clone(),
            content: content.into(),
        }
    }

    pub fn failure(call: &ToolCall, message: impl Into<String>) -> Self {
        ToolResult {
            tool_name: call.tool_name.clone(),
            tool_call_id: call.tool_call_id.clone(),
            content: format!("Error: {}", message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.content.starts_with("Error: ")
    }
}

// ---------------------------------------------------------------------------
// Agent reply parsing
// ---------------------------------------------------------------------------

/// Sentinel used when the agent returns an empty or whitespace-only reply.
pub const EMPTY_REPLY_SENTINEL: &str = "(no response)";

/// Structured view of an agent envelope.
#[derive(Debug, Clone, Default)]
pub struct AgentReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl AgentReply {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Parse an inbound agent envelope.
    ///
    /// Text parts concatenate into the reply text. A data part with a
    /// `tool_calls` array yields the call batch. Any other data payload is
    /// a protocol violation. An envelope with no parts, or whose text is
    /// empty and carries no calls, gets the sentinel text: an empty reply
    /// is recorded and judged, never treated as an error.
    pub fn parse(envelope: &Envelope) -> Result<Self> {
        let mut text_chunks: Vec<&str> = Vec::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        for part in &envelope.parts {
            match part {
                Part::Text { text } => text_chunks.push(text),
                Part::Data { data } => {
                    let Some(obj) = data.as_object() else {
                        bail!(EvalError::Protocol(format!(
                            "data part is not an object: {data}"
                        )));
                    };
                    match obj.get("tool_calls") {
                        Some(calls) => {
                            let parsed: Vec<ToolCall> = serde_json::from_value(calls.clone())
                                .map_err(|e| {
                                    EvalError::Protocol(format!("bad tool_calls payload: {e}"))
                                })?;
                            tool_calls.extend(parsed);
                        }
                        None => {
                            bail!(EvalError::Protocol(format!(
                                "unexpected data payload keys: {:?}",
                                obj.keys().collect::<Vec<_>>()
                            )));
                        }
                    }
                }
            }
        }

        let text = text_chunks.join("\n").trim().to_string();
        let text = if text.is_empty() && tool_calls.is_empty() {
            EMPTY_REPLY_SENTINEL.to_string()
        } else {
            text
        };

        Ok(AgentReply { text, tool_calls })
    }
}
