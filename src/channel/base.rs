//! Channel trait: the transport boundary to the agent under test.

use anyhow::Result;
use async_trait::async_trait;

use crate::protocol::Envelope;

/// Bidirectional exchange of message envelopes with the agent under test.
///
/// One channel instance serves one conversation; `new_conversation` on the
/// first send lets the transport establish fresh context (a new context id
/// for HTTP, a new session for anything stateful). Implementations own any
/// conversation-scoped transport state.
#[async_trait]
pub trait AgentChannel: Send {
    /// Deliver an outbound envelope and wait for the agent's reply.
    ///
    /// Transport-level delivery failure is retried internally; after
    /// exhaustion the error embeds `EvalError::AgentTimeout`. This call has
    /// no timeout of its own beyond retry exhaustion; the driver wraps it
    /// in the per-turn deadline.
    async fn send(&mut self, envelope: &Envelope, new_conversation: bool) -> Result<Envelope>;
}
