//! Counterpart simulation: who speaks for the "user" side of the trial.
//!
//! A task either carries a fixed utterance script or scenario instructions
//! for an LLM simulator. Returning `None` means the conversation is
//! structurally finished and the trial completes.

use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::catalog::Task;
use crate::llm::{ChatClient, ChatMessage};

/// Marker the LLM simulator emits when the scenario is finished.
pub const STOP_MARKER: &str = "###STOP###";

#[async_trait]
pub trait UserSimulator: Send {
    /// Produce the next user utterance given the agent's latest free-text
    /// reply, or `None` when there is nothing left to say.
    async fn next_utterance(&mut self, agent_text: &str) -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// Scripted user
// ---------------------------------------------------------------------------

pub struct ScriptedUser {
    script: VecDeque<String>,
}

impl ScriptedUser {
    pub fn new(utterances: impl IntoIterator<Item = String>) -> Self {
        ScriptedUser {
            script: utterances.into_iter().collect(),
        }
    }

    pub fn from_task(task: &Task) -> Self {
        Self::new(task.user_script.iter().cloned())
    }
}

#[async_trait]
impl UserSimulator for ScriptedUser {
    async fn next_utterance(&mut self, _agent_text: &str) -> Result<Option<String>> {
        Ok(self.script.pop_front())
    }
}

// ---------------------------------------------------------------------------
// LLM-driven user
// ---------------------------------------------------------------------------

pub struct LlmUser {
    client: ChatClient,
    scenario: String,
    history: Vec<ChatMessage>,
}

impl LlmUser {
    pub fn new(client: ChatClient, scenario: impl Into<String>) -> Self {
        LlmUser {
            client,
            scenario: scenario.into(),
            history: Vec::new(),
        }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are simulating a human user in a customer conversation.\n\
             Scenario:\n{}\n\n\
             Reply with the user's next message only. When the scenario is \
             complete and there is nothing more to ask, reply with exactly \
             {STOP_MARKER}.",
            self.scenario
        )
    }
}

#[async_trait]
impl UserSimulator for LlmUser {
    async fn next_utterance(&mut self, agent_text: &str) -> Result<Option<String>> {
        self.history.push(ChatMessage::user(agent_text.to_string()));

        let mut messages = vec![ChatMessage::system(self.system_prompt())];
        messages.extend(self.history.iter().cloned());

        let reply = self.client.complete(&messages).await?;
        let reply = reply.trim().to_string();
        if reply.contains(STOP_MARKER) {
            debug!("user simulator signalled end of scenario");
            return Ok(None);
        }
        self.history.push(ChatMessage {
            role: "assistant".into(),
            content: reply.clone(),
        });
        Ok(Some(reply))
    }
}
