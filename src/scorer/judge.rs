//! Judge capability for non-deterministic metric checks.
//!
//! The scorer depends only on the [`Judge`] trait so it stays a pure,
//! testable function of its inputs plus one substitutable dependency.
//! `LlmJudge` is the production implementation backed by an
//! OpenAI-compatible chat endpoint.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::errors::EvalError;
use crate::llm::{ChatClient, ChatMessage};

/// Outcome of one judged check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Pass,
    Fail,
    /// Graded checks return a value in [0,1]; anything below 1 drives the
    /// trial reward to 0 while staying visible for diagnostics.
    Graded(f64),
}

impl Verdict {
    pub fn value(&self) -> f64 {
        match self {
            Verdict::Pass => 1.0,
            Verdict::Fail => 0.0,
            Verdict::Graded(v) => *v,
        }
    }
}

#[async_trait]
pub trait Judge: Send + Sync {
    /// Render a verdict for one judging prompt. Failures must embed
    /// `EvalError::JudgeUnavailable` so the scorer can mark the metric
    /// indeterminate instead of silently defaulting it.
    async fn verdict(&self, prompt: &str) -> Result<Verdict>;
}

/// Parse the judge reply. A `SCORE:` line wins over `VERDICT:` so graded
/// prompts can still include the boolean example in their instructions.
pub fn parse_verdict(text: &str) -> Result<Verdict> {
    for line in text.lines() {
        let line = line.trim();
        if let Some(raw) = line.strip_prefix("SCORE:") {
            let value: f64 = raw
                .trim()
                .parse()
                .map_err(|_| anyhow!("unparseable SCORE line: {line:?}"))?;
            return Ok(Verdict::Graded(value.clamp(0.0, 1.0)));
        }
    }
    if text.contains("VERDICT: PASS") {
        return Ok(Verdict::Pass);
    }
    if text.contains("VERDICT: FAIL") {
        return Ok(Verdict::Fail);
    }
    Err(anyhow!("judge reply carried no verdict: {text:?}"))
}

pub struct LlmJudge {
    client: ChatClient,
}

impl LlmJudge {
    pub fn new(client: ChatClient) -> Self {
        LlmJudge { client }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn verdict(&self, prompt: &str) -> Result<Verdict> {
        let messages = vec![
            ChatMessage::system(
                "You are an impartial evaluator of agent conversations. \
                 Follow the response format exactly.",
            ),
            ChatMessage::user(prompt.to_string()),
        ];
        let reply = self.client.complete(&messages).await.map_err(|e| {
            warn!(error = %e, "judge call failed");
            anyhow!(EvalError::JudgeUnavailable(e.to_string()))
        })?;
        parse_verdict(&reply)
            .map_err(|e| anyhow!(EvalError::JudgeUnavailable(e.to_string())))
    }
}

// ---------------------------------------------------------------------------
// Prompt templates
// ---------------------------------------------------------------------------

/// Boolean judging prompt: criteria + transcript, PASS/FAIL contract.
pub fn boolean_prompt(task_context: &str, criteria: &str, transcript: &str) -> String {
    format!(
        "TASK CONTEXT:\n{task_context}\n\n\
         CONVERSATION:\n{transcript}\n\
         EVALUATION CRITERIA: {criteria}\n\n\
         Respond with EXACTLY this format (no markdown, no extra text):\n\
         VERDICT: PASS or FAIL\n\
         REASON: One sentence explanation"
    )
}

/// Graded judging prompt: criteria + transcript, SCORE contract.
pub fn graded_prompt(task_context: &str, criteria: &str, transcript: &str) -> String {
    format!(
        "TASK CONTEXT:\n{task_context}\n\n\
         CONVERSATION:\n{transcript}\n\
         EVALUATION CRITERIA: {criteria}\n\n\
         Respond with EXACTLY this format (no markdown, no extra text):\n\
         SCORE: a number between 0.0 and 1.0\n\
         REASON: One sentence explanation"
    )
}
