//! Conversation driver: the per-trial turn state machine.
//!
//! One driver owns one task×trial lifecycle. It builds outbound turns,
//! sends them over the channel under a per-turn deadline, routes the reply
//! to the tool dispatcher or the user simulator, and terminates on
//! completion, step-budget exhaustion, or failure. The trace is handed to
//! the scorer unconditionally, partial traces included.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Task;
use crate::channel::AgentChannel;
use crate::dispatch::dispatch_batch;
use crate::environment::EnvironmentAdapter;
use crate::errors::{EvalError, ToolErrorKind};
use crate::protocol::{AgentReply, Envelope, ToolCall};
use crate::user::UserSimulator;

// ---------------------------------------------------------------------------
// Trace and outcome types
// ---------------------------------------------------------------------------

/// Why a trial stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    Completed,
    StepBudgetExceeded,
    AgentTimeout,
    ProtocolError,
    Cancelled,
}

/// One outbound/inbound exchange. `inbound` is absent when the trial died
/// before a reply arrived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub outbound: Envelope,
    pub inbound: Option<Envelope>,
}

/// Everything the scorer needs from a finished trial.
#[derive(Debug, Clone)]
pub struct TrialOutcome {
    pub task_id: String,
    pub trial_index: u32,
    pub trace: Vec<Turn>,
    /// Environment snapshot after each dispatched tool batch, in order.
    pub snapshots: Vec<Value>,
    pub final_state: Value,
    pub tool_calls: Vec<ToolCall>,
    pub tool_errors: Vec<(String, ToolErrorKind)>,
    pub steps_used: u32,
    pub terminal: TerminalReason,
    pub duration: Duration,
}

impl TrialOutcome {
    /// Render the trace as plain text for judged-metric prompts.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for turn in &self.trace {
            out.push_str(&format!(
                "[{}] {}\n",
                turn.outbound.role,
                summarize_envelope(&turn.outbound)
            ));
            if let Some(inbound) = &turn.inbound {
                out.push_str(&format!(
                    "[{}] {}\n",
                    inbound.role,
                    summarize_envelope(inbound)
                ));
            }
        }
        out
    }
}

fn summarize_envelope(envelope: &Envelope) -> String {
    let mut chunks = Vec::new();
    for part in &envelope.parts {
        match part {
            crate::protocol::Part::Text { text } => chunks.push(text.clone()),
            crate::protocol::Part::Data { data } => {
                chunks.push(serde_json::to_string(data).unwrap_or_default())
            }
        }
    }
    chunks.join(" ")
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

enum DriverState {
    Init,
    AwaitingResponse {
        outbound: Envelope,
        new_conversation: bool,
    },
    DispatchingTools {
        calls: Vec<ToolCall>,
    },
    AdvancingTask {
        agent_text: String,
    },
}

enum StepResult {
    Next(DriverState),
    Done(TerminalReason),
}

pub struct ConversationDriver {
    task: Task,
    trial_index: u32,
    channel: Box<dyn AgentChannel>,
    env: Box<dyn EnvironmentAdapter>,
    user: Box<dyn UserSimulator>,
    turn_timeout: Duration,
    cancel: CancellationToken,

    trace: Vec<Turn>,
    snapshots: Vec<Value>,
    tool_calls: Vec<ToolCall>,
    tool_errors: Vec<(String, ToolErrorKind)>,
    steps_used: u32,
}

impl ConversationDriver {
    pub fn new(
        task: Task,
        trial_index: u32,
        channel: Box<dyn AgentChannel>,
        env: Box<dyn EnvironmentAdapter>,
        user: Box<dyn UserSimulator>,
        turn_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        ConversationDriver {
            task,
            trial_index,
            channel,
            env,
            user,
            turn_timeout,
            cancel,
            trace: Vec::new(),
            snapshots: Vec::new(),
            tool_calls: Vec::new(),
            tool_errors: Vec::new(),
            steps_used: 0,
        }
    }

    /// Run the trial to a terminal state and return the outcome. Never
    /// returns `Err`: every failure mode maps to a terminal reason so the
    /// trace can still be scored.
    pub async fn run(mut self) -> TrialOutcome {
        let started = Instant::now();
        let mut state = DriverState::Init;

        let terminal = loop {
            let step = match state {
                DriverState::Init => self.step_init().await,
                DriverState::AwaitingResponse {
                    outbound,
                    new_conversation,
                } => self.step_awaiting(outbound, new_conversation).await,
                DriverState::DispatchingTools { calls } => self.step_dispatching(calls).await,
                DriverState::AdvancingTask { agent_text } => self.step_advancing(&agent_text).await,
            };
            match step {
                StepResult::Next(next) => state = next,
                StepResult::Done(reason) => break reason,
            }
        };

        info!(
            task = %self.task.id,
            trial = self.trial_index,
            terminal = ?terminal,
            steps = self.steps_used,
            "trial finished"
        );

        TrialOutcome {
            task_id: self.task.id.clone(),
            trial_index: self.trial_index,
            final_state: self.env.snapshot(),
            trace: self.trace,
            snapshots: self.snapshots,
            tool_calls: self.tool_calls,
            tool_errors: self.tool_errors,
            steps_used: self.steps_used,
            terminal,
            duration: started.elapsed(),
        }
    }

    async fn step_init(&mut self) -> StepResult {
        if let Err(e) = self.env.reset(&self.task.env).await {
            warn!(task = %self.task.id, error = %e, "environment reset failed");
            return StepResult::Done(TerminalReason::ProtocolError);
        }
        let descriptors = self.env.tool_descriptors();
        match Envelope::first_turn(self.task.opening_instructions(), &descriptors) {
            Ok(outbound) => StepResult::Next(DriverState::AwaitingResponse {
                outbound,
                new_conversation: true,
            }),
            Err(e) => {
                warn!(task = %self.task.id, error = %e, "failed to build opening turn");
                StepResult::Done(TerminalReason::ProtocolError)
            }
        }
    }

    /// Send one outbound turn and classify the reply. The step counter and
    /// budget apply here: one outbound envelope is one step, and the budget
    /// is a hard ceiling checked before the send.
    async fn step_awaiting(&mut self, outbound: Envelope, new_conversation: bool) -> StepResult {
        if self.steps_used >= self.task.step_budget {
            let err = EvalError::StepBudgetExceeded {
                budget: self.task.step_budget,
            };
            warn!(task = %self.task.id, error = %err, "trial halted");
            return StepResult::Done(TerminalReason::StepBudgetExceeded);
        }
        self.steps_used += 1;

        enum TurnWait {
            Cancelled,
            TimedOut,
            Failed(anyhow::Error),
            Reply(Envelope),
        }

        let wait = {
            let send = self.channel.send(&outbound, new_conversation);
            tokio::select! {
                _ = self.cancel.cancelled() => TurnWait::Cancelled,
                result = timeout(self.turn_timeout, send) => match result {
                    Err(_elapsed) => TurnWait::TimedOut,
                    Ok(Err(e)) => TurnWait::Failed(e),
                    Ok(Ok(reply)) => TurnWait::Reply(reply),
                }
            }
        };

        let reply = match wait {
            TurnWait::Cancelled => {
                self.trace.push(Turn { outbound, inbound: None });
                return StepResult::Done(TerminalReason::Cancelled);
            }
            TurnWait::TimedOut => {
                warn!(
                    task = %self.task.id,
                    timeout_secs = self.turn_timeout.as_secs(),
                    "agent did not reply within the turn deadline"
                );
                self.trace.push(Turn { outbound, inbound: None });
                return StepResult::Done(TerminalReason::AgentTimeout);
            }
            TurnWait::Failed(e) => {
                let reason = match e.downcast_ref::<EvalError>() {
                    Some(EvalError::AgentTimeout { .. }) => TerminalReason::AgentTimeout,
                    _ => TerminalReason::ProtocolError,
                };
                warn!(task = %self.task.id, error = %e, "turn exchange failed");
                self.trace.push(Turn { outbound, inbound: None });
                return StepResult::Done(reason);
            }
            TurnWait::Reply(reply) => reply,
        };

        let parsed = match AgentReply::parse(&reply) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(task = %self.task.id, error = %e, "malformed agent envelope");
                self.trace.push(Turn {
                    outbound,
                    inbound: Some(reply),
                });
                return StepResult::Done(TerminalReason::ProtocolError);
            }
        };
        self.trace.push(Turn {
            outbound,
            inbound: Some(reply),
        });

        if parsed.has_tool_calls() {
            debug!(
                task = %self.task.id,
                count = parsed.tool_calls.len(),
                "agent requested tool calls"
            );
            StepResult::Next(DriverState::DispatchingTools {
                calls: parsed.tool_calls,
            })
        } else {
            StepResult::Next(DriverState::AdvancingTask {
                agent_text: parsed.text,
            })
        }
    }

    async fn step_dispatching(&mut self, calls: Vec<ToolCall>) -> StepResult {
        let record = dispatch_batch(self.env.as_mut(), &calls).await;
        if record.had_errors() {
            debug!(
                task = %self.task.id,
                failed = record.errors.len(),
                "batch finished with tool errors"
            );
        }
        self.tool_calls.extend(calls);
        self.tool_errors.extend(record.errors);
        self.snapshots.push(self.env.snapshot());

        match Envelope::tool_results(&record.results) {
            Ok(outbound) => StepResult::Next(DriverState::AwaitingResponse {
                outbound,
                new_conversation: false,
            }),
            Err(e) => {
                warn!(task = %self.task.id, error = %e, "failed to encode tool results");
                StepResult::Done(TerminalReason::ProtocolError)
            }
        }
    }

    async fn step_advancing(&mut self, agent_text: &str) -> StepResult {
        match self.user.next_utterance(agent_text).await {
            Ok(Some(utterance)) => StepResult::Next(DriverState::AwaitingResponse {
                outbound: Envelope::user_text(utterance),
                new_conversation: false,
            }),
            Ok(None) => StepResult::Done(TerminalReason::Completed),
            Err(e) => {
                warn!(task = %self.task.id, error = %e, "user simulator failed");
                StepResult::Done(TerminalReason::ProtocolError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::SimEnvironment;
    use crate::protocol::Part;
    use crate::user::ScriptedUser;
    use async_trait::async_trait;
    use serde_json::json;

    /// Channel that replays canned agent envelopes.
    struct ScriptedAgent {
        replies: std::collections::VecDeque<Envelope>,
    }

    impl ScriptedAgent {
        fn new(replies: Vec<Envelope>) -> Self {
            ScriptedAgent {
                replies: replies.into(),
            }
        }
    }

    #[async_trait]
    impl AgentChannel for ScriptedAgent {
        async fn send(&mut self, _envelope: &Envelope, _new: bool) -> anyhow::Result<Envelope> {
            self.replies
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    fn agent_text(text: &str) -> Envelope {
        Envelope::new("agent", vec![Part::text(text)])
    }

    fn agent_tool_call(name: &str, args: serde_json::Value) -> Envelope {
        Envelope::new(
            "agent",
            vec![Part::data(
                json!({"tool_calls": [{"tool_name": name, "arguments": args}]}),
            )],
        )
    }

    fn sample_task() -> Task {
        serde_json::from_value(json!({
            "id": "base-driver",
            "type": "base",
            "goal": "Record a note saying hello.",
            "env": {
                "initialState": {},
                "tools": [{
                    "name": "note",
                    "description": "Record a note",
                    "parameters": {
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"]
                    },
                    "response": "noted",
                    "effect": { "note": "{text}" }
                }]
            },
            "userScript": [],
            "stepBudget": 10
        }))
        .unwrap()
    }

    fn driver_for(task: Task, replies: Vec<Envelope>) -> ConversationDriver {
        let script = task.user_script.clone();
        ConversationDriver::new(
            task,
            0,
            Box::new(ScriptedAgent::new(replies)),
            Box::new(SimEnvironment::new("test-trial")),
            Box::new(ScriptedUser::new(script)),
            Duration::from_secs(5),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_happy_path_completes() {
        let outcome = driver_for(
            sample_task(),
            vec![
                agent_tool_call("note", json!({"text": "hello"})),
                agent_text("Done, I recorded the note."),
            ],
        )
        .run()
        .await;

        assert_eq!(outcome.terminal, TerminalReason::Completed);
        assert_eq!(outcome.final_state["note"], "hello");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(outcome.tool_errors.is_empty());
        assert_eq!(outcome.snapshots.len(), 1);
        assert_eq!(outcome.steps_used, 2);
    }

    #[tokio::test]
    async fn test_malformed_args_recoverable() {
        let outcome = driver_for(
            sample_task(),
            vec![
                agent_tool_call("note", json!({})),
                agent_text("That failed, giving up."),
            ],
        )
        .run()
        .await;

        // the trial completed despite the failing call
        assert_eq!(outcome.terminal, TerminalReason::Completed);
        assert_eq!(outcome.tool_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_runaway_tool_loop_hits_budget() {
        let mut task = sample_task();
        task.step_budget = 3;
        let replies = (0..10)
            .map(|i| agent_tool_call("note", json!({"text": format!("n{i}")})))
            .collect();
        let outcome = driver_for(task, replies).run().await;

        assert_eq!(outcome.terminal, TerminalReason::StepBudgetExceeded);
        assert_eq!(outcome.steps_used, 3);
        // partial trace retained for scoring
        assert!(!outcome.trace.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_user_advances_conversation() {
        let mut task = sample_task();
        task.user_script = vec!["Actually make it say goodbye.".into()];
        let outcome = driver_for(
            task,
            vec![
                agent_text("What should the note say?"),
                agent_tool_call("note", json!({"text": "goodbye"})),
                agent_text("Done."),
            ],
        )
        .run()
        .await;

        assert_eq!(outcome.terminal, TerminalReason::Completed);
        assert_eq!(outcome.final_state["note"], "goodbye");
    }

    #[tokio::test]
    async fn test_empty_agent_envelope_is_recorded_not_fatal() {
        // a part-less reply reads as an empty free-text turn and advances
        // the task instead of killing the trial
        let outcome = driver_for(sample_task(), vec![Envelope::new("agent", vec![])])
            .run()
            .await;
        assert_eq!(outcome.terminal, TerminalReason::Completed);
        assert!(outcome.trace[0].inbound.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_channel_is_protocol_error() {
        let outcome = driver_for(sample_task(), vec![]).run().await;
        assert_eq!(outcome.terminal, TerminalReason::ProtocolError);
    }

    struct StallingAgent;

    #[async_trait]
    impl AgentChannel for StallingAgent {
        async fn send(&mut self, _envelope: &Envelope, _new: bool) -> anyhow::Result<Envelope> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(agent_text("too late"))
        }
    }

    #[tokio::test]
    async fn test_cancellation_is_terminal() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let driver = ConversationDriver::new(
            sample_task(),
            0,
            Box::new(StallingAgent),
            Box::new(SimEnvironment::new("t")),
            Box::new(ScriptedUser::new(Vec::<String>::new())),
            Duration::from_secs(5),
            cancel,
        );
        let outcome = driver.run().await;
        assert_eq!(outcome.terminal, TerminalReason::Cancelled);
    }

    #[tokio::test]
    async fn test_transcript_includes_both_sides() {
        let outcome = driver_for(sample_task(), vec![agent_text("All done.")])
            .run()
            .await;
        let transcript = outcome.transcript();
        assert!(transcript.contains("[user]"));
        assert!(transcript.contains("[agent] All done."));
    }
}
