//! Tool dispatcher: resolves a batch of tool calls against the environment.
//!
//! Failures become error-content tool results and classified error kinds;
//! they never abort the trial. Correlation ids are preserved so the agent
//! can match results to calls regardless of ordering.

use tracing::{debug, warn};

use crate::environment::EnvironmentAdapter;
use crate::errors::ToolErrorKind;
use crate::protocol::{ToolCall, ToolResult};

/// Everything a dispatch batch produced: one result per call, in call
/// order, plus the classified failures for the trace record.
#[derive(Debug, Default)]
pub struct DispatchRecord {
    pub results: Vec<ToolResult>,
    pub errors: Vec<(String, ToolErrorKind)>,
}

impl DispatchRecord {
    pub fn had_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Apply every call in the batch sequentially against the trial's
/// environment. Calls within one batch see the state changes of earlier
/// calls in the same batch.
pub async fn dispatch_batch(
    env: &mut dyn EnvironmentAdapter,
    calls: &[ToolCall],
) -> DispatchRecord {
    let mut record = DispatchRecord::default();

    for call in calls {
        let outcome = env.apply(call).await;
        if outcome.ok {
            debug!(
                tool = %call.tool_name,
                call_id = %call.tool_call_id,
                "tool call succeeded"
            );
            record.results.push(ToolResult::ok(call, outcome.content));
        } else {
            record
                .results
                .push(ToolResult::failure(call, &outcome.content));
            if let Some(kind) = outcome.error_kind {
                warn!(
                    tool = %call.tool_name,
                    call_id = %call.tool_call_id,
                    kind = kind.tag(),
                    error = %outcome.content,
                    "tool call failed"
                );
                record.errors.push((call.tool_call_id.clone(), kind));
            }
        }
    }

    record
}
