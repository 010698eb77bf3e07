//! Domain error types for evalbot.
//!
//! Typed errors at module boundaries replace string-encoded errors and
//! enable structured handling via pattern matching. `EvalError` kinds are
//! trial-terminal; tool failures are recoverable and classified separately
//! as [`ToolErrorKind`].

use thiserror::Error;

// ---------------------------------------------------------------------------
// Trial-terminal errors
// ---------------------------------------------------------------------------

/// Failures that terminate a single trial (never the whole run).
///
/// Embedded in `anyhow::Error` so async-trait signatures stay
/// `anyhow::Result<T>` while callers can downcast:
/// `e.downcast_ref::<EvalError>()`.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("agent did not respond within {timeout_secs}s")]
    AgentTimeout { timeout_secs: u64 },

    #[error("step budget of {budget} turns exhausted")]
    StepBudgetExceeded { budget: u32 },

    #[error("malformed envelope: {0}")]
    Protocol(String),

    #[error("judge unavailable: {0}")]
    JudgeUnavailable(String),
}

// ---------------------------------------------------------------------------
// Tool error classification
// ---------------------------------------------------------------------------

/// Categorised tool failure reasons.
///
/// Produced by [`classify_tool_error`] from the error string that the
/// environment returns via the `"Error: ..."` prefix convention. These are
/// recoverable: the dispatcher records them and the conversation continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolErrorKind {
    #[error("Tool not found: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl ToolErrorKind {
    /// Short tag used in trace records and log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            ToolErrorKind::UnknownTool(_) => "unknown_tool",
            ToolErrorKind::InvalidArgs(_) => "invalid_args",
            ToolErrorKind::MissingArgument(_) => "missing_argument",
            ToolErrorKind::ExecutionFailed(_) => "execution_failed",
        }
    }
}

/// Classify a tool error string into a structured [`ToolErrorKind`].
///
/// Matches on known substrings in the error message. Unrecognised patterns
/// fall through to `ExecutionFailed` (the caller still has the raw string).
pub fn classify_tool_error(error_msg: &str) -> ToolErrorKind {
    let lower = error_msg.to_lowercase();

    if lower.contains("unknown tool") || lower.contains("tool not found") || lower.contains("not found")
    {
        return ToolErrorKind::UnknownTool(error_msg.to_string());
    }

    if lower.contains("missing required") {
        return ToolErrorKind::MissingArgument(error_msg.to_string());
    }

    if lower.contains("invalid") || lower.contains("expected") || lower.contains("must be") {
        return ToolErrorKind::InvalidArgs(error_msg.to_string());
    }

    ToolErrorKind::ExecutionFailed(error_msg.to_string())
}
