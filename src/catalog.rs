//! Task catalog: benchmark task definitions and selection.
//!
//! Tasks are loaded from a single JSON file and are immutable afterwards.
//! Each task carries everything a trial needs: the goal/policy text shown
//! to the agent, the initial environment configuration with inline tool
//! specs, the counterpart script, the step budget, and the reference data
//! the scorer compares against.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Task model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Base,
    Hallucination,
    Disambiguation,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [
        TaskType::Base,
        TaskType::Hallucination,
        TaskType::Disambiguation,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TaskType::Base => "base",
            TaskType::Hallucination => "hallucination",
            TaskType::Disambiguation => "disambiguation",
        }
    }
}

/// One tool offered by the task's simulated environment.
///
/// `response` is a template returned to the agent on success; `{name}`
/// placeholders are substituted from the call arguments. `effect` is an
/// optional merge patch applied to the environment state, with the same
/// substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
    #[serde(default)]
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<Value>,
}

fn default_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Initial world the trial's environment is reset to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvConfig {
    #[serde(default = "default_state")]
    pub initial_state: Value,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

fn default_state() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub goal: String,
    #[serde(default)]
    pub policy: String,
    pub env: EnvConfig,
    /// Scripted counterpart utterances consumed in order after the opening
    /// turn. An exhausted script means the task is structurally finished.
    #[serde(default)]
    pub user_script: Vec<String>,
    /// Scenario instructions for the LLM user simulator, when used instead
    /// of a fixed script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_scenario: Option<String>,
    #[serde(default = "default_step_budget")]
    pub step_budget: u32,
    /// Subset-matched against the final environment snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_final_state: Option<Value>,
    /// Each entry must subset-match some post-dispatch snapshot, in any
    /// order.
    #[serde(default)]
    pub expected_intermediate_states: Vec<Value>,
    /// Tools the agent must have invoked at least once.
    #[serde(default)]
    pub required_tools: Vec<String>,
    /// Tools the agent must never invoke; a deterministic policy check.
    #[serde(default)]
    pub forbidden_tools: Vec<String>,
    /// Extra instructions rendered into judged-metric prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judging_notes: Option<String>,
}

fn default_step_budget() -> u32 {
    30
}

impl Task {
    /// The combined policy+goal text carried by the opening turn.
    pub fn opening_instructions(&self) -> String {
        if self.policy.is_empty() {
            self.goal.clone()
        } else {
            format!("{}\n\n{}", self.policy, self.goal)
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog loading and selection
// ---------------------------------------------------------------------------

/// Per-type selection: an explicit id list wins over the count; a count of
/// -1 means all tasks of that type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSelection {
    #[serde(default = "default_num_tasks")]
    pub num_tasks: i64,
    #[serde(default)]
    pub task_ids: Vec<String>,
}

fn default_num_tasks() -> i64 {
    -1
}

impl Default for TaskSelection {
    fn default() -> Self {
        TaskSelection {
            num_tasks: -1,
            task_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCatalog {
    pub tasks: Vec<Task>,
}

impl TaskCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading task file {}", path.display()))?;
        let catalog: TaskCatalog = serde_json::from_str(&raw)
            .with_context(|| format!("parsing task file {}", path.display()))?;
        Ok(catalog)
    }

    pub fn of_type(&self, task_type: TaskType) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |t| t.task_type == task_type)
    }

    /// Apply a per-type selection, preserving catalog order.
    pub fn select(&self, task_type: TaskType, selection: &TaskSelection) -> Vec<&Task> {
        let typed: Vec<&Task> = self.of_type(task_type).collect();
        if !selection.task_ids.is_empty() {
            return typed
                .into_iter()
                .filter(|t| selection.task_ids.iter().any(|id| id == &t.id))
                .collect();
        }
        if selection.num_tasks < 0 {
            return typed;
        }
        typed.into_iter().take(selection.num_tasks as usize).collect()
    }

    pub fn find(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}
