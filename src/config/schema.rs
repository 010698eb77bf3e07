//! Configuration schema.
//!
//! Serialized as camelCase JSON; every field has a default so a partial
//! config file (or none at all) still produces a runnable setup.

use serde::{Deserialize, Serialize};

use crate::catalog::TaskSelection;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub run: RunConfig,
    pub judge: JudgeConfig,
    pub user: UserConfig,
    pub tasks: TasksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub url: String,
    pub turn_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            url: "http://localhost:9100".into(),
            turn_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Trial count k: every selected task runs this many isolated trials.
    pub num_trials: u32,
    pub max_concurrency: usize,
    pub output: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            num_trials: 3,
            max_concurrency: 4,
            output: "results.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JudgeConfig {
    pub api_base: String,
    /// Environment variable holding the API key; never the key itself.
    pub api_key_env: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        JudgeConfig {
            api_base: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            model: "gpt-4o-mini".into(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStrategy {
    #[default]
    Scripted,
    Llm,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserConfig {
    pub strategy: UserStrategy,
    /// Model for the LLM user simulator; the judge's endpoint and key are
    /// reused when unset.
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TasksConfig {
    pub base: TaskSelection,
    pub hallucination: TaskSelection,
    pub disambiguation: TaskSelection,
}

impl TasksConfig {
    pub fn selection_for(&self, task_type: crate::catalog::TaskType) -> &TaskSelection {
        match task_type {
            crate::catalog::TaskType::Base => &self.base,
            crate::catalog::TaskType::Hallucination => &self.hallucination,
            crate::catalog::TaskType::Disambiguation => &self.disambiguation,
        }
    }
}
