//! Trial aggregator: Pass^k / Pass@k statistics over repeated trials.
//!
//! Pure functions over the collected trial results. Pass^k measures
//! consistency (reward 1 in every trial), Pass@k latent capability
//! (reward 1 in at least one); `Pass^k <= Pass@k` always holds.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::TaskType;
use crate::driver::TerminalReason;
use crate::scorer::MetricVector;

/// One scored trial, as persisted in the result record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialResult {
    pub task_id: String,
    pub task_type: TaskType,
    pub trial_index: u32,
    pub metrics: MetricVector,
    #[serde(default)]
    pub indeterminate: Vec<String>,
    pub reward: f64,
    pub terminal_reason: TerminalReason,
    pub duration_ms: u64,
}

impl TrialResult {
    pub fn passed(&self) -> bool {
        self.reward >= 1.0 - 1e-9
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Per-task rollup over exactly `k` trials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAggregate {
    pub task_id: String,
    pub task_type: TaskType,
    pub trials: Vec<TrialResult>,
    pub pass_hat_k: f64,
    pub pass_at_k: f64,
}

/// Mean Pass^k / Pass@k over a set of tasks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassMeans {
    pub pass_hat_k: f64,
    pub pass_at_k: f64,
    pub task_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub k: u32,
    pub tasks: Vec<TaskAggregate>,
    /// Tasks that finished fewer than `k` trials; excluded from the means.
    pub incomplete_task_ids: Vec<String>,
    pub per_type: BTreeMap<String, PassMeans>,
    pub overall: PassMeans,
}

/// Roll up one task's trials. Callers must pass exactly the trials that
/// completed for this task; fewer than `k` means the task is incomplete
/// and belongs in `incomplete_task_ids` instead.
pub fn aggregate_task(
    task_id: &str,
    task_type: TaskType,
    trials: Vec<TrialResult>,
) -> TaskAggregate {
    let all_pass = !trials.is_empty() && trials.iter().all(TrialResult::passed);
    let any_pass = trials.iter().any(TrialResult::passed);
    TaskAggregate {
        task_id: task_id.to_string(),
        task_type,
        trials,
        pass_hat_k: if all_pass { 1.0 } else { 0.0 },
        pass_at_k: if any_pass { 1.0 } else { 0.0 },
    }
}

fn means_over(tasks: &[&TaskAggregate]) -> PassMeans {
    if tasks.is_empty() {
        return PassMeans::default();
    }
    let n = tasks.len() as f64;
    PassMeans {
        pass_hat_k: tasks.iter().map(|t| t.pass_hat_k).sum::<f64>() / n,
        pass_at_k: tasks.iter().map(|t| t.pass_at_k).sum::<f64>() / n,
        task_count: tasks.len(),
    }
}

/// Combine all trial results for a run into the final aggregate.
pub fn aggregate(k: u32, all_trials: Vec<TrialResult>) -> AggregateResult {
    // group by task id, preserving first-seen order
    let mut order: Vec<String> = Vec::new();
    let mut by_task: BTreeMap<String, Vec<TrialResult>> = BTreeMap::new();
    for trial in all_trials {
        if !by_task.contains_key(&trial.task_id) {
            order.push(trial.task_id.clone());
        }
        by_task.entry(trial.task_id.clone()).or_default().push(trial);
    }

    let mut tasks = Vec::new();
    let mut incomplete = Vec::new();
    for task_id in order {
        let trials = by_task.remove(&task_id).unwrap_or_default();
        if (trials.len() as u32) < k {
            incomplete.push(task_id);
            continue;
        }
        let task_type = trials[0].task_type;
        tasks.push(aggregate_task(&task_id, task_type, trials));
    }

    let mut per_type = BTreeMap::new();
    for task_type in TaskType::ALL {
        let typed: Vec<&TaskAggregate> =
            tasks.iter().filter(|t| t.task_type == task_type).collect();
        if !typed.is_empty() {
            per_type.insert(task_type.label().to_string(), means_over(&typed));
        }
    }
    let overall = means_over(&tasks.iter().collect::<Vec<_>>());

    AggregateResult {
        k,
        tasks,
        incomplete_task_ids: incomplete,
        per_type,
        overall,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial(task_id: &str, index: u32, reward: f64) -> TrialResult {
        TrialResult {
            task_id: task_id.into(),
            task_type: TaskType::Base,
            trial_index: index,
            metrics: MetricVector::default(),
            indeterminate: Vec::new(),
            reward,
            terminal_reason: TerminalReason::Completed,
            duration_ms: 10,
        }
    }

    #[test]
    fn test_all_pass_scenario() {
        let agg = aggregate_task(
            "t",
            TaskType::Base,
            vec![trial("t", 0, 1.0), trial("t", 1, 1.0), trial("t", 2, 1.0)],
        );
        assert_eq!(agg.pass_hat_k, 1.0);
        assert_eq!(agg.pass_at_k, 1.0);
    }

    #[test]
    fn test_one_of_three_scenario() {
        let agg = aggregate_task(
            "t",
            TaskType::Base,
            vec![trial("t", 0, 1.0), trial("t", 1, 0.0), trial("t", 2, 0.0)],
        );
        assert_eq!(agg.pass_hat_k, 0.0);
        assert_eq!(agg.pass_at_k, 1.0);
    }

    #[test]
    fn test_pass_hat_never_exceeds_pass_at() {
        // every subset of rewards over 3 trials
        for bits in 0..8u32 {
            let trials = (0..3)
                .map(|i| trial("t", i, if bits & (1 << i) != 0 { 1.0 } else { 0.0 }))
                .collect();
            let agg = aggregate_task("t", TaskType::Base, trials);
            assert!(agg.pass_hat_k <= agg.pass_at_k);
        }
    }

    #[test]
    fn test_incomplete_tasks_excluded() {
        let trials = vec![
            trial("full", 0, 1.0),
            trial("full", 1, 1.0),
            trial("partial", 0, 1.0),
        ];
        let result = aggregate(2, trials);
        assert_eq!(result.tasks.len(), 1);
        assert_eq!(result.tasks[0].task_id, "full");
        assert_eq!(result.incomplete_task_ids, vec!["partial".to_string()]);
        // the excluded task does not drag the mean down
        assert_eq!(result.overall.pass_hat_k, 1.0);
    }

    #[test]
    fn test_per_type_and_overall_means() {
        let mut hallu_pass = trial("h1", 0, 1.0);
        hallu_pass.task_type = TaskType::Hallucination;
        let mut hallu_fail = trial("h2", 0, 0.0);
        hallu_fail.task_type = TaskType::Hallucination;
        let trials = vec![trial("b1", 0, 1.0), hallu_pass, hallu_fail];

        let result = aggregate(1, trials);
        assert_eq!(result.per_type["base"].pass_hat_k, 1.0);
        assert_eq!(result.per_type["hallucination"].pass_hat_k, 0.5);
        assert!((result.overall.pass_hat_k - 2.0 / 3.0).abs() < 1e-9);
        assert!(!result.per_type.contains_key("disambiguation"));
    }

    #[test]
    fn test_empty_run() {
        let result = aggregate(3, Vec::new());
        assert!(result.tasks.is_empty());
        assert_eq!(result.overall.task_count, 0);
    }
}
