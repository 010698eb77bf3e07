//! Persisted result record and human-readable summary rendering.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateResult;

/// The whole run's output, persisted as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub generated_at: DateTime<Utc>,
    pub agent_url: String,
    pub aggregate: AggregateResult,
}

impl ResultRecord {
    pub fn new(agent_url: impl Into<String>, aggregate: AggregateResult) -> Self {
        ResultRecord {
            generated_at: Utc::now(),
            agent_url: agent_url.into(),
            aggregate,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing result record to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading result record from {}", path.display()))?;
        let record = serde_json::from_str(&raw)
            .with_context(|| format!("parsing result record {}", path.display()))?;
        Ok(record)
    }

    /// Render the run summary as a fixed-width text block.
    pub fn render_summary(&self) -> String {
        let agg = &self.aggregate;
        let mut out = String::new();
        let _ = writeln!(out, "=== Evaluation summary (k={}) ===", agg.k);
        let _ = writeln!(out, "agent: {}", self.agent_url);
        let _ = writeln!(out, "generated: {}", self.generated_at.to_rfc3339());
        let trials: Vec<&crate::aggregate::TrialResult> =
            agg.tasks.iter().flat_map(|t| t.trials.iter()).collect();
        if !trials.is_empty() {
            let total: Duration = trials.iter().map(|t| t.duration()).sum();
            let _ = writeln!(
                out,
                "mean trial duration: {:.1}s over {} trials",
                total.as_secs_f64() / trials.len() as f64,
                trials.len()
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:<18} {:>6} {:>9} {:>9}",
            "type", "tasks", "pass^k", "pass@k"
        );
        for (label, means) in &agg.per_type {
            let _ = writeln!(
                out,
                "{:<18} {:>6} {:>9.3} {:>9.3}",
                label, means.task_count, means.pass_hat_k, means.pass_at_k
            );
        }
        let _ = writeln!(
            out,
            "{:<18} {:>6} {:>9.3} {:>9.3}",
            "overall",
            agg.overall.task_count,
            agg.overall.pass_hat_k,
            agg.overall.pass_at_k
        );

        if !agg.incomplete_task_ids.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "incomplete (fewer than {} trials): {}",
                agg.k,
                agg.incomplete_task_ids.join(", ")
            );
        }

        let failing: Vec<&str> = agg
            .tasks
            .iter()
            .filter(|t| t.pass_at_k < 1.0)
            .map(|t| t.task_id.as_str())
            .collect();
        if !failing.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "never passed: {}", failing.join(", "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, TrialResult};
    use crate::catalog::TaskType;
    use crate::driver::TerminalReason;
    use crate::scorer::MetricVector;

    fn trial(task_id: &str, reward: f64) -> TrialResult {
        TrialResult {
            task_id: task_id.into(),
            task_type: TaskType::Base,
            trial_index: 0,
            metrics: MetricVector::default(),
            indeterminate: Vec::new(),
            reward,
            terminal_reason: TerminalReason::Completed,
            duration_ms: 42,
        }
    }

    fn sample_record() -> ResultRecord {
        let agg = aggregate(1, vec![trial("t1", 1.0), trial("t2", 0.0)]);
        ResultRecord::new("http://localhost:9100", agg)
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let record = sample_record();
        record.save(&path).unwrap();

        let loaded = ResultRecord::load(&path).unwrap();
        assert_eq!(loaded.agent_url, record.agent_url);
        assert_eq!(loaded.aggregate.tasks.len(), 2);
        assert_eq!(loaded.aggregate.overall.task_count, 2);
    }

    #[test]
    fn test_summary_lists_failures() {
        let summary = sample_record().render_summary();
        assert!(summary.contains("overall"));
        assert!(summary.contains("never passed: t2"));
        assert!(summary.contains("k=1"));
        assert!(summary.contains("mean trial duration: 0.0s over 2 trials"));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = ResultRecord::load(Path::new("/nonexistent/results.json")).unwrap_err();
        assert!(err.to_string().contains("reading result record"));
    }
}
