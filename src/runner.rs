//! Run orchestration: many trials in flight, each internally sequential.
//!
//! Every task×trial pair gets its own channel, environment, and user
//! simulator from the injected factories, so nothing mutable is shared
//! between trials. Concurrency is bounded by a semaphore; a failed or
//! panicking trial never takes the run down, it just leaves its task
//! incomplete in the aggregate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::aggregate::{aggregate, AggregateResult, TrialResult};
use crate::catalog::Task;
use crate::channel::AgentChannel;
use crate::driver::ConversationDriver;
use crate::environment::SimEnvironment;
use crate::scorer::{judge::Judge, score};
use crate::user::UserSimulator;

/// Fresh channel per trial; one conversation each.
pub type ChannelFactory = Arc<dyn Fn() -> Box<dyn AgentChannel> + Send + Sync>;
/// Fresh user simulator per trial, built from the task definition.
pub type UserFactory = Arc<dyn Fn(&Task) -> Box<dyn UserSimulator> + Send + Sync>;

pub struct RunPlan {
    pub tasks: Vec<Task>,
    pub num_trials: u32,
    pub max_concurrency: usize,
    pub turn_timeout: Duration,
}

/// Execute the whole plan and aggregate the results.
pub async fn run_benchmark(
    plan: RunPlan,
    channels: ChannelFactory,
    users: UserFactory,
    judge: Arc<dyn Judge>,
    cancel: CancellationToken,
) -> AggregateResult {
    let semaphore = Arc::new(Semaphore::new(plan.max_concurrency.max(1)));
    let mut join_set: JoinSet<TrialResult> = JoinSet::new();

    let total = plan.tasks.len() as u32 * plan.num_trials;
    info!(
        tasks = plan.tasks.len(),
        k = plan.num_trials,
        total_trials = total,
        "starting benchmark run"
    );

    for task in plan.tasks {
        for trial_index in 0..plan.num_trials {
            let semaphore = Arc::clone(&semaphore);
            let channels = Arc::clone(&channels);
            let users = Arc::clone(&users);
            let judge = Arc::clone(&judge);
            let cancel = cancel.clone();
            let task = task.clone();
            let turn_timeout = plan.turn_timeout;

            join_set.spawn(async move {
                // closed semaphore only happens at shutdown
                let _permit = semaphore.acquire_owned().await;

                let namespace = format!("{}-{}", task.id, trial_index);
                let driver = ConversationDriver::new(
                    task.clone(),
                    trial_index,
                    channels(),
                    Box::new(SimEnvironment::new(namespace)),
                    users(&task),
                    turn_timeout,
                    cancel,
                );
                let outcome = driver.run().await;
                let report = score(&task, &outcome, judge.as_ref()).await;

                TrialResult {
                    task_id: task.id.clone(),
                    task_type: task.task_type,
                    trial_index,
                    metrics: report.metrics,
                    indeterminate: report.indeterminate,
                    reward: report.reward,
                    terminal_reason: outcome.terminal,
                    duration_ms: outcome.duration.as_millis() as u64,
                }
            });
        }
    }

    let mut results = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => {
                // a panicked trial is dropped; its task shows up incomplete
                error!(error = %e, "trial task aborted");
            }
        }
    }

    aggregate(plan.num_trials, results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Envelope, Part};
    use crate::scorer::judge::Verdict;
    use crate::user::ScriptedUser;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoAgent;

    #[async_trait]
    impl AgentChannel for EchoAgent {
        async fn send(&mut self, _envelope: &Envelope, _new: bool) -> Result<Envelope> {
            Ok(Envelope::new("agent", vec![Part::text("Done.")]))
        }
    }

    struct SlowAgent;

    #[async_trait]
    impl AgentChannel for SlowAgent {
        async fn send(&mut self, _envelope: &Envelope, _new: bool) -> Result<Envelope> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Envelope::new("agent", vec![Part::text("too late")]))
        }
    }

    struct PassJudge;

    #[async_trait]
    impl Judge for PassJudge {
        async fn verdict(&self, _prompt: &str) -> Result<Verdict> {
            Ok(Verdict::Pass)
        }
    }

    fn simple_task(id: &str) -> Task {
        serde_json::from_value(json!({
            "id": id,
            "type": "base",
            "goal": "Say done.",
            "env": { "tools": [] }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_run_two_tasks_two_trials() {
        let plan = RunPlan {
            tasks: vec![simple_task("a"), simple_task("b")],
            num_trials: 2,
            max_concurrency: 2,
            turn_timeout: Duration::from_secs(5),
        };
        let result = run_benchmark(
            plan,
            Arc::new(|| Box::new(EchoAgent) as Box<dyn AgentChannel>),
            Arc::new(|_task: &Task| {
                Box::new(ScriptedUser::new(Vec::<String>::new())) as Box<dyn UserSimulator>
            }),
            Arc::new(PassJudge),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(result.tasks.len(), 2);
        assert!(result.incomplete_task_ids.is_empty());
        assert_eq!(result.overall.pass_hat_k, 1.0);
        for task in &result.tasks {
            assert_eq!(task.trials.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_cancelled_run_still_aggregates() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let plan = RunPlan {
            tasks: vec![simple_task("a")],
            num_trials: 1,
            max_concurrency: 1,
            turn_timeout: Duration::from_secs(5),
        };
        let result = run_benchmark(
            plan,
            Arc::new(|| Box::new(SlowAgent) as Box<dyn AgentChannel>),
            Arc::new(|_task: &Task| {
                Box::new(ScriptedUser::new(Vec::<String>::new())) as Box<dyn UserSimulator>
            }),
            Arc::new(PassJudge),
            cancel,
        )
        .await;

        // cancellation produced a scored, failing trial rather than a crash
        assert_eq!(result.tasks.len(), 1);
        assert_eq!(result.tasks[0].pass_at_k, 0.0);
    }
}
