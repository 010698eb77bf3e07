//! CLI subcommand handlers.
//!
//! Command implementations live here so main.rs stays focused on argument
//! parsing and routing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{Task, TaskCatalog, TaskType};
use crate::channel::{AgentChannel, HttpAgentChannel};
use crate::config::schema::{Config, UserStrategy};
use crate::config::{load_config, save_config};
use crate::llm::ChatClient;
use crate::report::ResultRecord;
use crate::runner::{run_benchmark, RunPlan};
use crate::scorer::judge::{Judge, LlmJudge};
use crate::user::{LlmUser, ScriptedUser, UserSimulator};

/// Overrides from the `run` subcommand's flags; `None` keeps the config
/// file's value.
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub agent_url: Option<String>,
    pub trials: Option<u32>,
    pub concurrency: Option<usize>,
    pub output: Option<PathBuf>,
}

fn build_judge(config: &Config) -> Result<Arc<dyn Judge>> {
    let api_key = std::env::var(&config.judge.api_key_env).with_context(|| {
        format!(
            "judge API key environment variable {} is not set",
            config.judge.api_key_env
        )
    })?;
    let client = ChatClient::new(
        &config.judge.api_base,
        api_key,
        &config.judge.model,
        Duration::from_secs(config.judge.timeout_secs),
    )?;
    Ok(Arc::new(LlmJudge::new(client)))
}

fn build_user_factory(
    config: &Config,
) -> Result<Arc<dyn Fn(&Task) -> Box<dyn UserSimulator> + Send + Sync>> {
    match config.user.strategy {
        UserStrategy::Scripted => Ok(Arc::new(|task: &Task| {
            Box::new(ScriptedUser::from_task(task)) as Box<dyn UserSimulator>
        })),
        UserStrategy::Llm => {
            let api_key = std::env::var(&config.judge.api_key_env).with_context(|| {
                format!(
                    "user simulator reuses the judge key; {} is not set",
                    config.judge.api_key_env
                )
            })?;
            let model = config
                .user
                .model
                .clone()
                .unwrap_or_else(|| config.judge.model.clone());
            let client = ChatClient::new(
                &config.judge.api_base,
                api_key,
                model,
                Duration::from_secs(config.judge.timeout_secs),
            )?;
            Ok(Arc::new(move |task: &Task| {
                match &task.user_scenario {
                    Some(scenario) => Box::new(LlmUser::new(client.clone(), scenario.clone()))
                        as Box<dyn UserSimulator>,
                    // tasks without a scenario stay scripted
                    None => Box::new(ScriptedUser::from_task(task)),
                }
            }))
        }
    }
}

fn select_tasks(catalog: &TaskCatalog, config: &Config) -> Vec<Task> {
    let mut tasks = Vec::new();
    for task_type in TaskType::ALL {
        let selection = config.tasks.selection_for(task_type);
        tasks.extend(catalog.select(task_type, selection).into_iter().cloned());
    }
    tasks
}

/// `run`: execute the benchmark against an agent endpoint.
pub async fn run_command(
    task_file: &Path,
    config_path: Option<&Path>,
    overrides: RunOverrides,
) -> Result<()> {
    let mut config = load_config(config_path);
    if let Some(url) = overrides.agent_url {
        config.agent.url = url;
    }
    if let Some(trials) = overrides.trials {
        config.run.num_trials = trials;
    }
    if let Some(concurrency) = overrides.concurrency {
        config.run.max_concurrency = concurrency;
    }
    let output = overrides
        .output
        .unwrap_or_else(|| PathBuf::from(&config.run.output));

    let catalog = TaskCatalog::load(task_file)?;
    let tasks = select_tasks(&catalog, &config);
    if tasks.is_empty() {
        return Err(anyhow!("task selection matched no tasks"));
    }
    info!(tasks = tasks.len(), agent = %config.agent.url, "run starting");

    let judge = build_judge(&config)?;
    let users = build_user_factory(&config)?;
    let agent_url = config.agent.url.clone();
    let turn_timeout_secs = config.agent.turn_timeout_secs;
    let channels = Arc::new(move || {
        Box::new(HttpAgentChannel::new(agent_url.clone(), turn_timeout_secs))
            as Box<dyn AgentChannel>
    });

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling in-flight trials");
            cancel_on_signal.cancel();
        }
    });

    let plan = RunPlan {
        tasks,
        num_trials: config.run.num_trials,
        max_concurrency: config.run.max_concurrency,
        turn_timeout: Duration::from_secs(config.agent.turn_timeout_secs),
    };
    let aggregate = run_benchmark(plan, channels, users, judge, cancel).await;

    let record = ResultRecord::new(&config.agent.url, aggregate);
    record.save(&output)?;
    println!("{}", record.render_summary());
    println!("full record written to {}", output.display());
    Ok(())
}

/// `init`: write a default config file as a starting point for edits.
pub fn init_command(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(anyhow!("refusing to overwrite {}", path.display()));
    }
    save_config(&Config::default(), path)?;
    println!("wrote default config to {}", path.display());
    Ok(())
}

/// `report`: re-print the summary from a persisted result record.
pub fn report_command(input: &Path) -> Result<()> {
    let record = ResultRecord::load(input)?;
    println!("{}", record.render_summary());
    Ok(())
}

/// `tasks`: list the catalog contents.
pub fn tasks_command(task_file: &Path) -> Result<()> {
    let catalog = TaskCatalog::load(task_file)?;
    println!("{:<24} {:<16} {:>6} {:>7}", "id", "type", "tools", "budget");
    for task in &catalog.tasks {
        println!(
            "{:<24} {:<16} {:>6} {:>7}",
            task.id,
            task.task_type.label(),
            task.env.tools.len(),
            task.step_budget
        );
    }
    println!("{} tasks", catalog.tasks.len());
    Ok(())
}
