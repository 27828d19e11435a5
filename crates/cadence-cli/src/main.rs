mod tasks;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use cadence_core::app::{LastRunStatus, Scheduler, SchedulerBuilder, TaskListing, ToggleResult};
use cadence_core::config::{LogConfig, SchedulerConfig};
use cadence_core::domain::{
    BatchReport, ExecutionContext, ExecutionPolicy, Frequency, GroupDraft, GroupId, OutcomeKind,
    RunOutcome, TaskDraft, TaskId, TaskRecord,
};
use cadence_core::impls::SqliteTaskStore;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "cadence", about = "Persistent task scheduler")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database (overrides config)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every due task. Call this from cron
    Run,
    /// Run tasks now, whether or not they are due
    Execute {
        #[arg(required = true)]
        ids: Vec<TaskId>,
    },
    /// List tasks by group, with missing tasks last
    List,
    /// Add a task
    Add(AddArgs),
    /// Edit an idle task. Omitted flags keep their stored values
    Edit(EditArgs),
    /// Enable or disable a task
    Toggle { id: TaskId },
    /// Run tasks on the next batch, enabling them if needed
    Schedule {
        #[arg(required = true)]
        ids: Vec<TaskId>,
    },
    /// Clear a task's execution marks. Work in flight is not interrupted
    Stop { id: TaskId },
    /// Delete a task
    Delete { id: TaskId },
    /// Report when the batch last ran. Fails if it never finished
    Check,
    /// List the registered task types
    Info,
    /// Manage task groups
    Group {
        #[command(subcommand)]
        command: GroupCommands,
    },
}

#[derive(Args)]
struct AddArgs {
    /// Registered task type, e.g. cadence.system.echo.v1
    #[arg(long = "type")]
    task_type: String,

    /// Task payload as JSON
    #[arg(long, default_value = "null")]
    payload: String,

    #[arg(long, default_value = "")]
    description: String,

    #[arg(long)]
    group: Option<GroupId>,

    /// Store the task disabled
    #[arg(long)]
    disabled: bool,

    #[command(flatten)]
    schedule: ScheduleArgs,
}

#[derive(Args)]
struct EditArgs {
    id: TaskId,

    /// Task payload as JSON
    #[arg(long)]
    payload: Option<String>,

    #[arg(long)]
    description: Option<String>,

    #[arg(long, conflicts_with = "ungroup")]
    group: Option<GroupId>,

    /// Take the task out of its group
    #[arg(long)]
    ungroup: bool,

    #[command(flatten)]
    schedule: ScheduleArgs,
}

#[derive(Args)]
struct ScheduleArgs {
    /// Run once at this time (unix seconds or RFC 3339)
    #[arg(long, conflicts_with_all = ["every", "start", "end", "multiple"])]
    at: Option<String>,

    /// Recur: interval in seconds, or a cron expression
    #[arg(long)]
    every: Option<String>,

    /// First due time of a recurring task (default: now)
    #[arg(long, requires = "every")]
    start: Option<String>,

    /// No runs after this time
    #[arg(long, requires = "every")]
    end: Option<String>,

    /// Allow overlapping runs
    #[arg(long, requires = "every")]
    multiple: bool,
}

impl ScheduleArgs {
    /// The policy these flags describe, or `None` when none were given.
    fn policy(&self, now: DateTime<Utc>) -> anyhow::Result<Option<ExecutionPolicy>> {
        if let Some(at) = &self.at {
            return Ok(Some(ExecutionPolicy::single(parse_time(at)?)));
        }
        let Some(every) = &self.every else {
            return Ok(None);
        };
        let start = self.start.as_deref().map(parse_time).transpose()?.unwrap_or(now);
        let mut policy = match Frequency::parse(every)? {
            Frequency::Interval { seconds } => ExecutionPolicy::every(start, seconds),
            Frequency::Cron { expression } => ExecutionPolicy::Recurring {
                start,
                end: None,
                frequency: Frequency::Cron { expression },
                allow_multiple: false,
            },
        };
        if let Some(end) = self.end.as_deref() {
            policy = policy.until(parse_time(end)?);
        }
        if self.multiple {
            policy = policy.allowing_multiple();
        }
        Ok(Some(policy))
    }
}

#[derive(Subcommand)]
enum GroupCommands {
    /// Add a group
    Add {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Lower runs first
        #[arg(long, default_value_t = 0)]
        sorting: i64,
    },
    /// List groups
    List,
    /// Rename, describe or re-sort a group
    Edit {
        id: GroupId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        sorting: Option<i64>,
    },
    /// Delete a group. Its tasks are kept
    Delete { id: GroupId },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::load_from(path)?,
        None => SchedulerConfig::default(),
    };
    if let Some(database) = cli.database {
        config.database = database;
    }
    init_tracing(&config.log);

    let store = SqliteTaskStore::open(&config.database)
        .with_context(|| format!("failed to open {}", config.database.display()))?;
    let scheduler = tasks::register(SchedulerBuilder::new(Arc::new(store)))?
        .expect_tasks(tasks::EXPECTED)
        .build()?;

    let json = cli.json;
    match cli.command {
        Commands::Run => {
            let report = scheduler.run_due_tasks(ExecutionContext::Cron).await?;
            emit(json, &report, print_batch)?;
        }
        Commands::Execute { ids } => return execute(&scheduler, ids, json).await,
        Commands::List => {
            let listing = scheduler.list_tasks().await?;
            emit(json, &listing, print_listing)?;
        }
        Commands::Add(args) => {
            let draft = draft_from(args, scheduler.now())?;
            let id = scheduler.add_task(draft).await?;
            emit(json, &id, |id| println!("added {id}"))?;
        }
        Commands::Edit(args) => {
            let mut task = scheduler.fetch_task(args.id).await?;
            apply_edit(&mut task, args, scheduler.now())?;
            scheduler.save_task(&task).await?;
            emit(json, &task.id, |id| println!("{id} saved"))?;
        }
        Commands::Toggle { id } => {
            let result = scheduler.toggle_disabled(id).await?;
            emit(json, &result, |result| match result {
                ToggleResult::Disabled => println!("{id} disabled"),
                ToggleResult::Enabled => println!("{id} enabled"),
                ToggleResult::Requeued { at } => println!("{id} enabled, runs at {at}"),
            })?;
        }
        Commands::Schedule { ids } => {
            for id in ids {
                let enabled = scheduler.schedule_for_next_cron(id).await?;
                if enabled {
                    println!("{id} enabled and queued for the next run");
                } else {
                    println!("{id} queued for the next run");
                }
            }
        }
        Commands::Stop { id } => {
            let cleared = scheduler.stop_task(id).await?;
            emit(json, &cleared, |cleared| {
                println!("{id}: cleared {cleared} execution mark(s)")
            })?;
        }
        Commands::Delete { id } => {
            scheduler.remove_task(id).await?;
            println!("{id} deleted");
        }
        Commands::Check => {
            let status = scheduler.last_run_status().await?;
            emit(json, &status, print_last_run)?;
            if !matches!(status, LastRunStatus::Complete(_)) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Info => {
            let infos = scheduler.registered_task_types();
            emit(json, &infos, |infos| {
                for info in infos {
                    println!("{:<28} [{}] {}", info.task_type, info.extension, info.title);
                    if !info.description.is_empty() {
                        println!("{:<28} {}", "", info.description);
                    }
                }
            })?;
        }
        Commands::Group { command } => group(&scheduler, command, json).await?,
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Prints `value` as JSON, or through `human` otherwise.
fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

async fn execute(scheduler: &Scheduler, ids: Vec<TaskId>, json: bool) -> anyhow::Result<ExitCode> {
    let started_at = scheduler.now();
    let mut code = ExitCode::SUCCESS;
    let mut outcomes = Vec::new();
    for id in ids {
        match scheduler.execute_task(id, ExecutionContext::Manual).await {
            Ok(outcome) => {
                if outcome.kind() != OutcomeKind::Succeeded {
                    code = ExitCode::FAILURE;
                }
                if !json {
                    println!("{id}: {}", describe(&outcome));
                }
                outcomes.push((id, outcome));
            }
            Err(err) => {
                tracing::error!(task_id = %id, error = %err, "execution failed");
                code = ExitCode::FAILURE;
            }
        }
    }
    scheduler
        .record_last_run(started_at, ExecutionContext::Manual)
        .await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    }
    Ok(code)
}

async fn group(scheduler: &Scheduler, command: GroupCommands, json: bool) -> anyhow::Result<()> {
    match command {
        GroupCommands::Add {
            name,
            description,
            sorting,
        } => {
            let draft = GroupDraft::new(name)
                .with_description(description)
                .sorted_at(sorting);
            let id = scheduler.add_group(draft).await?;
            emit(json, &id, |id| println!("added {id}"))?;
        }
        GroupCommands::List => {
            let groups = scheduler.list_groups().await?;
            emit(json, &groups, |groups| {
                for group in groups {
                    println!("{:<10} {:>5}  {}", group.id, group.sorting, group.name);
                }
            })?;
        }
        GroupCommands::Edit {
            id,
            name,
            description,
            sorting,
        } => {
            let mut group = scheduler.fetch_group(id).await?;
            if let Some(name) = name {
                group.name = name;
            }
            if let Some(description) = description {
                group.description = description;
            }
            if let Some(sorting) = sorting {
                group.sorting = sorting;
            }
            scheduler.save_group(&group).await?;
            println!("{id} saved");
        }
        GroupCommands::Delete { id } => {
            scheduler.remove_group(id).await?;
            println!("{id} deleted");
        }
    }
    Ok(())
}

fn draft_from(args: AddArgs, now: DateTime<Utc>) -> anyhow::Result<TaskDraft> {
    let policy = args
        .schedule
        .policy(now)?
        .ok_or_else(|| anyhow!("either --at or --every is required"))?;
    let payload = parse_payload(&args.payload)?;
    let mut draft = TaskDraft::new(args.task_type, policy)
        .with_payload(payload)
        .with_description(args.description);
    if let Some(group) = args.group {
        draft = draft.in_group(group);
    }
    if args.disabled {
        draft = draft.disabled();
    }
    Ok(draft)
}

fn apply_edit(task: &mut TaskRecord, args: EditArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    if let Some(policy) = args.schedule.policy(now)? {
        task.policy = policy;
    }
    if let Some(payload) = args.payload.as_deref() {
        task.payload = parse_payload(payload)?;
    }
    if let Some(description) = args.description {
        task.description = description;
    }
    if args.ungroup {
        task.group = None;
    } else if let Some(group) = args.group {
        task.group = Some(group);
    }
    Ok(())
}

fn parse_payload(raw: &str) -> anyhow::Result<serde_json::Value> {
    serde_json::from_str(raw).context("--payload is not valid JSON")
}

/// Unix seconds or RFC 3339.
fn parse_time(input: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(seconds) = input.parse::<i64>() {
        return DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| anyhow!("timestamp {seconds} is out of range"));
    }
    let parsed = DateTime::parse_from_rfc3339(input)
        .with_context(|| format!("`{input}` is neither unix seconds nor RFC 3339"))?;
    Ok(parsed.with_timezone(&Utc))
}

fn describe(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Succeeded => "succeeded".to_string(),
        RunOutcome::Failed(failure) => {
            format!("failed (code {}): {}", failure.code, failure.message)
        }
        RunOutcome::Skipped { reason } => format!("skipped ({reason:?})"),
    }
}

fn print_batch(report: &BatchReport) {
    for run in &report.runs {
        println!("{}: {}", run.task_id, describe(&run.outcome));
    }
    for missing in &report.missing {
        println!("{}: not run, {}", missing.id, missing.reason);
    }
    println!(
        "{} succeeded, {} failed, {} skipped, {} missing",
        report.count(OutcomeKind::Succeeded),
        report.count(OutcomeKind::Failed),
        report.count(OutcomeKind::Skipped),
        report.missing.len()
    );
}

fn print_listing(listing: &TaskListing) {
    for section in &listing.sections {
        match (&section.group, section.group_id) {
            (Some(group), _) => println!("== {} ==", group.name),
            (None, Some(id)) => println!("== {id} (unknown group) =="),
            (None, None) => println!("== ungrouped =="),
        }
        for task in &section.tasks {
            let next = task
                .next_execution
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "-".into());
            let late = if task.late { " (late)" } else { "" };
            println!(
                "{:<10} {:<10} {:<24} next {next}{late}",
                task.id,
                format!("{:?}", task.state).to_lowercase(),
                task.title
            );
            if let Some(failure) = &task.last_failure {
                println!("{:<10} last run failed: {}", "", failure.message);
            }
        }
    }
    if !listing.missing.is_empty() {
        println!("== missing ==");
        for missing in &listing.missing {
            println!("{:<10} {:<24} {}", missing.id, missing.task_type, missing.reason);
        }
    }
}

fn print_last_run(status: &LastRunStatus) {
    match status {
        LastRunStatus::Never => println!("the scheduler has never run"),
        LastRunStatus::Incomplete(run) => {
            println!("last run ({}) started {} and never finished", run.context, run.start)
        }
        LastRunStatus::Complete(run) => {
            let end = run.end.map(|end| end.to_string()).unwrap_or_default();
            println!("last run ({}) started {} and finished {end}", run.context, run.start)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()
    }

    fn parse(args: &[&str]) -> AddArgs {
        let mut argv = vec!["cadence", "add"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Add(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn times_accept_unix_seconds_and_rfc3339() {
        assert_eq!(parse_time("1775001600").unwrap(), now());
        assert_eq!(parse_time("2026-04-01T02:00:00+02:00").unwrap(), now());
        assert!(parse_time("tomorrow").is_err());
    }

    #[test]
    fn single_drafts_come_from_at() {
        let draft = draft_from(
            parse(&["--type", "x.v1", "--at", "1775001600", "--payload", "{\"a\":1}"]),
            now(),
        )
        .unwrap();
        assert_eq!(draft.policy, ExecutionPolicy::single(now()));
        assert_eq!(draft.payload["a"], 1);
    }

    #[test]
    fn recurring_drafts_start_from_now() {
        let draft = draft_from(
            parse(&["--type", "x.v1", "--every", "*/5 * * * *", "--multiple"]),
            now(),
        )
        .unwrap();
        assert!(draft.policy.allows_multiple());
        assert_eq!(draft.policy.frequency_label().as_deref(), Some("*/5 * * * *"));
        assert_eq!(
            draft.policy.compute_next_due(None).unwrap(),
            Some(now() + chrono::Duration::minutes(5))
        );
    }

    #[test]
    fn at_conflicts_with_recurring_flags() {
        let parsed = Cli::try_parse_from(["cadence", "add", "--type", "x", "--at", "1", "--every", "60"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn edits_only_replace_what_was_given() {
        let draft = TaskDraft::new("x.v1", ExecutionPolicy::every(now(), 60))
            .with_payload(serde_json::json!({ "a": 1 }))
            .with_description("hourly")
            .in_group(GroupId::new(2));
        let mut task = TaskRecord::from_draft(TaskId::new(7), draft, Some(now()));

        let cli = Cli::try_parse_from(["cadence", "edit", "7", "--ungroup", "--at", "1775001600"])
            .unwrap();
        let Commands::Edit(args) = cli.command else {
            unreachable!()
        };
        apply_edit(&mut task, args, now()).unwrap();

        assert_eq!(task.policy, ExecutionPolicy::single(now()));
        assert_eq!(task.group, None);
        assert_eq!(task.description, "hourly");
        assert_eq!(task.payload["a"], 1);
    }

    #[test]
    fn recurring_only_flags_need_every() {
        assert!(Cli::try_parse_from(["cadence", "edit", "7", "--multiple"]).is_err());
        assert!(Cli::try_parse_from(["cadence", "edit", "7", "--group", "1", "--ungroup"]).is_err());
    }

    #[test]
    fn ids_parse_with_or_without_prefix() {
        let cli = Cli::try_parse_from(["cadence", "execute", "task-3", "4"]).unwrap();
        match cli.command {
            Commands::Execute { ids } => assert_eq!(ids, vec![TaskId::new(3), TaskId::new(4)]),
            _ => unreachable!(),
        }
    }
}
