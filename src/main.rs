mod cli;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio::sync::watch;
use cli::{Cli, Command};
use qroute::{
    AuditRecord, BackgroundJobClient, ContinuationOptions, ContinuationResolver,
    DelayedJobScheduler, InMemoryStorage, Invocation, JobId, QrouteConfig, State, StateName,
};
use ui::Reporter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = QrouteConfig::load_from(&cli.config)?
        .with_default_queue_override(cli.default_queue.clone());
    config.validate()?;
    if cli.verbose {
        config.log_filter = "debug".to_string();
    }
    qroute::logging::init(&config.log_filter, cli.json_logs);

    match cli.command {
        Command::Demo { delay_secs } => run_demo(&config, delay_secs).await,
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn hello(name: &str) -> Invocation {
    Invocation::new("HelloService", "hello").arg(name)
}

fn created(id: Option<JobId>) -> Result<JobId> {
    id.ok_or_else(|| anyhow!("job creation was cancelled by a filter"))
}

fn state_of(client: &BackgroundJobClient<InMemoryStorage>, id: &JobId) -> Result<State> {
    client
        .get_state(id)?
        .with_context(|| format!("job {id} disappeared"))
}

async fn run_demo(config: &QrouteConfig, delay_secs: u64) -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let client = BackgroundJobClient::from_config(storage.clone(), config);
    let scheduler = DelayedJobScheduler::new(config.scheduler_poll_interval());
    let ui = Reporter::new();

    ui.section("Fire-and-forget");
    let enqueued = created(client.enqueue("hello", hello("jack"))?)?;
    ui.job("enqueue", &enqueued, &state_of(&client, &enqueued)?);
    let plain = created(client.enqueue("", hello("jill"))?)?;
    ui.job("default", &plain, &state_of(&client, &plain)?);

    ui.section("Delayed");
    let delay = i64::try_from(delay_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .context("delay out of range")?;
    let delayed = created(client.schedule("hello", hello("jack"), delay)?)?;
    ui.job("schedule", &delayed, &state_of(&client, &delayed)?);
    let spinner = ui.wait(&format!(
        "delayed-job scheduler polling every {:?}",
        scheduler.poll_interval()
    ));
    let (shutdown, stop) = watch::channel(false);
    let deadline = Duration::from_secs(delay_secs)
        .saturating_add(scheduler.poll_interval().saturating_mul(2));
    let (moved, _) = tokio::join!(scheduler.run_until(&client, stop), async {
        let started = tokio::time::Instant::now();
        while started.elapsed() < deadline {
            let still_scheduled = matches!(
                client.get_state(&delayed),
                Ok(Some(State::Scheduled { .. }))
            );
            if !still_scheduled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let _ = shutdown.send(true);
    });
    spinner.finish_and_clear();
    ui.note(&format!("scheduler enqueued {moved} job(s)"));
    ui.job("swept", &delayed, &state_of(&client, &delayed)?);

    ui.section("Continuation");
    let parent = created(client.enqueue("", hello("parent"))?)?;
    client.change_state(&parent, State::processing("demo-server"), Some(StateName::Enqueued))?;
    let child = created(client.continue_job_with(
        &parent,
        "hello",
        hello("jack"),
        None,
        ContinuationOptions::OnlyOnSucceeded,
    )?)?;
    ui.job("continuation", &child, &state_of(&client, &child)?);
    client.change_state(&parent, State::succeeded(), Some(StateName::Processing))?;
    ui.job("parent", &parent, &state_of(&client, &parent)?);
    ContinuationResolver::new().trigger(&client, &parent)?;
    ui.job("activated", &child, &state_of(&client, &child)?);

    ui.section("Failure and retry");
    let failing = created(client.enqueue("hello", Invocation::new("HelloService", "failed"))?)?;
    client.change_state(&failing, State::processing("demo-server"), Some(StateName::Enqueued))?;
    client.change_state(&failing, State::failed("Error testing"), Some(StateName::Processing))?;
    ui.job("failed", &failing, &state_of(&client, &failing)?);

    ui.section("Audit");
    for id in [&enqueued, &delayed, &child, &failing] {
        if let Some(record) = storage.record(id) {
            ui.print_audit(&AuditRecord::from_record(&record));
        }
    }
    Ok(())
}
