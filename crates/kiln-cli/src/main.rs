use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kiln_core::domain::{Credentials, JobState, Principal, RequestId};
use kiln_core::observability::init_logging;
use kiln_core::{AppBuilder, BuildService, KilnConfig};
use tokio::time::sleep;
use tracing::info;

/// Run project builds from uploaded archives and collect their logs.
#[derive(Debug, Parser)]
#[command(name = "kiln", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit an archive, follow its log and exit with the build result.
    Build(BuildArgs),

    /// Print the effective configuration (file + KILN_* overrides).
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct BuildArgs {
    /// Zip or gzip tarball containing the project.
    archive: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "local")]
    user: String,

    #[arg(long, default_value = "")]
    password: String,

    /// Override `build.timeout_secs`.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// How often to poll for new log lines.
    #[arg(long, default_value_t = 200)]
    poll_ms: u64,

    /// Print the final job status as JSON after the log.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Build(args) => build(args).await,
        Command::Config { config } => {
            let mut config = KilnConfig::load(config.as_deref()).context("loading config")?;
            if let Some(auth) = config.auth.as_mut() {
                auth.password = "***".to_string();
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn build(args: BuildArgs) -> Result<ExitCode> {
    let mut config = KilnConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(secs) = args.timeout_secs {
        config.build.timeout_secs = secs;
    }
    init_logging(&config.logging);

    let app = AppBuilder::new(config).build().await?;
    let service = app.service();
    let principal = service.authenticate(&Credentials::new(args.user, args.password))?;

    let id = submit(&service, &principal, &args.archive).await?;
    info!(request = %id, archive = %args.archive.display(), "submitted");

    let state = follow(&service, &principal, id, Duration::from_millis(args.poll_ms)).await?;
    if args.json {
        if let Some(status) = service.job_status(&principal, id)? {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    drop(service);
    app.shutdown().await;

    Ok(match state {
        JobState::Succeeded => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

async fn submit(service: &BuildService, principal: &Principal, archive: &Path) -> Result<RequestId> {
    let mut file = tokio::fs::File::open(archive)
        .await
        .with_context(|| format!("opening {}", archive.display()))?;
    Ok(service.submit_build(principal, &mut file).await?)
}

/// Print new log lines until the job reaches a terminal state.
async fn follow(service: &BuildService, principal: &Principal, id: RequestId, poll: Duration) -> Result<JobState> {
    let mut printed = 0;
    loop {
        // 状態 → ログの順に読む（終端ならログは出揃っている）
        let state = service
            .job_status(principal, id)?
            .map(|s| s.state)
            .context("job status disappeared")?;

        // 改行を含む 1 行もあるので entry 単位で数える
        let entries = service.log_entries(principal, id).await?;
        for entry in entries.iter().skip(printed) {
            println!("{}", entry.line);
        }
        printed = printed.max(entries.len());

        if state.is_terminal() {
            return Ok(state);
        }
        sleep(poll).await;
    }
}
