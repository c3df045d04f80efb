use std::process::ExitCode;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::Parser;

use dcv_sync::config::Settings;
use dcv_sync::error::ConfigError;
use dcv_sync::launcher::{self, anchor_for_date};
use dcv_sync::session::GoogleSession;

/// Fetch the daily DCV attachments, decrypt them and mirror them into Drive.
#[derive(Debug, Parser)]
#[command(name = "dcv-sync", version, about)]
struct Cli {
    /// Job to run (repeatable). Defaults to every configured job.
    #[arg(long = "job", value_name = "NAME")]
    jobs: Vec<String>,

    /// Run as if today were this date (YYYY-MM-DD, in the pipeline time zone).
    #[arg(long, value_name = "YYYY-MM-DD")]
    date: Option<NaiveDate>,

    /// Run even on a configured non-operating weekday.
    #[arg(long)]
    ignore_schedule: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = Settings::from_env().context("Invalid configuration")?;

    let token = settings
        .access_token
        .clone()
        .ok_or_else(|| ConfigError::MissingEnvVar("GOOGLE_ACCESS_TOKEN".into()))?;

    let anchor = match cli.date {
        Some(date) => anchor_for_date(date, settings.timezone),
        None => Utc::now(),
    };

    eprintln!("DCV sync v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Time zone: {}", settings.timezone);
    eprintln!("   Anchor: {}", anchor.with_timezone(&settings.timezone));

    let session = GoogleSession::new(token, settings.endpoints.clone(), settings.http_timeout)
        .context("Failed to build HTTP client")?;

    let reports =
        launcher::run_jobs(&session, &settings, &cli.jobs, anchor, cli.ignore_schedule).await;

    for report in &reports {
        eprintln!("   {}", report.summary());
    }

    if reports.iter().any(|r| r.is_failure()) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
