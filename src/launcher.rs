//! Job launcher.
//!
//! Runs the selected jobs one after another against a shared session. A job
//! that fails is reported and the next job still runs.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{ConfigError, Error};
use crate::pipeline::controller::PipelineController;
use crate::pipeline::types::RunOutcome;
use crate::session::Session;

/// What happened to one job.
#[derive(Debug)]
pub enum JobStatus {
    /// The anchor falls on a configured non-operating weekday.
    Skipped { weekday: Weekday },
    Completed(RunOutcome),
    Failed(Error),
}

#[derive(Debug)]
pub struct JobReport {
    pub job: String,
    pub status: JobStatus,
}

impl JobReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, JobStatus::Failed(_))
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        match &self.status {
            JobStatus::Skipped { weekday } => format!("{}: skipped ({weekday})", self.job),
            JobStatus::Completed(RunOutcome::Success { files_synced }) => {
                format!("{}: synced {files_synced} file(s)", self.job)
            }
            JobStatus::Completed(outcome) => format!("{}: {}", self.job, outcome.label()),
            JobStatus::Failed(e) => format!("{}: FAILED: {e}", self.job),
        }
    }
}

/// Noon of `date` in `tz`, as an anchor instant.
pub fn anchor_for_date(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let noon = date.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN));
    tz.from_local_datetime(&noon)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| noon.and_utc())
}

/// The local weekday of `anchor` if it is configured as non-operating.
pub fn skipped_weekday(settings: &Settings, anchor: DateTime<Utc>) -> Option<Weekday> {
    let weekday = anchor.with_timezone(&settings.timezone).weekday();
    settings.skip_weekdays.contains(&weekday).then_some(weekday)
}

/// Run `jobs` in order. An empty selection means every configured job.
pub async fn run_jobs<S: Session + ?Sized>(
    session: &S,
    settings: &Settings,
    jobs: &[String],
    anchor: DateTime<Utc>,
    ignore_schedule: bool,
) -> Vec<JobReport> {
    let selected = if jobs.is_empty() {
        settings.job_names()
    } else {
        jobs.to_vec()
    };

    let gate = if ignore_schedule {
        None
    } else {
        skipped_weekday(settings, anchor)
    };

    let controller = PipelineController::new(session, settings);
    let mut reports = Vec::with_capacity(selected.len());

    for name in selected {
        let span = info_span!("job", job = %name, run_id = %Uuid::new_v4());

        let status = if let Some(weekday) = gate {
            info!(parent: &span, %weekday, "Non-operating day, skipping");
            JobStatus::Skipped { weekday }
        } else {
            match settings.job(&name) {
                Ok(job) => match controller.run(job, anchor).instrument(span).await {
                    Ok(outcome) => JobStatus::Completed(outcome),
                    Err(e) => JobStatus::Failed(e),
                },
                Err(e @ ConfigError::UnknownJob(_)) => {
                    warn!(parent: &span, "Unknown job requested");
                    JobStatus::Failed(e.into())
                }
                Err(e) => JobStatus::Failed(e.into()),
            }
        };

        reports.push(JobReport { job: name, status });
    }

    reports
}
