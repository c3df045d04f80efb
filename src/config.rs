//! Configuration types.
//!
//! Everything is read once at startup into [`Settings`] and passed down by
//! reference; no other module touches the environment.

use std::time::Duration;

use chrono::{NaiveDate, Weekday};
use chrono_tz::Tz;
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::pipeline::locator::FilenamePattern;
use crate::pipeline::query::{SearchCriteria, is_valid_date_format};
use crate::session::GoogleEndpoints;
use crate::session::google::{DEFAULT_DRIVE_BASE, DEFAULT_DRIVE_UPLOAD_BASE, DEFAULT_GMAIL_BASE};

pub const DEFAULT_TIMEZONE: &str = "America/Santiago";
pub const DEFAULT_DATE_OFFSET_DAYS: u32 = 1;
pub const DEFAULT_SEARCH_PAGE_SIZE: u32 = 5;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

/// One integration: what to search for, which attachment to take, where to put it.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub name: String,
    /// Subject templates, `{date}` is replaced by the formatted target date.
    pub subject_templates: Vec<String>,
    pub body_fragment: Option<String>,
    /// strftime pattern for the date token.
    pub date_format: String,
    /// Literal attachment name prefix, placed before the date token.
    pub attachment_prefix: String,
    /// Regex fragment matched after the date token.
    pub attachment_suffix: String,
    pub case_insensitive: bool,
    /// Environment variable the container id is read from (for error hints).
    pub container_env: String,
    pub container_id: Option<String>,
}

impl JobConfig {
    /// Daily `L002<yyyymmdd>NNNN.txt` movements and balances file.
    pub fn movimientos_saldos() -> Self {
        Self {
            name: "movimientos-saldos".into(),
            subject_templates: vec!["DCV - Archivo".into(), "L002{date}".into()],
            body_fragment: None,
            date_format: "%Y%m%d".into(),
            attachment_prefix: "L002".into(),
            attachment_suffix: r"\d{4}\.txt".into(),
            case_insensitive: true,
            container_env: "DRIVE_FOLDER_ID_MOVIMIENTOS_Y_SALDOS".into(),
            container_id: None,
        }
    }

    /// Daily `RVCA<yymmdd>10228.DAT` custody file.
    pub fn custodia_instrumentos() -> Self {
        Self {
            name: "custodia-instrumentos".into(),
            subject_templates: vec![
                "DCV - Archivo RVCA".into(),
                "{date}".into(),
                "10228.DAT".into(),
            ],
            body_fragment: None,
            date_format: "%y%m%d".into(),
            attachment_prefix: "RVCA".into(),
            attachment_suffix: r"10228\.DAT(?:\.zip)?".into(),
            case_insensitive: true,
            container_env: "DRIVE_FOLDER_ID_CUSTODIA_INSTRUMENTOS".into(),
            container_id: None,
        }
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::custodia_instrumentos(), Self::movimientos_saldos()]
    }

    pub fn criteria(&self, anchor: NaiveDate, offset_days: u32) -> SearchCriteria {
        SearchCriteria {
            subject_fragments: self.subject_templates.clone(),
            body_fragment: self.body_fragment.clone(),
            require_attachment: true,
            date_anchor: anchor,
            date_offset_days: offset_days,
            date_format: self.date_format.clone(),
        }
    }

    /// Attachment pattern for the given date token.
    pub fn filename_pattern(&self, date_token: &str) -> Result<FilenamePattern, ConfigError> {
        FilenamePattern::new(
            &self.attachment_prefix,
            date_token,
            &self.attachment_suffix,
            self.case_insensitive,
        )
        .map_err(|e| ConfigError::InvalidValue {
            key: format!("{} attachment pattern", self.name),
            message: e.to_string(),
        })
    }

    /// The destination container, or a configuration error naming the variable.
    pub fn require_container(&self) -> Result<&str, ConfigError> {
        self.container_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: self.container_env.clone(),
                hint: format!("Set it to the Drive folder id for job '{}'.", self.name),
            })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_date_format(&self.date_format) {
            return Err(ConfigError::InvalidValue {
                key: format!("{} date format", self.name),
                message: format!("'{}' is not a valid strftime pattern", self.date_format),
            });
        }
        self.filename_pattern("").map(|_| ())
    }
}

/// Process-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Zone in which "today" is computed.
    pub timezone: Tz,
    pub date_offset_days: u32,
    /// Weekdays on which no job runs.
    pub skip_weekdays: Vec<Weekday>,
    /// Maximum number of candidate messages fetched per search.
    pub search_page_size: u32,
    pub zip_password: Option<SecretString>,
    pub access_token: Option<SecretString>,
    pub endpoints: GoogleEndpoints,
    pub http_timeout: Duration,
    pub jobs: Vec<JobConfig>,
}

impl Settings {
    /// Build settings from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        // Secrets are passed through verbatim; only an empty value is unset.
        let secret = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .map(SecretString::from)
        };

        let timezone_name = get("PIPELINE_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.into());
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "PIPELINE_TIMEZONE".into(),
                message: format!("unknown time zone '{timezone_name}'"),
            })?;

        let date_offset_days =
            parse_number(&get, "PIPELINE_DATE_OFFSET_DAYS", DEFAULT_DATE_OFFSET_DAYS)?;

        let search_page_size =
            parse_number(&get, "MAIL_SEARCH_PAGE_SIZE", DEFAULT_SEARCH_PAGE_SIZE)?;
        if search_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAIL_SEARCH_PAGE_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        let http_timeout = Duration::from_secs(parse_number(
            &get,
            "HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?);

        let skip_weekdays = match get("PIPELINE_SKIP_WEEKDAYS") {
            Some(raw) => parse_weekdays(&raw)?,
            None => Vec::new(),
        };

        let endpoints = GoogleEndpoints {
            gmail: get("GMAIL_API_BASE").unwrap_or_else(|| DEFAULT_GMAIL_BASE.into()),
            drive: get("DRIVE_API_BASE").unwrap_or_else(|| DEFAULT_DRIVE_BASE.into()),
            drive_upload: get("DRIVE_UPLOAD_BASE")
                .unwrap_or_else(|| DEFAULT_DRIVE_UPLOAD_BASE.into()),
        };

        let mut jobs = JobConfig::builtin();
        for job in &mut jobs {
            job.container_id = get(&job.container_env);
            job.validate()?;
        }

        Ok(Self {
            timezone,
            date_offset_days,
            skip_weekdays,
            search_page_size,
            zip_password: secret("ZIP_PASSWORD"),
            access_token: secret("GOOGLE_ACCESS_TOKEN"),
            endpoints,
            http_timeout,
            jobs,
        })
    }

    pub fn job(&self, name: &str) -> Result<&JobConfig, ConfigError> {
        self.jobs
            .iter()
            .find(|j| j.name == name)
            .ok_or_else(|| ConfigError::UnknownJob(name.to_string()))
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.name.clone()).collect()
    }

    /// The archive password, required before any network call.
    pub fn require_password(&self) -> Result<&SecretString, ConfigError> {
        self.zip_password
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("ZIP_PASSWORD".into()))
    }
}

fn parse_number<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Comma-separated weekday names (`Sat,Sun`, `saturday`, ...).
pub fn parse_weekdays(raw: &str) -> Result<Vec<Weekday>, ConfigError> {
    let mut days = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let day: Weekday = item.parse().map_err(|_| ConfigError::InvalidValue {
            key: "PIPELINE_SKIP_WEEKDAYS".into(),
            message: format!("'{item}' is not a weekday"),
        })?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    Ok(days)
}
