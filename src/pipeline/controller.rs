//! Pipeline controller: one end-to-end run of a job.
//!
//! Stages run strictly in order: validate, build query, locate, download,
//! decrypt, sync each member. Any error aborts the run; members synced before
//! the error stay synced and the count is carried in [`SyncError`].

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tracing::{debug, error, info};

use crate::config::{JobConfig, Settings};
use crate::error::{ArchiveError, Error, Result, SyncError};
use crate::pipeline::archive;
use crate::pipeline::locator::{FilenamePattern, locate};
use crate::pipeline::query::local_date;
use crate::pipeline::sync::sync;
use crate::pipeline::types::RunOutcome;
use crate::session::Session;

/// Where a run currently is. Reported with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Start,
    QueryBuilt,
    MessageLocated,
    AttachmentDownloaded,
    ArchiveOpened,
    Syncing { synced: usize },
    Done,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::QueryBuilt => f.write_str("query_built"),
            Self::MessageLocated => f.write_str("message_located"),
            Self::AttachmentDownloaded => f.write_str("attachment_downloaded"),
            Self::ArchiveOpened => f.write_str("archive_opened"),
            Self::Syncing { synced } => write!(f, "syncing({synced})"),
            Self::Done => f.write_str("done"),
        }
    }
}

impl RunStage {
    /// The step a run in this stage is working on, i.e. the one a failure
    /// belongs to.
    pub fn attempting(&self) -> &'static str {
        match self {
            Self::Start => "validate",
            Self::QueryBuilt => "locate",
            Self::MessageLocated => "download",
            Self::AttachmentDownloaded => "decrypt",
            Self::ArchiveOpened | Self::Syncing { .. } => "sync",
            Self::Done => "done",
        }
    }
}

/// Archive read failure inside the member loop. Once something is synced the
/// error keeps the count so the partial state is visible.
fn member_read_failure(source: ArchiveError, synced: usize) -> Error {
    if synced == 0 {
        return source.into();
    }
    SyncError {
        member: source.member().unwrap_or("<unreadable>").to_string(),
        synced,
        source: source.into(),
    }
    .into()
}

/// Inputs checked before any network call.
struct Preflight<'a> {
    password: &'a SecretString,
    container_id: &'a str,
    query: String,
    pattern: FilenamePattern,
}

/// Runs jobs against one session.
pub struct PipelineController<'a, S: ?Sized> {
    session: &'a S,
    settings: &'a Settings,
}

impl<'a, S: Session + ?Sized> PipelineController<'a, S> {
    pub fn new(session: &'a S, settings: &'a Settings) -> Self {
        Self { session, settings }
    }

    /// Run `job` for the target date derived from `anchor`.
    pub async fn run(&self, job: &JobConfig, anchor: DateTime<Utc>) -> Result<RunOutcome> {
        let mut stage = RunStage::Start;
        let result = self.execute(job, anchor, &mut stage).await;

        match &result {
            Ok(outcome) => info!(job = %job.name, outcome = outcome.label(), "Run finished"),
            Err(e) => error!(
                job = %job.name,
                stage = stage.attempting(),
                last_stage = %stage,
                error = %e,
                "Run failed"
            ),
        }
        result
    }

    fn preflight<'j>(&'j self, job: &'j JobConfig, anchor: DateTime<Utc>) -> Result<Preflight<'j>> {
        let password = self.settings.require_password()?;
        let container_id = job.require_container()?;

        let anchor_date = local_date(anchor, self.settings.timezone);
        let criteria = job.criteria(anchor_date, self.settings.date_offset_days);
        let pattern = job.filename_pattern(&criteria.date_token())?;

        Ok(Preflight {
            password,
            container_id,
            query: criteria.render(),
            pattern,
        })
    }

    async fn execute(
        &self,
        job: &JobConfig,
        anchor: DateTime<Utc>,
        stage: &mut RunStage,
    ) -> Result<RunOutcome> {
        let plan = self.preflight(job, anchor)?;
        self.advance(stage, RunStage::QueryBuilt);
        info!(query = %plan.query, pattern = %plan.pattern, "Searching mail");

        let located = match locate(
            self.session,
            &plan.query,
            &plan.pattern,
            self.settings.search_page_size,
        )
        .await?
        {
            Ok(found) => found,
            Err(reason) => return Ok(reason.into()),
        };
        self.advance(stage, RunStage::MessageLocated);

        let payload = self
            .session
            .get_attachment(&located.message_id, &located.attachment_id)
            .await?;
        self.advance(stage, RunStage::AttachmentDownloaded);
        debug!(
            filename = %located.attachment.filename,
            encoded_len = payload.len(),
            "Attachment downloaded"
        );

        let members = archive::open(payload.as_bytes(), plan.password)?;
        self.advance(stage, RunStage::ArchiveOpened);
        info!(entries = members.entry_count(), "Archive opened");

        let mut synced = 0;
        self.advance(stage, RunStage::Syncing { synced });
        for member in members {
            let member = member.map_err(|e| member_read_failure(e, synced))?;
            let name = member.name;
            sync(self.session, plan.container_id, &name, member.content)
                .await
                .map_err(|source| {
                    Error::from(SyncError {
                        member: name.clone(),
                        synced,
                        source: source.into(),
                    })
                })?;
            synced += 1;
            self.advance(stage, RunStage::Syncing { synced });
        }

        self.advance(stage, RunStage::Done);
        info!(files_synced = synced, "Members synced");
        Ok(RunOutcome::Success {
            files_synced: synced,
        })
    }

    fn advance(&self, stage: &mut RunStage, next: RunStage) {
        debug!(from = %stage, to = %next, "Stage transition");
        *stage = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, SyncFailure};
    use crate::pipeline::archive::tests::encrypted_zip;
    use crate::pipeline::types::{AttachmentRef, CandidateMessage, NoMatchReason};
    use crate::session::MemorySession;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::io::{Cursor, Write};
    use zip::write::FileOptions;
    use zip::{AesMode, CompressionMethod, ZipWriter};

    const FOLDER: &str = "folder-ms";
    const PASSWORD: &str = "s3cret";

    fn settings(extra: &[(&str, &str)]) -> Settings {
        let mut vars: HashMap<&str, &str> = HashMap::from([
            ("ZIP_PASSWORD", PASSWORD),
            ("DRIVE_FOLDER_ID_MOVIMIENTOS_Y_SALDOS", FOLDER),
        ]);
        vars.extend(extra.iter().copied());
        Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap()
    }

    // 2024-06-10 15:00 UTC is June 10 in Santiago, so the target date is June 9.
    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 15, 0, 0).unwrap()
    }

    fn seed_zip(session: &MemorySession, filename: &str, members: &[(&str, &[u8])], pw: &str) {
        session.add_message(CandidateMessage {
            id: "m1".into(),
            attachments: vec![AttachmentRef {
                filename: filename.into(),
                attachment_id: Some("a1".into()),
                size_hint: None,
            }],
        });
        session.add_payload("m1", "a1", URL_SAFE.encode(encrypted_zip(members, pw)));
    }

    async fn run(session: &MemorySession, settings: &Settings) -> Result<RunOutcome> {
        let job = settings.job("movimientos-saldos").unwrap();
        PipelineController::new(session, settings)
            .run(job, anchor())
            .await
    }

    #[tokio::test]
    async fn members_replace_stale_copies() {
        let session = MemorySession::new();
        let settings = settings(&[]);
        session.seed_object(FOLDER, "A.txt", b"stale");
        seed_zip(
            &session,
            "L002202406090001.txt",
            &[("A.txt", &b"alpha"[..]), ("B.txt", &b"beta"[..])],
            PASSWORD,
        );

        let outcome = run(&session, &settings).await.unwrap();

        assert_eq!(outcome, RunOutcome::Success { files_synced: 2 });
        assert_eq!(
            session.objects_in(FOLDER),
            vec![
                ("A.txt".to_string(), b"alpha".to_vec()),
                ("B.txt".to_string(), b"beta".to_vec()),
            ]
        );
        let calls = session.calls();
        assert_eq!(
            calls.searches,
            vec![r#"subject:("DCV - Archivo") subject:("L00220240609") has:attachment"#.to_string()]
        );
        assert_eq!(calls.deletes, 1);
        assert_eq!(calls.creates, 2);
    }

    #[tokio::test]
    async fn no_search_results_is_no_message() {
        let session = MemorySession::new();
        let outcome = run(&session, &settings(&[])).await.unwrap();

        assert_eq!(outcome, RunOutcome::from(NoMatchReason::NoMessage));
        assert_eq!(session.calls().attachment_fetches, 0);
        assert_eq!(session.calls().lists, 0);
    }

    #[tokio::test]
    async fn wrong_attachment_name_is_no_attachment() {
        let session = MemorySession::new();
        seed_zip(&session, "report.txt", &[("A.txt", &b"alpha"[..])], PASSWORD);

        let outcome = run(&session, &settings(&[])).await.unwrap();

        assert_eq!(outcome, RunOutcome::from(NoMatchReason::NoAttachment));
        assert_eq!(session.calls().attachment_fetches, 0);
    }

    #[tokio::test]
    async fn wrong_password_is_archive_error_and_nothing_synced() {
        let session = MemorySession::new();
        seed_zip(
            &session,
            "L002202406090001.txt",
            &[("A.txt", &b"alpha"[..])],
            "other-password",
        );

        let err = run(&session, &settings(&[])).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Archive(ArchiveError::InvalidPassword { .. } | ArchiveError::Member { .. })
        ));
        assert_eq!(session.calls().creates, 0);
    }

    #[tokio::test]
    async fn failure_on_second_member_reports_partial_sync() {
        let session = MemorySession::new();
        session.fail_create_of("B.txt");
        seed_zip(
            &session,
            "L002202406090001.txt",
            &[("A.txt", &b"alpha"[..]), ("B.txt", &b"beta"[..]), ("C.txt", &b"gamma"[..])],
            PASSWORD,
        );

        let err = run(&session, &settings(&[])).await.unwrap_err();

        match err {
            Error::Sync(SyncError { member, synced, .. }) => {
                assert_eq!(member, "B.txt");
                assert_eq!(synced, 1);
            }
            other => panic!("expected sync error, got {other:?}"),
        }
        assert_eq!(
            session.objects_in(FOLDER),
            vec![("A.txt".to_string(), b"alpha".to_vec())]
        );
    }

    #[tokio::test]
    async fn missing_password_fails_before_any_call() {
        let session = MemorySession::new();
        let settings = Settings::from_lookup(|k| {
            (k == "DRIVE_FOLDER_ID_MOVIMIENTOS_Y_SALDOS").then(|| FOLDER.to_string())
        })
        .unwrap();

        let err = run(&session, &settings).await.unwrap_err();

        assert!(matches!(err, Error::Config(ConfigError::MissingEnvVar(_))));
        assert_eq!(session.calls(), Default::default());
    }

    #[tokio::test]
    async fn missing_container_fails_before_any_call() {
        let session = MemorySession::new();
        let settings = Settings::from_lookup(|k| (k == "ZIP_PASSWORD").then(|| "pw".to_string()))
            .unwrap();

        let err = run(&session, &settings).await.unwrap_err();

        assert!(matches!(err, Error::Config(ConfigError::MissingRequired { .. })));
        assert!(session.calls().searches.is_empty());
    }

    #[tokio::test]
    async fn offset_days_shift_the_searched_date() {
        let session = MemorySession::new();
        let settings = settings(&[("PIPELINE_DATE_OFFSET_DAYS", "3")]);

        run(&session, &settings).await.unwrap();

        assert!(session.calls().searches[0].contains("L00220240607"));
    }

    #[tokio::test]
    async fn unreadable_member_after_sync_reports_partial_sync() {
        let session = MemorySession::new();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let members = [
            ("A.txt", &b"alpha"[..], PASSWORD),
            ("B.txt", &b"beta"[..], "other"),
        ];
        for (name, content, pw) in members {
            let options: FileOptions<'_, ()> = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .with_aes_encryption(AesMode::Aes256, pw);
            writer.start_file(name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        let zip = writer.finish().unwrap().into_inner();
        session.add_message(CandidateMessage {
            id: "m1".into(),
            attachments: vec![AttachmentRef {
                filename: "L002202406090001.txt".into(),
                attachment_id: Some("a1".into()),
                size_hint: None,
            }],
        });
        session.add_payload("m1", "a1", URL_SAFE.encode(zip));

        let err = run(&session, &settings(&[])).await.unwrap_err();

        match err {
            Error::Sync(SyncError {
                member,
                synced,
                source: SyncFailure::Archive(_),
            }) => {
                assert_eq!(member, "B.txt");
                assert_eq!(synced, 1);
            }
            other => panic!("expected partial sync error, got {other:?}"),
        }
        assert_eq!(
            session.objects_in(FOLDER),
            vec![("A.txt".to_string(), b"alpha".to_vec())]
        );
    }

    #[test]
    fn first_member_read_failure_stays_an_archive_error() {
        let err = member_read_failure(
            ArchiveError::InvalidPassword {
                member: "A.txt".into(),
            },
            0,
        );
        assert!(matches!(err, Error::Archive(_)));
    }

    #[test]
    fn failures_name_the_step_being_attempted() {
        assert_eq!(RunStage::Start.attempting(), "validate");
        assert_eq!(RunStage::QueryBuilt.attempting(), "locate");
        assert_eq!(RunStage::MessageLocated.attempting(), "download");
        assert_eq!(RunStage::AttachmentDownloaded.attempting(), "decrypt");
        assert_eq!(RunStage::Syncing { synced: 1 }.attempting(), "sync");
    }

    #[test]
    fn stage_display_is_stable() {
        assert_eq!(RunStage::Syncing { synced: 2 }.to_string(), "syncing(2)");
        assert_eq!(RunStage::QueryBuilt.to_string(), "query_built");
    }
}
