//! Shared types for the ingestion pipeline.

use serde::{Deserialize, Serialize};

// ── Mail side ───────────────────────────────────────────────────────

/// One search hit. Full detail is fetched separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
}

/// A message returned by the search, with its attachment parts in listed order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateMessage {
    pub id: String,
    pub attachments: Vec<AttachmentRef>,
}

/// A single attachment part of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub filename: String,
    /// Provider handle used to download the body. `None` or empty means the
    /// part cannot be fetched.
    pub attachment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_hint: Option<u64>,
}

impl AttachmentRef {
    /// The attachment id, if it is usable for a download.
    pub fn resolvable_id(&self) -> Option<&str> {
        self.attachment_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// The attachment selected by the locator together with its owning message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedAttachment {
    pub message_id: String,
    /// Resolved, non-empty download handle.
    pub attachment_id: String,
    pub attachment: AttachmentRef,
}

// ── Storage side ────────────────────────────────────────────────────

/// An object in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    pub parent_container_id: String,
}

// ── Archive ─────────────────────────────────────────────────────────

/// One decrypted archive member.
#[derive(Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    pub name: String,
    pub content: Vec<u8>,
}

impl std::fmt::Debug for ArchiveMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveMember")
            .field("name", &self.name)
            .field("len", &self.content.len())
            .finish()
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Why a run found nothing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchReason {
    /// The search returned no messages.
    NoMessage,
    /// Messages were found but none carried a matching, downloadable attachment.
    NoAttachment,
}

/// Non-failure result of a pipeline run.
///
/// Operational failures are the `Err` side of [`crate::error::Result`], so
/// callers can tell an expected "nothing arrived today" from an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Success { files_synced: usize },
    NoMatch { reason: NoMatchReason },
}

impl RunOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::NoMatch {
                reason: NoMatchReason::NoMessage,
            } => "no_message",
            Self::NoMatch {
                reason: NoMatchReason::NoAttachment,
            } => "no_attachment",
        }
    }
}

impl From<NoMatchReason> for RunOutcome {
    fn from(reason: NoMatchReason) -> Self {
        Self::NoMatch { reason }
    }
}
