//! Message locator: finds the one attachment a run should process.
//!
//! Provider ranking is trusted as-is. Candidates are scanned in search order
//! and, within a message, parts in listed order; the first part whose name
//! matches the pattern and that can actually be downloaded wins.

use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::pipeline::types::{CandidateMessage, LocatedAttachment, NoMatchReason};
use crate::session::MailService;

/// Exact-match filename pattern, anchored at both ends.
#[derive(Debug, Clone)]
pub struct FilenamePattern {
    regex: Regex,
}

impl FilenamePattern {
    /// `^<prefix><date_token><suffix>$`.
    ///
    /// `prefix` and `date_token` are matched literally; `suffix` is a regex
    /// fragment (e.g. `\d{4}\.txt`).
    pub fn new(
        prefix: &str,
        date_token: &str,
        suffix: &str,
        case_insensitive: bool,
    ) -> Result<Self, regex::Error> {
        let source = format!(
            "{}{}(?:{})",
            regex::escape(prefix),
            regex::escape(date_token),
            suffix
        );
        Self::from_regex(&source, case_insensitive)
    }

    /// Anchor a full pattern at both ends. Top-level alternations are grouped
    /// first, so every branch must match the whole name.
    pub fn from_regex(pattern: &str, case_insensitive: bool) -> Result<Self, regex::Error> {
        let source = format!("^(?:{pattern})$");
        let regex = RegexBuilder::new(&source)
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Self { regex })
    }

    pub fn is_match(&self, filename: &str) -> bool {
        self.regex.is_match(filename)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl std::fmt::Display for FilenamePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First matching, downloadable part of `message`, if any.
pub fn select_attachment(
    message: &CandidateMessage,
    pattern: &FilenamePattern,
) -> Option<LocatedAttachment> {
    message
        .attachments
        .iter()
        .filter(|part| pattern.is_match(&part.filename))
        .find_map(|part| match part.resolvable_id() {
            Some(id) => Some(LocatedAttachment {
                message_id: message.id.clone(),
                attachment_id: id.to_string(),
                attachment: part.clone(),
            }),
            None => {
                debug!(
                    message_id = %message.id,
                    filename = %part.filename,
                    "Matching part has no attachment id, skipping"
                );
                None
            }
        })
}

/// Search, then scan candidates until the first matching attachment.
///
/// Session errors propagate untouched.
pub async fn locate<M: MailService + ?Sized>(
    mail: &M,
    query: &str,
    pattern: &FilenamePattern,
    page_size: u32,
) -> Result<Result<LocatedAttachment, NoMatchReason>, TransportError> {
    let candidates = mail.search_messages(query, page_size.max(1)).await?;

    if candidates.is_empty() {
        info!(query, "No message matches the search");
        return Ok(Err(NoMatchReason::NoMessage));
    }

    debug!(count = candidates.len(), "Scanning candidate messages");

    for summary in &candidates {
        let message = mail.get_message(&summary.id).await?;
        if let Some(found) = select_attachment(&message, pattern) {
            info!(
                message_id = %found.message_id,
                filename = %found.attachment.filename,
                "Attachment located"
            );
            return Ok(Ok(found));
        }
        debug!(message_id = %message.id, pattern = %pattern, "No matching attachment in message");
    }

    info!(
        pattern = %pattern,
        candidates = candidates.len(),
        "Messages found but none carries a matching attachment"
    );
    Ok(Err(NoMatchReason::NoAttachment))
}
