//! Search query construction.
//!
//! Everything here is pure: the anchor date is always passed in, never read
//! from the clock, so a given set of inputs renders the same query on any
//! host and in any local time zone.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;

/// Placeholder replaced by the formatted target date inside subject templates.
pub const DATE_PLACEHOLDER: &str = "{date}";

/// Calendar date of `instant` in the named zone.
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// `anchor - offset_days`, in whole calendar days.
pub fn target_date(anchor: NaiveDate, offset_days: u32) -> NaiveDate {
    anchor - Days::new(u64::from(offset_days))
}

/// Whether `format` is a usable strftime pattern.
pub fn is_valid_date_format(format: &str) -> bool {
    !format.is_empty() && !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Inputs for one mail search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Subject templates; each may contain [`DATE_PLACEHOLDER`].
    pub subject_fragments: Vec<String>,
    pub body_fragment: Option<String>,
    pub require_attachment: bool,
    pub date_anchor: NaiveDate,
    pub date_offset_days: u32,
    /// strftime pattern for the date token (`%Y%m%d`, `%y%m%d`, ...).
    pub date_format: String,
}

impl SearchCriteria {
    pub fn target_date(&self) -> NaiveDate {
        target_date(self.date_anchor, self.date_offset_days)
    }

    /// The target date rendered with `date_format`.
    pub fn date_token(&self) -> String {
        self.target_date().format(&self.date_format).to_string()
    }

    /// Subject fragments with the date placeholder substituted.
    pub fn subject_terms(&self) -> Vec<String> {
        let token = self.date_token();
        self.subject_fragments
            .iter()
            .map(|fragment| fragment.replace(DATE_PLACEHOLDER, &token))
            .collect()
    }

    /// Render as a Gmail search expression.
    pub fn render(&self) -> String {
        let subjects = self.subject_terms();
        render_terms(
            &subjects,
            self.body_fragment.as_deref(),
            self.require_attachment,
        )
    }
}

/// Build the search query for `anchor - offset_days`.
///
/// Subject parts may be literal or contain [`DATE_PLACEHOLDER`]; the result
/// always requires an attachment.
pub fn build_query(
    anchor: NaiveDate,
    offset_days: u32,
    date_format: &str,
    subject_parts: &[String],
    body_fragment: Option<&str>,
) -> String {
    SearchCriteria {
        subject_fragments: subject_parts.to_vec(),
        body_fragment: body_fragment.map(str::to_string),
        require_attachment: true,
        date_anchor: anchor,
        date_offset_days: offset_days,
        date_format: date_format.to_string(),
    }
    .render()
}

fn render_terms(subjects: &[String], body: Option<&str>, has_attachment: bool) -> String {
    let mut terms: Vec<String> = subjects
        .iter()
        .map(|s| format!("subject:(\"{}\")", phrase(s)))
        .collect();

    if let Some(body) = body.filter(|b| !b.trim().is_empty()) {
        terms.push(format!("\"{}\"", phrase(body)));
    }

    if has_attachment {
        terms.push("has:attachment".to_string());
    }

    terms.join(" ")
}

// Gmail has no escape for `"` inside a quoted phrase.
fn phrase(text: &str) -> String {
    text.replace('"', "").trim().to_string()
}
