//! Membership record model as it comes off the spreadsheet, plus the
//! tolerant field parsers every filter reads through.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One gym/club membership row. Field names mirror the sheet columns, so
/// ingest stays tolerant: anything missing deserializes to its default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MembershipRecord {
    pub unique_id: String,
    /// Stable business key. Unique within a loaded dataset; all derived
    /// views key by it.
    pub member_id: String,
    pub membership_id: String,

    pub first_name: String,
    pub last_name: String,
    pub email: String,

    pub membership_name: String,
    pub location: String,
    pub order_date: String,
    pub end_date: String,
    /// Decimal string as stored in the sheet ("12500.00").
    pub paid: String,
    /// Raw status cell. Only Active/Churned/Frozen are valid filter input;
    /// anything else fails closed under status filters.
    pub status: String,

    pub current_usage: String,
    pub sessions_left: Option<i64>,

    pub comments: String,
    pub notes: String,
    pub tags: Vec<String>,

    pub ai_tags: Vec<String>,
    pub ai_confidence: Option<u8>,
    pub ai_reasoning: String,
    pub ai_analysis_date: String,
}

impl MembershipRecord {
    /// Amount paid, parsed as a float. Unparsable or missing ⇒ 0.0.
    pub fn paid_amount(&self) -> f64 {
        self.paid.trim().parse::<f64>().unwrap_or(0.0)
    }

    /// Legacy sessions counter. Missing ⇒ 0.
    pub fn sessions(&self) -> i64 {
        self.sessions_left.unwrap_or(0)
    }

    pub fn end_date_parsed(&self) -> Option<NaiveDate> {
        parse_date(&self.end_date)
    }

    /// True if staff left anything on this record: non-blank comments or
    /// notes, or at least one tag.
    pub fn has_annotations(&self) -> bool {
        !self.comments.trim().is_empty()
            || !self.notes.trim().is_empty()
            || !self.tags.is_empty()
    }

    /// Newline-joined non-blank comments + notes — the input text for AI
    /// classification. Empty string means "nothing to analyze".
    pub fn annotation_text(&self) -> String {
        [self.comments.trim(), self.notes.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The three valid membership states. The sheet may contain anything; filters
/// parse through this and treat unknown strings as no-match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Active,
    Churned,
    Frozen,
}

impl Status {
    pub fn parse(s: &str) -> Option<Status> {
        match s.trim() {
            s if s.eq_ignore_ascii_case("active") => Some(Status::Active),
            s if s.eq_ignore_ascii_case("churned") => Some(Status::Churned),
            s if s.eq_ignore_ascii_case("frozen") => Some(Status::Frozen),
            _ => None,
        }
    }
}

/// A pending staff edit to one member's annotations. Queued per memberId,
/// last write wins within a flush cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationEdit {
    pub member_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associate_name: Option<String>,
    /// Unix ms. Stamped on enqueue when absent.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%d %b %Y"];

/// Tolerant date parser for sheet cells. Returns None for anything it cannot
/// read — callers decide whether that fails open or closed.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    // ISO datetime cells ("2025-01-05T00:00:00Z") — keep the date part.
    let head = s.split(['T', ' ']).next().unwrap_or(s);
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(head, fmt) {
            return Some(d);
        }
    }
    None
}
