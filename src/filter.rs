//! The record-filtering engine: a pure AND-pipeline of predicate groups over
//! membership records, plus the lapsing view built on its output.
//!
//! Every predicate group is inactive at its default value (empty set, empty
//! string, `all`, the full [0,100] sessions range) and inactive groups match
//! everything. Output preserves input order and never mutates records.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::member::{MembershipRecord, Status};

// Named-filter thresholds. Shared with the boolean flag predicates so
// `highValue` and the "high-value" custom filter can never drift apart.
pub const PREMIUM_PAID: f64 = 10_000.0;
pub const HIGH_VALUE_PAID: f64 = 5_000.0;
pub const LOW_SESSIONS_MAX: i64 = 3;
pub const EXPIRING_WEEK_DAYS: i64 = 7;
pub const EXPIRING_MONTH_DAYS: i64 = 30;

/// Active filter state. Replaced wholesale or patched field-by-field by the
/// UI; the engine only ever reads it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterCriteria {
    /// Case-insensitive substring, matched against name, email, memberId,
    /// membership name and location. Empty ⇒ match all.
    pub search: String,
    /// Empty set ⇒ match all (deliberate convention, not "match none").
    pub status: HashSet<Status>,
    pub location: HashSet<String>,
    pub membership_type: HashSet<String>,
    pub date_range: DateRange,
    pub sessions_range: SessionsRange,
    pub expiry_range: ExpiryRange,
    pub has_annotations: bool,
    pub high_value: bool,
    pub low_sessions: bool,
    /// Named predicates from [`CUSTOM_FILTERS`], ANDed with everything else.
    pub custom_filters: Vec<String>,
}

/// Inclusive bounds on `endDate`; either end optional.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    fn is_default(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Inclusive bounds on `sessionsLeft`. The default [0,100] is the inactive
/// state — it exists so the UI slider always has concrete endpoints.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SessionsRange {
    pub min: i64,
    pub max: i64,
}

impl Default for SessionsRange {
    fn default() -> Self {
        Self { min: 0, max: 100 }
    }
}

impl SessionsRange {
    fn is_default(&self) -> bool {
        self.min == 0 && self.max == 100
    }
}

/// Expiry window relative to "today", derived from `endDate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpiryRange {
    #[default]
    All,
    Expired,
    ExpiringWeek,
    ExpiringMonth,
    Future,
}

/// Days from `today` to the record's end date. None when the cell is
/// unparsable; expiry-bounded filters fail closed on None.
pub fn days_until_expiry(record: &MembershipRecord, today: NaiveDate) -> Option<i64> {
    record.end_date_parsed().map(|d| (d - today).num_days())
}

type Predicate = fn(&MembershipRecord, NaiveDate) -> bool;

/// Strategy table for named custom filters. Unknown names are ignored (with
/// a warn) rather than matching nothing.
pub const CUSTOM_FILTERS: &[(&str, Predicate)] = &[
    ("premium", |r, _| r.paid_amount() > PREMIUM_PAID),
    ("high-value", |r, _| r.paid_amount() > HIGH_VALUE_PAID),
    ("low-sessions", |r, _| r.sessions() <= LOW_SESSIONS_MAX),
    ("expiring-week", |r, today| {
        matches!(days_until_expiry(r, today), Some(d) if (0..=EXPIRING_WEEK_DAYS).contains(&d))
    }),
    ("expiring-month", |r, today| {
        matches!(days_until_expiry(r, today), Some(d) if (0..=EXPIRING_MONTH_DAYS).contains(&d))
    }),
];

fn custom_predicate(name: &str) -> Option<Predicate> {
    CUSTOM_FILTERS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, p)| *p)
}

/// Apply every active predicate group to `records`. Pure and stable: same
/// input + criteria ⇒ same output, in input order, records untouched.
pub fn apply(
    records: &[MembershipRecord],
    criteria: &FilterCriteria,
    today: NaiveDate,
) -> Vec<MembershipRecord> {
    records
        .iter()
        .filter(|r| matches(r, criteria, today))
        .cloned()
        .collect()
}

/// Single-record check. Cheap groups (set membership, flags) run before
/// anything that parses a date.
pub fn matches(record: &MembershipRecord, criteria: &FilterCriteria, today: NaiveDate) -> bool {
    // Status: record's raw cell must parse to a member of the set. Unknown
    // strings fail closed while the filter is active.
    if !criteria.status.is_empty() {
        match Status::parse(&record.status) {
            Some(s) if criteria.status.contains(&s) => {}
            _ => return false,
        }
    }

    if !criteria.location.is_empty() && !criteria.location.contains(&record.location) {
        return false;
    }

    if !criteria.membership_type.is_empty()
        && !criteria.membership_type.contains(&record.membership_name)
    {
        return false;
    }

    if criteria.has_annotations && !record.has_annotations() {
        return false;
    }

    if criteria.high_value && record.paid_amount() <= HIGH_VALUE_PAID {
        return false;
    }

    if criteria.low_sessions && record.sessions() > LOW_SESSIONS_MAX {
        return false;
    }

    if !criteria.sessions_range.is_default() {
        let s = record.sessions();
        if s < criteria.sessions_range.min || s > criteria.sessions_range.max {
            return false;
        }
    }

    if !criteria.search.is_empty() && !matches_search(record, &criteria.search) {
        return false;
    }

    if !criteria.date_range.is_default() {
        // Fails closed: a record whose endDate can't be parsed is excluded
        // whenever either bound is set.
        let Some(end) = record.end_date_parsed() else {
            return false;
        };
        if let Some(start) = criteria.date_range.start {
            if end < start {
                return false;
            }
        }
        if let Some(stop) = criteria.date_range.end {
            if end > stop {
                return false;
            }
        }
    }

    if criteria.expiry_range != ExpiryRange::All {
        let Some(d) = days_until_expiry(record, today) else {
            return false;
        };
        let ok = match criteria.expiry_range {
            ExpiryRange::All => true,
            ExpiryRange::Expired => d < 0,
            ExpiryRange::ExpiringWeek => (0..=EXPIRING_WEEK_DAYS).contains(&d),
            ExpiryRange::ExpiringMonth => (0..=EXPIRING_MONTH_DAYS).contains(&d),
            ExpiryRange::Future => d > EXPIRING_MONTH_DAYS,
        };
        if !ok {
            return false;
        }
    }

    for name in &criteria.custom_filters {
        match custom_predicate(name) {
            Some(pred) => {
                if !pred(record, today) {
                    return false;
                }
            }
            None => warn!(filter = %name, "unknown custom filter, ignoring"),
        }
    }

    true
}

fn matches_search(record: &MembershipRecord, term: &str) -> bool {
    let term = term.to_lowercase();
    [
        &record.first_name,
        &record.last_name,
        &record.email,
        &record.member_id,
        &record.membership_name,
        &record.location,
    ]
    .iter()
    .any(|f| f.to_lowercase().contains(&term))
}

/// Follow-up urgency for a member whose plan lapses within 30 days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    fn for_days(d: i64) -> Priority {
        match d {
            _ if d <= 3 => Priority::Critical,
            _ if d <= 7 => Priority::High,
            _ if d <= 14 => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

/// One row of the lapsing view: the record plus its derived urgency.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LapsingMember {
    #[serde(flatten)]
    pub record: MembershipRecord,
    pub days_until_expiry: i64,
    pub priority: Priority,
    pub follow_up_required: bool,
}

/// Derived view over the loaded set: Active records lapsing within the next
/// 30 days (exclusive of today), most urgent first. Recomputed from scratch
/// whenever the input changes — no state of its own.
pub fn lapsing_members(records: &[MembershipRecord], today: NaiveDate) -> Vec<LapsingMember> {
    let mut out: Vec<LapsingMember> = records
        .iter()
        .filter(|r| Status::parse(&r.status) == Some(Status::Active))
        .filter_map(|r| {
            let d = days_until_expiry(r, today)?;
            if d > 0 && d <= EXPIRING_MONTH_DAYS {
                Some(LapsingMember {
                    record: r.clone(),
                    days_until_expiry: d,
                    priority: Priority::for_days(d),
                    follow_up_required: d <= EXPIRING_WEEK_DAYS,
                })
            } else {
                None
            }
        })
        .collect();
    out.sort_by_key(|m| m.days_until_expiry);
    out
}

/// Per-status counts for the summary header.
#[derive(Debug, Default, Serialize)]
pub struct StatusCounts {
    pub active: usize,
    pub churned: usize,
    pub frozen: usize,
    pub other: usize,
}

pub fn status_counts(records: &[MembershipRecord]) -> StatusCounts {
    let mut c = StatusCounts::default();
    for r in records {
        match Status::parse(&r.status) {
            Some(Status::Active) => c.active += 1,
            Some(Status::Churned) => c.churned += 1,
            Some(Status::Frozen) => c.frozen += 1,
            None => c.other += 1,
        }
    }
    c
}
