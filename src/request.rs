//! Search requests and result pages exchanged with the platform.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel lower bound denoting "from the beginning of time".
///
/// Every cursor ensures its request carries this value as the inclusive lower
/// bound of its time field when the caller did not supply one, so the time
/// frontier is well-defined on first use. It compares less than any
/// legitimate item time.
pub const DATETIME_MIN: DateTime<Utc> = DateTime::UNIX_EPOCH;

/// A time attribute of a platform record, addressable by name in search
/// predicates and sort keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeField {
    /// When the record was created.
    Created,
    /// When an assignment was submitted by a performer.
    Submitted,
    /// When an assignment was accepted.
    Accepted,
    /// When an assignment was rejected.
    Rejected,
    /// When an assignment was skipped.
    Skipped,
    /// When an assignment expired.
    Expired,
    /// When a record was last modified.
    Modified,
}

impl TimeField {
    /// The wire name of the field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
            Self::Expired => "expired",
            Self::Modified => "modified",
        }
    }
}

impl fmt::Display for TimeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The key a search operation sorts its results by, ascending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortKey {
    /// Sort by a time field, ties broken by id.
    Time(TimeField),
    /// Sort by id.
    Id,
}

impl SortKey {
    /// The wire name of the sort key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Time(field) => field.as_str(),
            Self::Id => "id",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable search request.
///
/// Requests never mutate in place: the `with_*` methods return a copy with a
/// single predicate replaced, so a cursor can retain the request it last
/// issued while deriving the next one. When a request carries several
/// predicates at once the platform applies all of them simultaneously.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Restrict results to records belonging to this pool.
    pub pool_id: Option<String>,
    /// Restrict results to records belonging to this project.
    pub project_id: Option<String>,
    #[serde(default)]
    pub(crate) gte: BTreeMap<TimeField, DateTime<Utc>>,
    #[serde(default)]
    pub(crate) gt: BTreeMap<TimeField, DateTime<Utc>>,
    #[serde(default)]
    pub(crate) lte: BTreeMap<TimeField, DateTime<Utc>>,
    #[serde(default)]
    pub(crate) id_gt: Option<String>,
}

impl SearchRequest {
    /// An unconstrained request.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request scoped to one pool.
    pub fn for_pool(pool_id: impl Into<String>) -> Self {
        Self {
            pool_id: Some(pool_id.into()),
            ..Self::default()
        }
    }

    /// A request scoped to one project.
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    /// The inclusive lower bound on `field`, if set.
    pub fn gte(&self, field: TimeField) -> Option<DateTime<Utc>> {
        self.gte.get(&field).copied()
    }

    /// The exclusive lower bound on `field`, if set.
    pub fn gt(&self, field: TimeField) -> Option<DateTime<Utc>> {
        self.gt.get(&field).copied()
    }

    /// The inclusive upper bound on `field`, if set.
    pub fn lte(&self, field: TimeField) -> Option<DateTime<Utc>> {
        self.lte.get(&field).copied()
    }

    /// The exclusive lower bound on id, if set.
    pub fn id_gt(&self) -> Option<&str> {
        self.id_gt.as_deref()
    }

    /// A copy of this request with `field >= bound`.
    pub fn with_gte(&self, field: TimeField, bound: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.gte.insert(field, bound);
        next
    }

    /// A copy of this request with `field > bound`.
    pub fn with_gt(&self, field: TimeField, bound: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.gt.insert(field, bound);
        next
    }

    /// A copy of this request with `field <= bound`.
    pub fn with_lte(&self, field: TimeField, bound: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.lte.insert(field, bound);
        next
    }

    /// A copy of this request with `id > bound`.
    pub fn with_id_gt(&self, bound: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.id_gt = Some(bound.into());
        next
    }

    /// Ensures the inclusive lower bound on `field` is set, defaulting to
    /// [`DATETIME_MIN`].
    pub(crate) fn normalized(&self, field: TimeField) -> Self {
        if self.gte.contains_key(&field) {
            self.clone()
        } else {
            self.with_gte(field, DATETIME_MIN)
        }
    }
}

/// One page of search results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchPage<T> {
    /// The matching records, sorted ascending by the requested key.
    pub items: Vec<T>,
    /// Whether more matching records exist past this page.
    pub has_more: bool,
}
