//! Platform record types iterated over by the streaming layer.
//!
//! The streaming core treats these as opaque: cursors rely only on the stable
//! `id` and on the time fields exposed through [`SearchItem`]. The records
//! keep a deliberately small field set; a full platform client would extend
//! them without affecting the streaming contracts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::TimeField;

/// A record that can be scanned by a cursor.
///
/// Distinct records in one collection have distinct ids, and a time field
/// never changes once assigned.
pub trait SearchItem {
    /// Stable identifier, unique within the record's collection.
    fn id(&self) -> &str;

    /// The value of the given time field, if the record carries it.
    fn time(&self, field: TimeField) -> Option<DateTime<Utc>>;
}

/// A task assignment performed by a platform user.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Assignment id.
    pub id: String,
    /// The pool the assignment belongs to.
    pub pool_id: String,
    /// The performer the assignment was issued to.
    pub user_id: Option<String>,
    /// When the assignment was created.
    pub created: Option<DateTime<Utc>>,
    /// When the assignment was submitted.
    pub submitted: Option<DateTime<Utc>>,
    /// When the assignment was accepted.
    pub accepted: Option<DateTime<Utc>>,
    /// When the assignment was rejected.
    pub rejected: Option<DateTime<Utc>>,
    /// When the assignment was skipped.
    pub skipped: Option<DateTime<Utc>>,
    /// When the assignment expired.
    pub expired: Option<DateTime<Utc>>,
}

impl SearchItem for Assignment {
    fn id(&self) -> &str {
        &self.id
    }

    fn time(&self, field: TimeField) -> Option<DateTime<Utc>> {
        match field {
            TimeField::Created => self.created,
            TimeField::Submitted => self.submitted,
            TimeField::Accepted => self.accepted,
            TimeField::Rejected => self.rejected,
            TimeField::Skipped => self.skipped,
            TimeField::Expired => self.expired,
            TimeField::Modified => None,
        }
    }
}

/// A unit of work offered to performers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task id.
    pub id: String,
    /// The pool the task belongs to.
    pub pool_id: String,
    /// When the task was created.
    pub created: Option<DateTime<Utc>>,
}

impl SearchItem for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn time(&self, field: TimeField) -> Option<DateTime<Utc>> {
        match field {
            TimeField::Created => self.created,
            _ => None,
        }
    }
}

/// A bonus paid to a platform user.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserBonus {
    /// Bonus id.
    pub id: String,
    /// The user the bonus was paid to.
    pub user_id: Option<String>,
    /// The bonus amount.
    pub amount: Option<f64>,
    /// When the bonus was created.
    pub created: Option<DateTime<Utc>>,
}

impl SearchItem for UserBonus {
    fn id(&self) -> &str {
        &self.id
    }

    fn time(&self, field: TimeField) -> Option<DateTime<Utc>> {
        match field {
            TimeField::Created => self.created,
            _ => None,
        }
    }
}

/// A skill value assigned to a platform user.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSkill {
    /// User skill id.
    pub id: String,
    /// The user the skill belongs to.
    pub user_id: Option<String>,
    /// The skill being valued.
    pub skill_id: Option<String>,
    /// The current skill value.
    pub value: Option<f64>,
    /// When the skill was first set.
    pub created: Option<DateTime<Utc>>,
    /// When the skill value last changed.
    pub modified: Option<DateTime<Utc>>,
}

impl SearchItem for UserSkill {
    fn id(&self) -> &str {
        &self.id
    }

    fn time(&self, field: TimeField) -> Option<DateTime<Utc>> {
        match field {
            TimeField::Created => self.created,
            TimeField::Modified => self.modified,
            _ => None,
        }
    }
}

/// An access restriction placed on a platform user.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRestriction {
    /// Restriction id.
    pub id: String,
    /// The restricted user.
    pub user_id: Option<String>,
    /// What the restriction applies to, e.g. a pool or a project.
    pub scope: Option<String>,
    /// When the restriction was created.
    pub created: Option<DateTime<Utc>>,
}

impl SearchItem for UserRestriction {
    fn id(&self) -> &str {
        &self.id
    }

    fn time(&self, field: TimeField) -> Option<DateTime<Utc>> {
        match field {
            TimeField::Created => self.created,
            _ => None,
        }
    }
}

/// A message thread between a requester and performers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageThread {
    /// Thread id.
    pub id: String,
    /// The thread topic.
    pub topic: Option<String>,
    /// When the thread was created.
    pub created: Option<DateTime<Utc>>,
}

impl SearchItem for MessageThread {
    fn id(&self) -> &str {
        &self.id
    }

    fn time(&self, field: TimeField) -> Option<DateTime<Utc>> {
        match field {
            TimeField::Created => self.created,
            _ => None,
        }
    }
}

/// The lifecycle state of a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolStatus {
    /// The pool accepts new assignments.
    #[default]
    Open,
    /// The pool is closed to new assignments.
    Closed,
    /// The pool is archived.
    Archived,
    /// The pool is temporarily locked.
    Locked,
}

impl PoolStatus {
    /// Whether the pool can still produce new work.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// A pool of tasks offered to performers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    /// Pool id.
    pub id: String,
    /// Current lifecycle state.
    pub status: PoolStatus,
    /// Requester-facing name, not shown to performers.
    pub private_name: Option<String>,
}

/// The state of a long-running platform operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// The operation has been accepted but not started.
    #[default]
    Pending,
    /// The operation is in progress.
    Running,
    /// The operation finished successfully.
    Success,
    /// The operation failed.
    Fail,
}

impl OperationStatus {
    /// Whether the operation has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }
}

/// A long-running platform operation, polled until terminal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Operation id.
    pub id: String,
    /// Current state.
    pub status: OperationStatus,
    /// When the platform started executing the operation.
    pub started: Option<DateTime<Utc>>,
    /// Operation-specific payload, populated on completion.
    pub details: Option<serde_json::Value>,
}

/// A request for pool analytics, answered by a platform operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRequest {
    /// The analytics item to compute, e.g. `completion_percentage`.
    pub name: String,
    /// The id of the subject the item is computed for.
    pub subject_id: String,
}

impl AnalyticsRequest {
    /// Creates an analytics request.
    pub fn new(name: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject_id: subject_id.into(),
        }
    }
}
