//! Typed events produced by cursors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{Assignment, MessageThread, Task, UserBonus, UserRestriction, UserSkill};
use crate::request::TimeField;

/// The lifecycle moment an assignment event refers to.
///
/// Each variant selects the time field the corresponding cursor orders and
/// filters by. Parsing from a string is case-insensitive; unknown values fail
/// with [`ErrorKind::InvalidArgument`](crate::error::ErrorKind::InvalidArgument).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentEventType {
    /// The assignment was issued to a performer.
    Created,
    /// The assignment was submitted.
    Submitted,
    /// The assignment was accepted.
    Accepted,
    /// The assignment was rejected.
    Rejected,
    /// The assignment was skipped.
    Skipped,
    /// The assignment expired.
    Expired,
}

impl AssignmentEventType {
    /// The time field recording when this event happened.
    pub fn time_field(self) -> TimeField {
        match self {
            Self::Created => TimeField::Created,
            Self::Submitted => TimeField::Submitted,
            Self::Accepted => TimeField::Accepted,
            Self::Rejected => TimeField::Rejected,
            Self::Skipped => TimeField::Skipped,
            Self::Expired => TimeField::Expired,
        }
    }

    /// The wire name of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Submitted => "SUBMITTED",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Skipped => "SKIPPED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for AssignmentEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentEventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "SUBMITTED" => Ok(Self::Submitted),
            "ACCEPTED" => Ok(Self::Accepted),
            "REJECTED" => Ok(Self::Rejected),
            "SKIPPED" => Ok(Self::Skipped),
            "EXPIRED" => Ok(Self::Expired),
            _ => Err(Error::invalid_argument(format!(
                "unknown assignment event type: {s:?}"
            ))),
        }
    }
}

/// The change a user skill event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserSkillEventType {
    /// The skill was set for the first time.
    Created,
    /// The skill value changed.
    Modified,
}

impl UserSkillEventType {
    /// The time field recording when this event happened.
    pub fn time_field(self) -> TimeField {
        match self {
            Self::Created => TimeField::Created,
            Self::Modified => TimeField::Modified,
        }
    }

    /// The wire name of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Modified => "MODIFIED",
        }
    }
}

impl fmt::Display for UserSkillEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserSkillEventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "MODIFIED" => Ok(Self::Modified),
            _ => Err(Error::invalid_argument(format!(
                "unknown user skill event type: {s:?}"
            ))),
        }
    }
}

/// An assignment reaching a lifecycle moment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssignmentEvent {
    /// The assignment the event refers to.
    pub assignment: Assignment,
    /// Which lifecycle moment was reached.
    pub event_type: AssignmentEventType,
    /// When it was reached.
    pub event_time: DateTime<Utc>,
}

/// A task appearing in a pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// The new task.
    pub task: Task,
    /// When the task was created.
    pub event_time: DateTime<Utc>,
}

/// A bonus being paid to a user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserBonusEvent {
    /// The new bonus.
    pub user_bonus: UserBonus,
    /// When the bonus was created.
    pub event_time: DateTime<Utc>,
}

/// A user skill being set or changed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserSkillEvent {
    /// The skill after the change.
    pub user_skill: UserSkill,
    /// Which change happened.
    pub event_type: UserSkillEventType,
    /// When it happened.
    pub event_time: DateTime<Utc>,
}

/// A restriction being placed on a user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRestrictionEvent {
    /// The new restriction.
    pub user_restriction: UserRestriction,
    /// When the restriction was created.
    pub event_time: DateTime<Utc>,
}

/// A message thread appearing in the requester's inbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageThreadEvent {
    /// The new thread.
    pub message_thread: MessageThread,
    /// When the thread was created.
    pub event_time: DateTime<Utc>,
}
