#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
pub mod cursor;
pub mod error;
pub mod event;
pub mod metrics;
pub mod model;
pub mod observer;
pub mod pipeline;
pub mod request;
pub(crate) mod runtime;
pub mod storage;
pub mod sync;
#[cfg(test)]
pub(crate) mod test_util;

pub use crate::client::{AsyncBridge, RemoteClient, SyncClient};
pub use crate::cursor::{
    AssignmentCursor, Cursor, MessageThreadCursor, TaskCursor, UserBonusCursor,
    UserRestrictionCursor, UserSkillCursor,
};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::observer::{AssignmentsObserver, Observer, PoolStatusObserver};
pub use crate::pipeline::{Pipeline, PipelineOptions};
pub use crate::request::{SearchRequest, DATETIME_MIN};
pub use crate::storage::{MemoryStorage, Storage};
