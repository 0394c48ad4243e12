//! Blocking wrappers around the asynchronous cursors.
//!
//! This is the [`AsyncBridge`](crate::client::AsyncBridge) run in reverse: a
//! [`sync::Cursor`](Cursor) drives the wrapped asynchronous cursor on a
//! process-global runtime so blocking callers can iterate it like any other
//! [`Iterator`]. Must not be used from within an async context.

use std::fmt;

use crate::cursor::{Cursor as AsyncCursor, FetchProvider};
use crate::error::Result;
use crate::runtime;

/// A blocking cursor over one remote collection.
///
/// `next` returning `None` ends the current iteration pass; like the
/// asynchronous cursor it wraps, iterating again later yields the items that
/// appeared since.
pub struct Cursor<P: FetchProvider> {
    async_cursor: AsyncCursor<P>,
}

impl<P: FetchProvider> Cursor<P> {
    /// Wraps an asynchronous cursor for blocking callers.
    pub fn new(async_cursor: AsyncCursor<P>) -> Self {
        Self { async_cursor }
    }

    /// Returns the wrapped asynchronous cursor.
    pub fn into_async(self) -> AsyncCursor<P> {
        self.async_cursor
    }

    /// Blocking counterpart of
    /// [`Cursor::process_all`](crate::cursor::Cursor::process_all): fetches
    /// one full pass and commits the advanced state only if the handler
    /// succeeds.
    pub fn process_all<F>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(Vec<P::Event>) -> Result<()>,
    {
        runtime::block_on(
            self.async_cursor
                .process_all(|events| std::future::ready(handler(events))),
        )
    }
}

impl<P: FetchProvider> fmt::Debug for Cursor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("async_cursor", &self.async_cursor)
            .finish()
    }
}

impl<P: FetchProvider> Iterator for Cursor<P> {
    type Item = Result<P::Event>;

    fn next(&mut self) -> Option<Self::Item> {
        runtime::block_on(self.async_cursor.next())
    }
}
