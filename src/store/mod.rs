pub mod memory;

use crate::errors::{AppError, AppResult};
use crate::models::{BookView, Note, NoteId, SavedSearch};
use std::sync::Arc;
use tokio::sync::watch;

pub use memory::MemoryStore;

type QueryFn<T> = Arc<dyn Fn() -> AppResult<Vec<T>> + Send + Sync>;

/// A query re-evaluated every time the store reports a change.
pub struct LiveQuery<T> {
    changes: watch::Receiver<u64>,
    query: QueryFn<T>,
    primed: bool,
}

impl<T: Send + 'static> LiveQuery<T> {
    pub fn new<F>(changes: watch::Receiver<u64>, query: F) -> Self
    where
        F: Fn() -> AppResult<Vec<T>> + Send + Sync + 'static,
    {
        Self {
            changes,
            query: Arc::new(query),
            primed: false,
        }
    }

    /// A query that yields one snapshot and never changes.
    pub fn once<F>(query: F) -> Self
    where
        F: Fn() -> AppResult<Vec<T>> + Send + Sync + 'static,
    {
        let (_, changes) = watch::channel(0);
        Self::new(changes, query)
    }

    /// First call evaluates right away; later calls wait for the next store
    /// change. Returns `None` once the store stops reporting changes.
    pub async fn next(&mut self) -> Option<AppResult<Vec<T>>> {
        if self.primed {
            self.changes.changed().await.ok()?;
        } else {
            self.primed = true;
        }
        drop(self.changes.borrow_and_update());

        let query = self.query.clone();
        let result = match tokio::task::spawn_blocking(move || query()).await {
            Ok(result) => result,
            Err(error) => Err(AppError::Internal(format!("live query worker failed: {error}"))),
        };
        Some(result)
    }
}

/// Revision counter handed out to live queries.
#[derive(Debug)]
pub struct ChangeTracker {
    revision: watch::Sender<u64>,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self {
            revision: watch::Sender::new(0),
        }
    }
}

impl ChangeTracker {
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn bump(&self) -> u64 {
        let mut next = 0;
        self.revision.send_modify(|revision| {
            *revision += 1;
            next = *revision;
        });
        next
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}

pub trait DataStore: Send + Sync + 'static {
    fn observe_books(&self, sort_order: &str) -> LiveQuery<BookView>;
    fn observe_saved_searches(&self) -> LiveQuery<SavedSearch>;
    fn get_note(&self, id: NoteId) -> AppResult<Option<Note>>;
}
