use crate::commands::{Command, CommandOutput, CommandRunner};
use crate::errors::{AppError, AppResult};
use crate::events::OneShotEvent;
use crate::models::{
    Book, BookId, BookView, ClockEntry, ClockingAction, LinkTarget, NavigationAction, Note, NoteId,
    NoteLocation, PropertyMatch, SavedSearch,
};
use crate::store::{ChangeTracker, DataStore, LiveQuery};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const SORT_BY_NAME: &str = "name";
pub const SORT_BY_MODIFICATION_TIME: &str = "modification-time";

#[derive(Debug, Clone)]
struct BookRecord {
    book: Book,
    modified_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    books: BTreeMap<BookId, BookRecord>,
    notes: Vec<Note>,
    saved_searches: Vec<SavedSearch>,
    clocks: Vec<ClockEntry>,
    next_book_id: i64,
    next_note_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedSearchFile {
    saved_searches: Vec<SavedSearch>,
}

/// In-process store that answers every query and command the coordinator issues.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    changes: Arc<ChangeTracker>,
    link_root: PathBuf,
    focus: Arc<OneShotEvent<NavigationAction>>,
}

impl MemoryStore {
    /// Relative link paths are resolved against `link_root`.
    pub fn new(link_root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            changes: Arc::new(ChangeTracker::default()),
            link_root: link_root.into(),
            focus: Arc::new(OneShotEvent::new()),
        }
    }

    /// Focus requests produced by the sparse-tree and scroll commands.
    pub fn focus_requests(&self) -> Arc<OneShotEvent<NavigationAction>> {
        self.focus.clone()
    }

    pub fn add_book(&self, name: &str) -> AppResult<Book> {
        let book = {
            let mut inner = self.write()?;
            inner.next_book_id += 1;
            let book = Book {
                id: BookId(inner.next_book_id),
                name: name.to_string(),
                properties: BTreeMap::new(),
            };
            inner.books.insert(
                book.id,
                BookRecord {
                    book: book.clone(),
                    modified_at: Utc::now(),
                },
            );
            book
        };
        self.changes.bump();
        Ok(book)
    }

    pub fn set_book_property(&self, book_id: BookId, name: &str, value: &str) -> AppResult<()> {
        {
            let mut inner = self.write()?;
            let record = inner
                .books
                .get_mut(&book_id)
                .ok_or_else(|| AppError::NotFound(format!("book {book_id}")))?;
            record.book.properties.insert(name.to_string(), value.to_string());
            record.modified_at = Utc::now();
        }
        self.changes.bump();
        Ok(())
    }

    pub fn add_note(
        &self,
        book_id: BookId,
        title: &str,
        properties: &[(&str, &str)],
    ) -> AppResult<Note> {
        let note = {
            let mut inner = self.write()?;
            if !inner.books.contains_key(&book_id) {
                return Err(AppError::NotFound(format!("book {book_id}")));
            }
            inner.next_note_id += 1;
            let note = Note {
                id: NoteId(inner.next_note_id),
                book_id,
                title: title.to_string(),
                properties: properties
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
            };
            inner.notes.push(note.clone());
            touch(&mut inner, book_id);
            note
        };
        self.changes.bump();
        Ok(note)
    }

    pub fn add_saved_search(&self, name: &str, query: &str) -> AppResult<SavedSearch> {
        let search = {
            let mut inner = self.write()?;
            let search = SavedSearch {
                name: name.to_string(),
                query: query.to_string(),
                position: inner.saved_searches.len() as i32 + 1,
            };
            inner.saved_searches.push(search.clone());
            search
        };
        self.changes.bump();
        Ok(search)
    }

    pub fn saved_searches(&self) -> AppResult<Vec<SavedSearch>> {
        Ok(self.read()?.saved_searches.clone())
    }

    pub fn clock_entries(&self, note_id: NoteId) -> AppResult<Vec<ClockEntry>> {
        Ok(self
            .read()?
            .clocks
            .iter()
            .filter(|entry| entry.note_id == note_id)
            .cloned()
            .collect())
    }

    fn find_link_target(&self, path: &str) -> AppResult<LinkTarget> {
        let path = path.trim();
        let path = Path::new(path.strip_prefix("file:").unwrap_or(path));

        if path.extension().and_then(|ext| ext.to_str()) == Some("org") {
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                let inner = self.read()?;
                if let Some(record) = inner.books.values().find(|record| record.book.name == stem) {
                    return Ok(LinkTarget::Book(record.book.clone()));
                }
            }
        }

        if path.is_absolute() {
            Ok(LinkTarget::File(path.to_path_buf()))
        } else {
            Ok(LinkTarget::File(self.link_root.join(path)))
        }
    }

    fn find_with_property(&self, name: &str, value: &str) -> AppResult<Vec<PropertyMatch>> {
        let has_property = |properties: &BTreeMap<String, String>| {
            properties
                .iter()
                .any(|(key, candidate)| key.eq_ignore_ascii_case(name) && candidate == value)
        };

        let inner = self.read()?;
        let notes = inner
            .notes
            .iter()
            .filter(|note| has_property(&note.properties))
            .map(|note| {
                PropertyMatch::Note(NoteLocation {
                    book_id: note.book_id,
                    note_id: note.id,
                })
            });
        let books = inner
            .books
            .values()
            .filter(|record| has_property(&record.book.properties))
            .map(|record| PropertyMatch::Book(record.book.clone()));
        Ok(notes.chain(books).collect())
    }

    fn focus_note(&self, note_id: NoteId, fold_rest: bool) -> AppResult<CommandOutput> {
        let note = self
            .get_note(note_id)?
            .ok_or_else(|| AppError::NotFound(format!("note {note_id}")))?;
        self.focus.post(NavigationAction::OpenBookFocusNote {
            book_id: note.book_id,
            note_id: note.id,
            fold_rest,
        });
        Ok(CommandOutput::Focused(NoteLocation {
            book_id: note.book_id,
            note_id: note.id,
        }))
    }

    fn export_saved_searches(&self, destination: &Path) -> AppResult<usize> {
        let file = SavedSearchFile {
            saved_searches: self.saved_searches()?,
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(destination, json)
            .with_context(|| format!("writing saved searches to {}", destination.display()))?;
        Ok(file.saved_searches.len())
    }

    fn import_saved_searches(&self, source: &Path) -> AppResult<usize> {
        let raw = fs::read_to_string(source)
            .with_context(|| format!("reading saved searches from {}", source.display()))?;
        let file: SavedSearchFile = serde_json::from_str(&raw).map_err(|error| {
            AppError::Internal(format!("parsing saved searches from {}: {error}", source.display()))
        })?;

        let count = file.saved_searches.len();
        {
            let mut inner = self.write()?;
            inner.saved_searches = file
                .saved_searches
                .into_iter()
                .enumerate()
                .map(|(index, search)| SavedSearch {
                    position: index as i32 + 1,
                    ..search
                })
                .collect();
        }
        self.changes.bump();
        Ok(count)
    }

    fn update_clocking_state(
        &self,
        note_ids: &BTreeSet<NoteId>,
        action: ClockingAction,
    ) -> AppResult<()> {
        {
            let mut inner = self.write()?;
            let mut books = BTreeSet::new();
            for note_id in note_ids {
                let note = inner
                    .notes
                    .iter()
                    .find(|note| note.id == *note_id)
                    .ok_or_else(|| AppError::NotFound(format!("note {note_id}")))?;
                books.insert(note.book_id);
            }

            let now = Utc::now();
            for note_id in note_ids {
                let open = inner
                    .clocks
                    .iter()
                    .position(|entry| entry.note_id == *note_id && entry.ended_at.is_none());
                match (action, open) {
                    (ClockingAction::In, None) => inner.clocks.push(ClockEntry {
                        note_id: *note_id,
                        started_at: now,
                        ended_at: None,
                    }),
                    (ClockingAction::Out, Some(index)) => inner.clocks[index].ended_at = Some(now),
                    (ClockingAction::Cancel, Some(index)) => {
                        inner.clocks.remove(index);
                    }
                    _ => {}
                }
            }
            for book_id in books {
                touch(&mut inner, book_id);
            }
        }
        tracing::debug!(notes = note_ids.len(), action = action.as_str(), "clocking state updated");
        self.changes.bump();
        Ok(())
    }

    fn read(&self) -> AppResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> AppResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }
}

impl DataStore for MemoryStore {
    fn observe_books(&self, sort_order: &str) -> LiveQuery<BookView> {
        let inner = self.inner.clone();
        let sort_order = sort_order.to_string();
        LiveQuery::new(self.changes.subscribe(), move || {
            let inner = inner
                .read()
                .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))?;
            let mut books = inner
                .books
                .values()
                .map(|record| BookView {
                    book: record.book.clone(),
                    note_count: inner
                        .notes
                        .iter()
                        .filter(|note| note.book_id == record.book.id)
                        .count(),
                    modified_at: record.modified_at,
                })
                .collect::<Vec<_>>();
            sort_books(&mut books, &sort_order);
            Ok(books)
        })
    }

    fn observe_saved_searches(&self) -> LiveQuery<SavedSearch> {
        let inner = self.inner.clone();
        LiveQuery::new(self.changes.subscribe(), move || {
            let inner = inner
                .read()
                .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))?;
            let mut searches = inner.saved_searches.clone();
            searches.sort_by_key(|search| search.position);
            Ok(searches)
        })
    }

    fn get_note(&self, id: NoteId) -> AppResult<Option<Note>> {
        Ok(self.read()?.notes.iter().find(|note| note.id == id).cloned())
    }
}

impl CommandRunner for MemoryStore {
    fn run(&self, command: Command) -> AppResult<CommandOutput> {
        match command {
            Command::LinkFindTarget { path } => {
                self.find_link_target(&path).map(CommandOutput::LinkTarget)
            }
            Command::FindWithProperty { name, value } => self
                .find_with_property(&name, &value)
                .map(CommandOutput::PropertyMatches),
            Command::BookSparseTreeForNote { note_id } => self.focus_note(note_id, true),
            Command::BookScrollToNote { note_id } => self.focus_note(note_id, false),
            Command::SavedSearchExport { destination } => {
                self.export_saved_searches(&destination).map(CommandOutput::Count)
            }
            Command::SavedSearchImport { source } => {
                self.import_saved_searches(&source).map(CommandOutput::Count)
            }
            Command::NoteUpdateClockingState { note_ids, action } => self
                .update_clocking_state(&note_ids, action)
                .map(|()| CommandOutput::Unit),
        }
    }
}

fn touch(inner: &mut Inner, book_id: BookId) {
    if let Some(record) = inner.books.get_mut(&book_id) {
        record.modified_at = Utc::now();
    }
}

fn sort_books(books: &mut [BookView], sort_order: &str) {
    match sort_order {
        SORT_BY_MODIFICATION_TIME => books.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| a.book.name.cmp(&b.book.name))
        }),
        SORT_BY_NAME => books.sort_by_key(|view| view.book.name.to_lowercase()),
        other => {
            tracing::debug!(sort_order = other, "unknown sort order, sorting by name");
            books.sort_by_key(|view| view.book.name.to_lowercase());
        }
    }
}
