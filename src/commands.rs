use crate::errors::AppResult;
use crate::models::{ClockingAction, LinkTarget, NoteId, NoteLocation, PropertyMatch};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// A unit of background work against the data store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    LinkFindTarget { path: String },
    FindWithProperty { name: String, value: String },
    BookSparseTreeForNote { note_id: NoteId },
    BookScrollToNote { note_id: NoteId },
    SavedSearchExport { destination: PathBuf },
    SavedSearchImport { source: PathBuf },
    NoteUpdateClockingState { note_ids: BTreeSet<NoteId>, action: ClockingAction },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LinkFindTarget { .. } => "link-find-target",
            Self::FindWithProperty { .. } => "find-with-property",
            Self::BookSparseTreeForNote { .. } => "book-sparse-tree-for-note",
            Self::BookScrollToNote { .. } => "book-scroll-to-note",
            Self::SavedSearchExport { .. } => "saved-search-export",
            Self::SavedSearchImport { .. } => "saved-search-import",
            Self::NoteUpdateClockingState { .. } => "note-update-clocking-state",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    LinkTarget(LinkTarget),
    PropertyMatches(Vec<PropertyMatch>),
    Focused(NoteLocation),
    Count(usize),
    Unit,
}

impl CommandOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LinkTarget(_) => "link-target",
            Self::PropertyMatches(_) => "property-matches",
            Self::Focused(_) => "focused",
            Self::Count(_) => "count",
            Self::Unit => "unit",
        }
    }
}

/// Executes commands. Implementations block; callers run them on a worker.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(&self, command: Command) -> AppResult<CommandOutput>;
}

impl<F> CommandRunner for F
where
    F: Fn(Command) -> AppResult<CommandOutput> + Send + Sync + 'static,
{
    fn run(&self, command: Command) -> AppResult<CommandOutput> {
        self(command)
    }
}
