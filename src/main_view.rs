use crate::commands::{Command, CommandOutput, CommandRunner};
use crate::db::Database;
use crate::dispatcher::Dispatcher;
use crate::errors::{AppResult, ErrorEvent};
use crate::events::OneShotEvent;
use crate::models::{BookView, ClockingAction, NavigationAction, NoteId, SavedSearch};
use crate::preferences::Preferences;
use crate::projection::{spawn_live, LiveCollection, Projection};
use crate::resolver::{LinkResolver, Resolution};
use crate::store::DataStore;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Coordinates the main screen: book and saved-search collections, link
/// following, and the one-shot events the display drains.
///
/// Every action method returns at once. Outcomes arrive on the event
/// channels; the returned handle may be awaited or dropped.
pub struct MainViewModel {
    store: Arc<dyn DataStore>,
    dispatcher: Dispatcher,
    resolver: LinkResolver,
    books: Projection<BookView>,
    saved_searches: OnceLock<(LiveCollection<SavedSearch>, JoinHandle<()>)>,
    navigation: Arc<OneShotEvent<NavigationAction>>,
    errors: Arc<OneShotEvent<ErrorEvent>>,
    saved_search_export: Arc<OneShotEvent<usize>>,
    saved_search_import: Arc<OneShotEvent<usize>>,
    clocking_updated: Arc<OneShotEvent<()>>,
}

impl MainViewModel {
    pub fn new(
        runtime: Handle,
        store: Arc<dyn DataStore>,
        runner: Arc<dyn CommandRunner>,
        preferences: Arc<dyn Preferences>,
    ) -> Self {
        let errors = Arc::new(OneShotEvent::new());
        let books = {
            let store = store.clone();
            Projection::new(runtime.clone(), move |sort_order: &str| {
                store.observe_books(sort_order)
            })
        };

        Self {
            store,
            dispatcher: Dispatcher::new(runtime, runner, errors.clone()),
            resolver: LinkResolver::new(preferences),
            books,
            saved_searches: OnceLock::new(),
            navigation: Arc::new(OneShotEvent::new()),
            errors,
            saved_search_export: Arc::new(OneShotEvent::new()),
            saved_search_import: Arc::new(OneShotEvent::new()),
            clocking_updated: Arc::new(OneShotEvent::new()),
        }
    }

    /// Opens the settings database under `data_dir` and starts the book
    /// projection with the stored sort order.
    pub fn open(
        runtime: Handle,
        data_dir: &Path,
        store: Arc<dyn DataStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> AppResult<Self> {
        let db = Arc::new(Database::new(&data_dir.join("settings.db"))?);
        let settings = db.get_settings()?;
        tracing::info!(
            db = %db.path().display(),
            link_target = settings.link_target.as_str(),
            "main view opened"
        );

        let view = Self::new(runtime, store, runner, db);
        view.refresh(&settings.books_sort_order);
        Ok(view)
    }

    /// Re-queries books even when `sort_order` is unchanged.
    pub fn refresh(&self, sort_order: &str) {
        tracing::debug!(sort_order, "refreshing books");
        self.books.set_parameter(sort_order);
    }

    pub fn books(&self) -> LiveCollection<BookView> {
        self.books.observe()
    }

    pub fn saved_searches(&self) -> LiveCollection<SavedSearch> {
        let (rows, _) = self.saved_searches.get_or_init(|| {
            spawn_live(self.dispatcher.runtime(), self.store.observe_saved_searches())
        });
        rows.clone()
    }

    pub fn follow_link_to_file(&self, path: &str) -> JoinHandle<()> {
        let command = Command::LinkFindTarget { path: path.to_string() };
        let name = command.name();
        let resolver = self.resolver.clone();
        let navigation = self.navigation.clone();

        self.dispatcher.dispatch(command, move |output, _| {
            navigation.post(resolver.resolve_path(name, output)?);
            Ok(())
        })
    }

    pub fn follow_link_to_note_or_book_with_property(
        &self,
        name: &str,
        value: &str,
    ) -> JoinHandle<()> {
        let command = Command::FindWithProperty {
            name: name.to_string(),
            value: value.to_string(),
        };
        let command_name = command.name();
        let (name, value) = (name.to_string(), value.to_string());
        let resolver = self.resolver.clone();
        let navigation = self.navigation.clone();
        let errors = self.errors.clone();

        self.dispatcher.dispatch(command, move |output, runner| {
            let resolution = resolver.resolve_property(command_name, &name, &value, output)?;
            for error in resolution.errors {
                errors.post(error);
            }

            match resolution.next {
                Some(Resolution::Navigate(action)) => {
                    navigation.post(action);
                }
                Some(Resolution::Run(follow_up)) => {
                    let follow_up_name = follow_up.name();
                    runner
                        .run(follow_up)
                        .map_err(|error| ErrorEvent::command_failed(follow_up_name, error))?;
                }
                None => {}
            }
            Ok(())
        })
    }

    pub fn open_note(&self, note_id: NoteId) -> JoinHandle<()> {
        let store = self.store.clone();
        let navigation = self.navigation.clone();

        self.dispatcher.run_blocking("open-note", move || {
            let note = store
                .get_note(note_id)
                .map_err(|error| ErrorEvent::command_failed("open-note", error))?;
            match note {
                Some(note) => {
                    navigation.post(NavigationAction::OpenNote {
                        book_id: note.book_id,
                        note_id: note.id,
                    });
                }
                None => tracing::debug!(%note_id, "note to open no longer exists"),
            }
            Ok(())
        })
    }

    pub fn display_query(&self, query: &str) {
        self.navigation.post(NavigationAction::DisplayQuery {
            query: query.to_string(),
        });
    }

    pub fn export_saved_searches(&self, destination: impl Into<PathBuf>) -> JoinHandle<()> {
        let command = Command::SavedSearchExport {
            destination: destination.into(),
        };
        self.dispatcher
            .dispatch_into(command, self.saved_search_export.clone(), count)
    }

    pub fn import_saved_searches(&self, source: impl Into<PathBuf>) -> JoinHandle<()> {
        let command = Command::SavedSearchImport { source: source.into() };
        self.dispatcher
            .dispatch_into(command, self.saved_search_import.clone(), count)
    }

    pub fn clocking_update_request(
        &self,
        note_ids: BTreeSet<NoteId>,
        action: ClockingAction,
    ) -> JoinHandle<()> {
        let command = Command::NoteUpdateClockingState { note_ids, action };
        self.dispatcher
            .dispatch_into(command, self.clocking_updated.clone(), |output| {
                matches!(output, CommandOutput::Unit).then_some(())
            })
    }

    pub fn navigation_actions(&self) -> &OneShotEvent<NavigationAction> {
        &self.navigation
    }

    pub fn errors(&self) -> &OneShotEvent<ErrorEvent> {
        &self.errors
    }

    pub fn saved_search_export_events(&self) -> &OneShotEvent<usize> {
        &self.saved_search_export
    }

    pub fn saved_search_import_events(&self) -> &OneShotEvent<usize> {
        &self.saved_search_import
    }

    pub fn clocking_updates(&self) -> &OneShotEvent<()> {
        &self.clocking_updated
    }
}

impl Drop for MainViewModel {
    fn drop(&mut self) {
        if let Some((_, task)) = self.saved_searches.get() {
            task.abort();
        }
    }
}

fn count(output: CommandOutput) -> Option<usize> {
    match output {
        CommandOutput::Count(count) => Some(count),
        _ => None,
    }
}
