use notebook_coordinator::models::{BookView, ClockingAction, NoteId, SavedSearch};
use notebook_coordinator::store::memory::{SORT_BY_MODIFICATION_TIME, SORT_BY_NAME};
use notebook_coordinator::{
    AppSettings, ErrorEvent, LinkTargetPreference, LiveCollection, MainViewModel, MemoryStore,
    NavigationAction, OneShotEvent,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

const WAIT: Duration = Duration::from_secs(5);

fn view_with(store: &Arc<MemoryStore>, link_target: LinkTargetPreference) -> MainViewModel {
    MainViewModel::new(
        Handle::current(),
        store.clone(),
        store.clone(),
        Arc::new(AppSettings {
            link_target,
            ..AppSettings::default()
        }),
    )
}

async fn settle<T: Clone>(rows: &mut LiveCollection<T>, expected: impl Fn(&[T]) -> bool) -> Vec<T> {
    tokio::time::timeout(WAIT, async {
        loop {
            let current = rows.borrow_and_update().clone();
            if expected(&current) {
                return current;
            }
            rows.changed().await.expect("collection alive");
        }
    })
    .await
    .expect("collection settled")
}

async fn next<T>(event: &OneShotEvent<T>) -> T {
    tokio::time::timeout(WAIT, event.next()).await.expect("event posted")
}

fn names(books: &[BookView]) -> Vec<&str> {
    books.iter().map(|view| view.book.name.as_str()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn books_follow_the_most_recent_sort_order() {
    let store = Arc::new(MemoryStore::new("/notes"));
    let inbox = store.add_book("inbox").expect("book");
    store.add_book("archive").expect("book");
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.add_note(inbox.id, "call back", &[]).expect("note");

    let view = view_with(&store, LinkTargetPreference::NoteDetails);
    let mut books = view.books();

    view.refresh(SORT_BY_MODIFICATION_TIME);
    view.refresh(SORT_BY_NAME);
    view.refresh(SORT_BY_MODIFICATION_TIME);
    let settled = settle(&mut books, |rows| names(rows) == ["inbox", "archive"]).await;
    assert_eq!(settled[0].note_count, 1);

    view.refresh(SORT_BY_NAME);
    settle(&mut books, |rows| names(rows) == ["archive", "inbox"]).await;

    store.add_book("backlog").expect("book");
    settle(&mut books, |rows| names(rows) == ["archive", "backlog", "inbox"]).await;
}

#[tokio::test]
async fn ambiguous_custom_id_reports_error_then_opens_first_note() {
    let store = Arc::new(MemoryStore::new("/notes"));
    let book = store.add_book("projects").expect("book");
    let first = store.add_note(book.id, "alpha", &[("CUSTOM_ID", "abc")]).expect("note");
    store.add_note(book.id, "beta", &[("CUSTOM_ID", "abc")]).expect("note");
    let view = view_with(&store, LinkTargetPreference::NoteDetails);

    view.follow_link_to_note_or_book_with_property("CUSTOM_ID", "abc");

    assert_eq!(
        next(view.navigation_actions()).await,
        NavigationAction::OpenNote {
            book_id: book.id,
            note_id: first.id,
        }
    );
    assert_eq!(
        view.errors().consume().map(|error| error.to_string()).as_deref(),
        Some("multiple entries match CUSTOM_ID=abc")
    );
}

#[tokio::test]
async fn missing_property_target_reports_once_without_navigation() {
    let store = Arc::new(MemoryStore::new("/notes"));
    let view = view_with(&store, LinkTargetPreference::NoteDetails);

    view.follow_link_to_note_or_book_with_property("CUSTOM_ID", "nope")
        .await
        .expect("dispatch");

    assert_eq!(
        view.errors().consume(),
        Some(ErrorEvent::NoLinkTarget {
            name: "CUSTOM_ID".to_string(),
            value: "nope".to_string(),
        })
    );
    assert_eq!(view.errors().consume(), None);
    assert_eq!(view.navigation_actions().consume(), None);
}

#[tokio::test]
async fn property_on_a_book_opens_the_book() {
    let store = Arc::new(MemoryStore::new("/notes"));
    let book = store.add_book("reading").expect("book");
    store.set_book_property(book.id, "ID", "shelf").expect("property");
    let view = view_with(&store, LinkTargetPreference::BookAndScroll);

    view.follow_link_to_note_or_book_with_property("ID", "shelf");

    assert_eq!(
        next(view.navigation_actions()).await,
        NavigationAction::OpenBook { book_id: book.id }
    );
    assert!(!view.errors().has_pending());
}

#[tokio::test]
async fn sparse_tree_preference_focuses_through_the_store() {
    let store = Arc::new(MemoryStore::new("/notes"));
    let book = store.add_book("projects").expect("book");
    let note = store.add_note(book.id, "alpha", &[("CUSTOM_ID", "abc")]).expect("note");
    let view = view_with(&store, LinkTargetPreference::BookAndSparseTree);

    view.follow_link_to_note_or_book_with_property("CUSTOM_ID", "abc")
        .await
        .expect("dispatch");

    assert_eq!(view.navigation_actions().consume(), None);
    assert_eq!(
        store.focus_requests().consume(),
        Some(NavigationAction::OpenBookFocusNote {
            book_id: book.id,
            note_id: note.id,
            fold_rest: true,
        })
    );
}

#[tokio::test]
async fn file_links_open_files_or_known_books() {
    let store = Arc::new(MemoryStore::new("/notes"));
    let todo = store.add_book("todo").expect("book");
    let view = view_with(&store, LinkTargetPreference::NoteDetails);

    view.follow_link_to_file("/notes/plan.org");
    assert_eq!(
        next(view.navigation_actions()).await,
        NavigationAction::OpenFile {
            path: PathBuf::from("/notes/plan.org"),
        }
    );

    view.follow_link_to_file("todo.org");
    assert_eq!(
        next(view.navigation_actions()).await,
        NavigationAction::OpenBook { book_id: todo.id }
    );
}

#[tokio::test]
async fn open_note_navigates_only_to_existing_notes() {
    let store = Arc::new(MemoryStore::new("/notes"));
    let book = store.add_book("work").expect("book");
    let note = store.add_note(book.id, "standup", &[]).expect("note");
    let view = view_with(&store, LinkTargetPreference::NoteDetails);

    view.open_note(NoteId(999)).await.expect("dispatch");
    assert_eq!(view.navigation_actions().consume(), None);
    assert_eq!(view.errors().consume(), None);

    view.open_note(note.id).await.expect("dispatch");
    assert_eq!(
        view.navigation_actions().consume(),
        Some(NavigationAction::OpenNote {
            book_id: book.id,
            note_id: note.id,
        })
    );
}

#[tokio::test]
async fn saved_searches_round_trip_through_export_and_import() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("searches.json");

    let source = Arc::new(MemoryStore::new("/notes"));
    source.add_saved_search("Agenda", "ad.7").expect("search");
    source.add_saved_search("Next", "i.next").expect("search");
    let exporter = view_with(&source, LinkTargetPreference::NoteDetails);
    exporter.export_saved_searches(&file);
    assert_eq!(next(exporter.saved_search_export_events()).await, 2);

    let target = Arc::new(MemoryStore::new("/notes"));
    let importer = view_with(&target, LinkTargetPreference::NoteDetails);
    let mut searches = importer.saved_searches();
    settle(&mut searches, |rows: &[SavedSearch]| rows.is_empty()).await;

    importer.import_saved_searches(&file);
    assert_eq!(next(importer.saved_search_import_events()).await, 2);
    let imported = settle(&mut searches, |rows| rows.len() == 2).await;
    assert_eq!(imported[0].name, "Agenda");
    assert_eq!(imported[1].query, "i.next");
}

#[tokio::test]
async fn failed_import_only_surfaces_on_error_channel() {
    let store = Arc::new(MemoryStore::new("/notes"));
    let view = view_with(&store, LinkTargetPreference::NoteDetails);

    view.import_saved_searches("/no/such/searches.json")
        .await
        .expect("dispatch boundary holds");

    match view.errors().consume() {
        Some(ErrorEvent::CommandFailed { command, message }) => {
            assert_eq!(command, "saved-search-import");
            assert!(message.starts_with("IO_FAILURE: reading saved searches"));
        }
        other => panic!("unexpected error event {other:?}"),
    }
    assert_eq!(view.saved_search_import_events().consume(), None);
}

#[tokio::test]
async fn clocking_updates_are_acknowledged() {
    let store = Arc::new(MemoryStore::new("/notes"));
    let book = store.add_book("work").expect("book");
    let note = store.add_note(book.id, "standup", &[]).expect("note");
    let view = view_with(&store, LinkTargetPreference::NoteDetails);

    view.clocking_update_request(BTreeSet::from([note.id]), ClockingAction::In);
    next(view.clocking_updates()).await;
    assert_eq!(store.clock_entries(note.id).expect("entries").len(), 1);

    view.clocking_update_request(BTreeSet::from([NoteId(77)]), ClockingAction::Out)
        .await
        .expect("dispatch");
    assert_eq!(view.clocking_updates().consume(), None);
    assert_eq!(
        view.errors().consume().map(|error| error.to_string()).as_deref(),
        Some("note-update-clocking-state failed: NOT_FOUND: note 77")
    );
}

#[tokio::test]
async fn open_uses_persisted_settings() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let db = notebook_coordinator::db::Database::new(&dir.path().join("settings.db"))
            .expect("db");
        db.update_settings(serde_json::json!({
            "linkTarget": "book_and_scroll",
            "booksSortOrder": SORT_BY_MODIFICATION_TIME,
        }))
        .expect("settings");
    }

    let store = Arc::new(MemoryStore::new("/notes"));
    let older = store.add_book("older").expect("book");
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.add_book("newer").expect("book");
    let note = store.add_note(older.id, "alpha", &[("ID", "a")]).expect("note");

    let view = MainViewModel::open(Handle::current(), dir.path(), store.clone(), store.clone())
        .expect("open");
    let mut books = view.books();
    settle(&mut books, |rows| names(rows) == ["older", "newer"]).await;

    view.follow_link_to_note_or_book_with_property("ID", "a")
        .await
        .expect("dispatch");
    assert_eq!(
        store.focus_requests().consume(),
        Some(NavigationAction::OpenBookFocusNote {
            book_id: older.id,
            note_id: note.id,
            fold_rest: false,
        })
    );
}

#[test]
fn tracing_writes_under_log_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    notebook_coordinator::init_tracing(dir.path()).expect("tracing");
    tracing::info!("coordinator log check");
    assert!(dir.path().join("logs").is_dir());
}
