pub mod commands;
pub mod db;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod main_view;
pub mod models;
pub mod preferences;
pub mod projection;
pub mod resolver;
pub mod store;

pub use crate::commands::{Command, CommandOutput, CommandRunner};
pub use crate::errors::{AppError, AppResult, ErrorEvent};
pub use crate::events::OneShotEvent;
pub use crate::main_view::MainViewModel;
pub use crate::models::{AppSettings, LinkTargetPreference, NavigationAction};
pub use crate::preferences::Preferences;
pub use crate::projection::LiveCollection;
pub use crate::store::{DataStore, LiveQuery, MemoryStore};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs a JSON subscriber writing to a daily file under `log_dir/logs`.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(log_dir: &Path) -> AppResult<()> {
    let log_dir = log_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "coordinator.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
