//! Turns link lookup results into navigation decisions.
//!
//! File and book targets map straight onto a navigation action. Property
//! lookups may match nothing, one entry, or several; several matches are
//! reported and the first one is still followed.

use crate::commands::{Command, CommandOutput};
use crate::errors::ErrorEvent;
use crate::models::{
    LinkTarget, LinkTargetPreference, NavigationAction, NoteLocation, PropertyMatch,
};
use crate::preferences::Preferences;
use std::sync::Arc;

/// What to do once a link has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Navigate(NavigationAction),
    /// The follow-up command performs the navigation itself.
    Run(Command),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyResolution {
    /// Posted in order, before `next` is acted on.
    pub errors: Vec<ErrorEvent>,
    pub next: Option<Resolution>,
}

#[derive(Clone)]
pub struct LinkResolver {
    preferences: Arc<dyn Preferences>,
}

impl LinkResolver {
    pub fn new(preferences: Arc<dyn Preferences>) -> Self {
        Self { preferences }
    }

    pub fn resolve_path(
        &self,
        command: &str,
        output: CommandOutput,
    ) -> Result<NavigationAction, ErrorEvent> {
        match output {
            CommandOutput::LinkTarget(target) => Ok(navigate_to(target)),
            other => Err(unexpected(command, &other)),
        }
    }

    pub fn resolve_property(
        &self,
        command: &str,
        name: &str,
        value: &str,
        output: CommandOutput,
    ) -> Result<PropertyResolution, ErrorEvent> {
        let matches = match output {
            CommandOutput::PropertyMatches(matches) => matches,
            other => return Err(unexpected(command, &other)),
        };

        let mut matches = matches.into_iter();
        let Some(first) = matches.next() else {
            return Ok(PropertyResolution {
                errors: vec![ErrorEvent::NoLinkTarget {
                    name: name.to_string(),
                    value: value.to_string(),
                }],
                next: None,
            });
        };

        let mut errors = Vec::new();
        if matches.len() > 0 {
            tracing::info!(
                property = %name,
                value = %value,
                extra = matches.len(),
                "ambiguous property link, following first match"
            );
            errors.push(ErrorEvent::AmbiguousLinkTarget {
                name: name.to_string(),
                value: value.to_string(),
            });
        }

        let next = match first {
            PropertyMatch::Book(book) => {
                Some(Resolution::Navigate(NavigationAction::OpenBook { book_id: book.id }))
            }
            PropertyMatch::Note(location) => match self.preferences.link_target() {
                Ok(preference) => Some(open_note(location, preference)),
                Err(error) => {
                    tracing::warn!(error = %error, "link target preference unreadable");
                    errors.push(ErrorEvent::Preferences(error.to_string()));
                    None
                }
            },
        };

        Ok(PropertyResolution { errors, next })
    }
}

pub fn navigate_to(target: LinkTarget) -> NavigationAction {
    match target {
        LinkTarget::File(path) => NavigationAction::OpenFile { path },
        LinkTarget::Book(book) => NavigationAction::OpenBook { book_id: book.id },
    }
}

pub fn open_note(location: NoteLocation, preference: LinkTargetPreference) -> Resolution {
    match preference {
        LinkTargetPreference::NoteDetails => Resolution::Navigate(NavigationAction::OpenNote {
            book_id: location.book_id,
            note_id: location.note_id,
        }),
        LinkTargetPreference::BookAndSparseTree => Resolution::Run(Command::BookSparseTreeForNote {
            note_id: location.note_id,
        }),
        LinkTargetPreference::BookAndScroll => Resolution::Run(Command::BookScrollToNote {
            note_id: location.note_id,
        }),
    }
}

fn unexpected(command: &str, output: &CommandOutput) -> ErrorEvent {
    tracing::error!(
        command,
        output = output.kind(),
        "command returned an output of the wrong shape"
    );
    ErrorEvent::UnexpectedOutput {
        command: command.to_string(),
        output: output.kind().to_string(),
    }
}
