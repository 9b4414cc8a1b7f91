//! Typed errors for the GUI core.
//!
//! Internal functions return these (or `anyhow::Error` wrapping them); only the
//! topmost handler in [`crate::gui::Gui::handle_error`] decides how a failure is
//! presented to the user.

use std::io;

use thiserror::Error;

use crate::locks::Domain;

#[derive(Debug, Error)]
pub enum GuiError {
    /// Invalid prompt content. Shown inline; the popup stays open.
    #[error("{0}")]
    UserInput(String),

    /// A disabled menu item or keybinding was invoked.
    #[error("{text}")]
    Disabled { text: String, show_in_panel: bool },

    #[error("cannot show '{requested}': '{current}' is already showing")]
    PopupAlreadyShowing { current: String, requested: String },

    #[error("no popup is showing")]
    NoPopup,

    #[error("operation cancelled")]
    Cancelled,

    /// An operation error that should be shown as an error popup rather than a toast.
    #[error("{0}")]
    ShowInPanel(String),

    #[error("failed to save app state: {0}")]
    SaveAppState(#[source] io::Error),

    #[error("lock order violation: acquiring {requested:?} while holding {held:?}")]
    LockOrder { held: Vec<Domain>, requested: Domain },

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Errors from the repository command layer.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to run `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: io::Error,
    },

    #[error("`{cmd}` failed: {stderr}")]
    Failed {
        cmd: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{cmd}` was cancelled")]
    Cancelled { cmd: String },

    #[error("not a git repository")]
    NotARepository,
}

/// How the topmost handler presents an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presentation {
    Inline,
    Toast,
    Popup,
    Silent,
}

/// Where an error surfaced from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorOrigin {
    UiThread,
    Worker,
}

/// Decide how to present `err`.
///
/// Cancellation is never presented. Worker failures become toasts unless the
/// error asks for a panel; UI-thread failures become popups.
pub fn presentation_for(err: &anyhow::Error, origin: ErrorOrigin) -> Presentation {
    if let Some(gui) = err.downcast_ref::<GuiError>() {
        match gui {
            GuiError::Cancelled | GuiError::Command(CommandError::Cancelled { .. }) => {
                return Presentation::Silent;
            }
            GuiError::UserInput(_) => return Presentation::Inline,
            GuiError::ShowInPanel(_) => return Presentation::Popup,
            GuiError::Disabled { show_in_panel, .. } => {
                return if *show_in_panel {
                    Presentation::Popup
                } else {
                    Presentation::Toast
                };
            }
            _ => {}
        }
    }
    if let Some(CommandError::Cancelled { .. }) = err.downcast_ref::<CommandError>() {
        return Presentation::Silent;
    }

    match origin {
        ErrorOrigin::UiThread => Presentation::Popup,
        ErrorOrigin::Worker => Presentation::Toast,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_errors_default_to_toast() {
        let err = anyhow::anyhow!("push rejected");
        assert_eq!(
            presentation_for(&err, ErrorOrigin::Worker),
            Presentation::Toast
        );
        assert_eq!(
            presentation_for(&err, ErrorOrigin::UiThread),
            Presentation::Popup
        );
    }

    #[test]
    fn cancellation_is_silent_from_anywhere() {
        let err = anyhow::Error::from(GuiError::Cancelled);
        assert_eq!(
            presentation_for(&err, ErrorOrigin::Worker),
            Presentation::Silent
        );
        let err = anyhow::Error::from(CommandError::Cancelled {
            cmd: "git push".to_string(),
        });
        assert_eq!(
            presentation_for(&err, ErrorOrigin::UiThread),
            Presentation::Silent
        );
    }

    #[test]
    fn disabled_reason_respects_panel_flag() {
        let toast = anyhow::Error::from(GuiError::Disabled {
            text: "nothing to push".into(),
            show_in_panel: false,
        });
        let panel = anyhow::Error::from(GuiError::Disabled {
            text: "a very long explanation".into(),
            show_in_panel: true,
        });
        assert_eq!(
            presentation_for(&toast, ErrorOrigin::UiThread),
            Presentation::Toast
        );
        assert_eq!(
            presentation_for(&panel, ErrorOrigin::Worker),
            Presentation::Popup
        );
    }
}
