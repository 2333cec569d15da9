pub mod dialogs;
pub mod form_field;
pub mod terminal_guard;
pub mod wizard;

pub use dialogs::{RestoreChoice, RestorePrompt};
pub use terminal_guard::{install_panic_hook, TerminalGuard};
pub use wizard::{ListingDraft, ListingWizard, WizardAction};
