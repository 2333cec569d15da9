use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use std::time::Duration;

use crate::config::Config;
use crate::persisted::Persistence;
use crate::ui::{install_panic_hook, ListingWizard, TerminalGuard, WizardAction};

/// How a wizard session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Left with the draft saved for next time
    Saved,
    /// Saved draft thrown away at the restore prompt
    Discarded,
    /// Listing submitted
    Submitted(crate::ui::ListingDraft),
}

pub struct App {
    config: Config,
    wizard: ListingWizard,
}

impl App {
    pub fn new(config: Config, persistence: &Persistence) -> Result<Self> {
        let wizard = ListingWizard::new(persistence, &config.drafts)
            .context("Failed to start listing wizard")?;
        Ok(Self { config, wizard })
    }

    pub fn run(&mut self) -> Result<SessionOutcome> {
        install_panic_hook();
        let (guard, mut terminal) = TerminalGuard::enter()?;

        let tick_rate = Duration::from_millis(self.config.ui.refresh_rate_ms);

        let outcome = loop {
            terminal.draw(|f| self.wizard.render(f))?;

            if !event::poll(tick_rate)? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }

            match self.wizard.handle_key(key) {
                WizardAction::Continue => {}
                WizardAction::Quit => break SessionOutcome::Saved,
                WizardAction::Discarded => break SessionOutcome::Discarded,
                WizardAction::Completed(listing) => break SessionOutcome::Submitted(listing),
            }
        };

        guard.restore();
        tracing::info!(?outcome, "Wizard session ended");
        Ok(outcome)
    }
}
