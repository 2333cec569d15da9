//! Listing wizard: a four-step business listing form with draft recovery.
//!
//! Every edit is merged into the workflow's form data and written after the
//! configured save delay, so quitting (or crashing) mid-form loses at most the
//! last quiet period of typing.

mod types;


pub use types::*;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
    Frame,
};
use serde_json::{Map, Value};

use crate::config::DraftsConfig;
use crate::persisted::Persistence;
use crate::ui::dialogs::{RestoreChoice, RestorePrompt};
use crate::ui::form_field::{InputChange, TextInput};
use crate::workflow::{MultiStepWorkflow, WorkflowError, WorkflowOptions};

/// One-line message shown in the footer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub is_error: bool,
}

/// The listing wizard screen
pub struct ListingWizard {
    workflow: MultiStepWorkflow<ListingDraft>,
    inputs: Vec<(FieldId, TextInput)>,
    focus: usize,
    prompt: RestorePrompt,
    status: Option<StatusMessage>,
}

impl ListingWizard {
    pub fn new(persistence: &Persistence, drafts: &DraftsConfig) -> Result<Self, WorkflowError> {
        let steps = WizardStep::all().iter().map(WizardStep::id);
        let options = WorkflowOptions::new(LISTING_FORM_KEY, steps, ListingDraft::default())
            .expiration(drafts.expiration())
            .save_delay(drafts.save_delay())
            .auto_save(drafts.auto_save)
            .validate(ListingDraft::is_within_limits)
            .on_step_complete(|step, _| tracing::debug!(step, "Listing step completed"))
            .on_form_complete(|draft: &ListingDraft| {
                tracing::info!(title = %draft.title, "Listing submitted");
            });

        let workflow = MultiStepWorkflow::new(persistence, options)?;

        let mut wizard = Self {
            workflow,
            inputs: Vec::new(),
            focus: 0,
            prompt: RestorePrompt::new(),
            status: None,
        };

        if wizard.workflow.has_persisted_data() {
            let step_title = wizard.step().title().to_string();
            let completed = wizard.workflow.completed_count();
            let total = wizard.workflow.step_count();
            let last_saved = wizard.workflow.last_saved();
            wizard.prompt.show(step_title, completed, total, last_saved);
        }
        wizard.load_inputs();
        Ok(wizard)
    }

    pub fn workflow(&self) -> &MultiStepWorkflow<ListingDraft> {
        &self.workflow
    }

    pub fn prompt(&self) -> &RestorePrompt {
        &self.prompt
    }

    pub fn status(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    /// Current step
    pub fn step(&self) -> WizardStep {
        WizardStep::from_id(self.workflow.current_step()).unwrap_or(WizardStep::Business)
    }

    /// Field that receives typed characters
    pub fn focused_field(&self) -> Option<FieldId> {
        self.inputs.get(self.focus).map(|(field, _)| *field)
    }

    fn set_status(&mut self, text: impl Into<String>, is_error: bool) {
        self.status = Some(StatusMessage {
            text: text.into(),
            is_error,
        });
    }

    /// Rebuild the inputs of the current step from form data
    fn load_inputs(&mut self) {
        let draft = self.workflow.form_data();
        self.inputs = self
            .step()
            .fields()
            .iter()
            .map(|field| {
                let mut input =
                    TextInput::new(field.label(), field.placeholder(), field.max_length());
                if field.is_amount() {
                    input = input.digits_only();
                }
                (*field, input.with_value(field.get(&draft)))
            })
            .collect();
        self.focus = 0;
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> WizardAction {
        if self.prompt.visible {
            return self.handle_prompt_key(key.code);
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('q') if ctrl => {
                self.workflow.flush();
                return WizardAction::Quit;
            }
            KeyCode::Char('s') if ctrl => {
                self.workflow.save_progress();
                self.set_status("Draft saved", false);
            }
            KeyCode::Char(_) if ctrl => {}
            KeyCode::Enter => return self.submit_step(),
            KeyCode::Esc => {
                if self.workflow.go_to_previous_step() {
                    self.load_inputs();
                    self.status = None;
                }
            }
            KeyCode::F(n @ 1..=4) => self.jump_to(usize::from(n - 1)),
            KeyCode::Tab | KeyCode::Down => {
                if !self.inputs.is_empty() {
                    self.focus = (self.focus + 1) % self.inputs.len();
                }
            }
            KeyCode::BackTab | KeyCode::Up => {
                if !self.inputs.is_empty() {
                    self.focus = (self.focus + self.inputs.len() - 1) % self.inputs.len();
                }
            }
            code => self.edit_focused(code),
        }
        WizardAction::Continue
    }

    fn handle_prompt_key(&mut self, code: KeyCode) -> WizardAction {
        let choice = match code {
            KeyCode::Up | KeyCode::BackTab => {
                self.prompt.select_prev();
                return WizardAction::Continue;
            }
            KeyCode::Down | KeyCode::Tab => {
                self.prompt.select_next();
                return WizardAction::Continue;
            }
            KeyCode::Enter => self.prompt.selection,
            KeyCode::Char(c) => match RestoreChoice::from_key(c) {
                Some(choice) => choice,
                None => return WizardAction::Continue,
            },
            _ => return WizardAction::Continue,
        };
        self.apply_restore_choice(choice)
    }

    /// Act on the restore prompt
    pub fn apply_restore_choice(&mut self, choice: RestoreChoice) -> WizardAction {
        self.prompt.hide();
        match choice {
            RestoreChoice::Restore => {
                self.load_inputs();
                self.set_status(format!("Resumed at {}", self.step().title()), false);
                WizardAction::Continue
            }
            RestoreChoice::StartFresh => {
                self.workflow.clear_form();
                self.load_inputs();
                self.status = None;
                WizardAction::Continue
            }
            RestoreChoice::Discard => {
                self.workflow.clear_form();
                WizardAction::Discarded
            }
        }
    }

    fn edit_focused(&mut self, code: KeyCode) {
        let patch = {
            let Some((field, input)) = self.inputs.get_mut(self.focus) else {
                return;
            };
            if input.handle_key(code) != InputChange::Edited {
                return;
            }
            let mut patch = Map::new();
            patch.insert(field.key().to_string(), Value::String(input.value().to_string()));
            Value::Object(patch)
        };

        if let Err(e) = self.workflow.merge_form_data(patch) {
            tracing::warn!(error = %e, "Failed to apply field edit");
            self.set_status(e.to_string(), true);
        } else {
            self.status = None;
        }
    }

    fn jump_to(&mut self, index: usize) {
        if self.workflow.can_go_to_step(index) {
            self.workflow.go_to_step(index);
            self.load_inputs();
            self.status = None;
        } else {
            self.set_status("Complete the earlier steps first", true);
        }
    }

    fn submit_step(&mut self) -> WizardAction {
        let step = self.step();
        let errors = self.workflow.with_form_data(|draft| step.errors(draft));
        if let Some(first) = errors.into_iter().next() {
            self.set_status(first, true);
            return WizardAction::Continue;
        }

        if step == WizardStep::Review {
            self.workflow.complete_form();
            let listing = self.workflow.form_data();
            self.workflow.clear_form();
            return WizardAction::Completed(listing);
        }

        self.workflow.mark_current_step_completed();
        self.workflow.go_to_next_step();
        self.load_inputs();
        self.status = None;
        WizardAction::Continue
    }

    pub fn render(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Progress
                Constraint::Min(8),    // Steps + form
                Constraint::Length(3), // Help + status
            ])
            .split(frame.area());

        self.render_progress(frame, chunks[0]);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(22), Constraint::Min(30)])
            .split(chunks[1]);

        self.render_steps(frame, body[0]);
        if self.step() == WizardStep::Review {
            self.render_review(frame, body[1]);
        } else {
            self.render_fields(frame, body[1]);
        }

        self.render_footer(frame, chunks[2]);
        self.prompt.render(frame);
    }

    fn render_progress(&self, frame: &mut Frame, area: Rect) {
        let gauge = Gauge::default()
            .block(
                Block::default()
                    .title(" New Business Listing ")
                    .borders(Borders::ALL),
            )
            .gauge_style(Style::default().fg(Color::Cyan))
            .percent(u16::from(self.workflow.progress()))
            .label(format!(
                "Step {} of {}",
                self.workflow.current_step_index() + 1,
                self.workflow.step_count()
            ));
        frame.render_widget(gauge, area);
    }

    fn render_steps(&self, frame: &mut Frame, area: Rect) {
        let current = self.workflow.current_step_index();
        let lines: Vec<Line> = WizardStep::all()
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let (marker, marker_color) = if self.workflow.is_step_completed(step.id()) {
                    ("✓ ", Color::Green)
                } else if i == current {
                    ("▶ ", Color::Yellow)
                } else {
                    ("  ", Color::Gray)
                };
                let style = if i == current {
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD)
                } else if self.workflow.can_go_to_step(i) {
                    Style::default().fg(Color::White)
                } else {
                    Style::default().fg(Color::DarkGray)
                };

                Line::from(vec![
                    Span::styled(marker, Style::default().fg(marker_color)),
                    Span::styled(format!("F{} ", i + 1), Style::default().fg(Color::DarkGray)),
                    Span::styled(step.title(), style),
                ])
            })
            .collect();

        let block = Block::default().title(" Steps ").borders(Borders::ALL);
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn render_fields(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title(format!(" {} ", self.step().title()))
            .borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let mut constraints: Vec<Constraint> =
            self.inputs.iter().map(|_| Constraint::Length(3)).collect();
        constraints.push(Constraint::Min(0));
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .margin(1)
            .split(inner);

        for (i, (_, input)) in self.inputs.iter().enumerate() {
            input.render(frame, rows[i], i == self.focus);
        }
    }

    fn render_review(&self, frame: &mut Frame, area: Rect) {
        let draft = self.workflow.form_data();
        let mut lines: Vec<Line> = FieldId::all()
            .iter()
            .map(|field| {
                let value = field.get(&draft);
                let shown = if value.is_empty() { "-" } else { value };
                Line::from(vec![
                    Span::styled(
                        format!("{:<16}", field.label()),
                        Style::default().fg(Color::Gray),
                    ),
                    Span::styled(shown.to_string(), Style::default().fg(Color::White)),
                ])
            })
            .collect();

        lines.push(Line::raw(""));
        let errors = WizardStep::Review.errors(&draft);
        if errors.is_empty() {
            lines.push(Line::from(Span::styled(
                "Press Enter to submit the listing.",
                Style::default().fg(Color::Green),
            )));
        } else {
            for error in errors {
                lines.push(Line::from(Span::styled(error, Style::default().fg(Color::Red))));
            }
        }

        let block = Block::default().title(" Review ").borders(Borders::ALL);
        frame.render_widget(
            Paragraph::new(lines).block(block).wrap(Wrap { trim: false }),
            area,
        );
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
        let mut spans = vec![
            key("Enter"),
            Span::raw(" Next  "),
            key("Esc"),
            Span::raw(" Back  "),
            key("F1-F4"),
            Span::raw(" Jump  "),
            key("^S"),
            Span::raw(" Save  "),
            key("^Q"),
            Span::raw(" Quit  "),
        ];

        match &self.status {
            Some(status) => {
                let color = if status.is_error { Color::Red } else { Color::Green };
                spans.push(Span::styled(status.text.clone(), Style::default().fg(color)));
            }
            None => {
                if let Some(saved) = self.workflow.last_saved() {
                    spans.push(Span::styled(
                        format!(
                            "Saved {}",
                            saved.with_timezone(&chrono::Local).format("%H:%M:%S")
                        ),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
            }
        }

        frame.render_widget(
            Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL)),
            area,
        );
    }
}
