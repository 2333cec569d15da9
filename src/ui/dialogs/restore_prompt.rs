use chrono::{DateTime, Local, Utc};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

use super::centered_rect;

/// What to do with a draft found at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreChoice {
    Restore,
    StartFresh,
    Discard,
}

impl RestoreChoice {
    pub fn all() -> &'static [RestoreChoice] {
        &[
            RestoreChoice::Restore,
            RestoreChoice::StartFresh,
            RestoreChoice::Discard,
        ]
    }

    fn next(self) -> Self {
        match self {
            Self::Restore => Self::StartFresh,
            Self::StartFresh => Self::Discard,
            Self::Discard => Self::Restore,
        }
    }

    fn prev(self) -> Self {
        match self {
            Self::Restore => Self::Discard,
            Self::StartFresh => Self::Restore,
            Self::Discard => Self::StartFresh,
        }
    }

    /// Get display label for this choice
    pub fn label(&self) -> &'static str {
        match self {
            Self::Restore => "Restore draft",
            Self::StartFresh => "Start fresh",
            Self::Discard => "Discard and exit",
        }
    }

    /// Get shortcut key for this choice
    pub fn key(&self) -> char {
        match self {
            Self::Restore => 'R',
            Self::StartFresh => 'S',
            Self::Discard => 'D',
        }
    }

    /// Choice bound to a shortcut key, case-insensitive
    pub fn from_key(c: char) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|choice| choice.key().eq_ignore_ascii_case(&c))
    }
}

/// Dialog shown when a saved draft is found on startup
pub struct RestorePrompt {
    pub visible: bool,
    pub step_title: String,
    pub completed: usize,
    pub total: usize,
    pub last_saved: Option<DateTime<Utc>>,
    pub selection: RestoreChoice,
}

impl RestorePrompt {
    pub fn new() -> Self {
        Self {
            visible: false,
            step_title: String::new(),
            completed: 0,
            total: 0,
            last_saved: None,
            selection: RestoreChoice::Restore,
        }
    }

    /// Show the prompt with draft context
    pub fn show(
        &mut self,
        step_title: String,
        completed: usize,
        total: usize,
        last_saved: Option<DateTime<Utc>>,
    ) {
        self.step_title = step_title;
        self.completed = completed;
        self.total = total;
        self.last_saved = last_saved;
        self.selection = RestoreChoice::Restore;
        self.visible = true;
    }

    pub fn hide(&mut self) {
        self.visible = false;
    }

    pub fn select_next(&mut self) {
        self.selection = self.selection.next();
    }

    pub fn select_prev(&mut self) {
        self.selection = self.selection.prev();
    }

    fn saved_label(&self) -> String {
        self.last_saved.map_or_else(
            || "unknown".to_string(),
            |t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        )
    }

    pub fn render(&self, frame: &mut Frame) {
        if !self.visible {
            return;
        }

        let area = centered_rect(55, 45, frame.area());
        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" Unsaved Draft Found ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2), // Message
                Constraint::Length(3), // Draft info
                Constraint::Min(3),    // Options
                Constraint::Length(1), // Instructions
            ])
            .margin(1)
            .split(inner);

        let message = Paragraph::new(Line::from(Span::styled(
            "A listing you started earlier was not finished.",
            Style::default().fg(Color::White),
        )))
        .wrap(Wrap { trim: true });
        frame.render_widget(message, chunks[0]);

        let info_lines = vec![
            Line::from(vec![
                Span::styled("Step:      ", Style::default().fg(Color::Gray)),
                Span::styled(
                    self.step_title.as_str(),
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ),
            ]),
            Line::from(vec![
                Span::styled("Completed: ", Style::default().fg(Color::Gray)),
                Span::styled(
                    format!("{} of {} steps", self.completed, self.total),
                    Style::default().fg(Color::White),
                ),
            ]),
            Line::from(vec![
                Span::styled("Saved:     ", Style::default().fg(Color::Gray)),
                Span::styled(self.saved_label(), Style::default().fg(Color::DarkGray)),
            ]),
        ];
        frame.render_widget(Paragraph::new(info_lines), chunks[1]);

        let option_lines: Vec<Line> = RestoreChoice::all()
            .iter()
            .map(|option| {
                let is_selected = *option == self.selection;
                let style = if is_selected {
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::White)
                };
                let prefix = if is_selected { "▶ " } else { "  " };

                Line::from(vec![
                    Span::raw(prefix),
                    Span::styled(
                        format!("[{}] ", option.key()),
                        Style::default().fg(Color::Yellow),
                    ),
                    Span::styled(option.label(), style),
                ])
            })
            .collect();
        frame.render_widget(Paragraph::new(option_lines), chunks[2]);

        let instructions = Line::from(vec![
            Span::styled("↑/↓", Style::default().fg(Color::Yellow)),
            Span::raw(" Navigate  "),
            Span::styled("Enter", Style::default().fg(Color::Yellow)),
            Span::raw(" Select"),
        ]);
        frame.render_widget(
            Paragraph::new(instructions).alignment(Alignment::Center),
            chunks[3],
        );
    }
}

impl Default for RestorePrompt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_choice_cycles() {
        assert_eq!(RestoreChoice::Restore.next(), RestoreChoice::StartFresh);
        assert_eq!(RestoreChoice::StartFresh.next(), RestoreChoice::Discard);
        assert_eq!(RestoreChoice::Discard.next(), RestoreChoice::Restore);

        assert_eq!(RestoreChoice::Restore.prev(), RestoreChoice::Discard);
        assert_eq!(RestoreChoice::Discard.prev(), RestoreChoice::StartFresh);
    }

    #[test]
    fn test_restore_choice_label_and_key() {
        assert_eq!(RestoreChoice::Restore.label(), "Restore draft");
        assert_eq!(RestoreChoice::StartFresh.key(), 'S');
        assert_eq!(RestoreChoice::from_key('d'), Some(RestoreChoice::Discard));
        assert_eq!(RestoreChoice::from_key('R'), Some(RestoreChoice::Restore));
        assert_eq!(RestoreChoice::from_key('x'), None);
    }

    #[test]
    fn test_restore_prompt_default_is_hidden() {
        let prompt = RestorePrompt::default();
        assert!(!prompt.visible);
        assert_eq!(prompt.selection, RestoreChoice::Restore);
        assert_eq!(prompt.total, 0);
    }

    #[test]
    fn test_restore_prompt_show_resets_selection() {
        let mut prompt = RestorePrompt::new();
        assert!(!prompt.visible);

        prompt.select_next();
        prompt.show("Financials".to_string(), 1, 4, None);

        assert!(prompt.visible);
        assert_eq!(prompt.selection, RestoreChoice::Restore);
        assert_eq!(prompt.saved_label(), "unknown");

        prompt.select_prev();
        assert_eq!(prompt.selection, RestoreChoice::Discard);

        prompt.hide();
        assert!(!prompt.visible);
    }
}
