//! Single-line text input for TUI forms

use crossterm::event::KeyCode;
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

/// What a key press did to a [`TextInput`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputChange {
    /// Key not handled by the input
    Ignored,
    /// Cursor moved, value unchanged
    Moved,
    /// Value changed
    Edited,
}

/// A single-line text field with a cursor.
///
/// The cursor is a character index, so multi-byte input edits cleanly.
#[derive(Debug, Clone)]
pub struct TextInput {
    pub label: &'static str,
    value: String,
    cursor_pos: usize,
    placeholder: &'static str,
    max_length: usize,
    digits_only: bool,
}

impl TextInput {
    pub fn new(label: &'static str, placeholder: &'static str, max_length: usize) -> Self {
        Self {
            label,
            value: String::new(),
            cursor_pos: 0,
            placeholder,
            max_length,
            digits_only: false,
        }
    }

    /// Only accept ASCII digits
    pub fn digits_only(mut self) -> Self {
        self.digits_only = true;
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.set_value(value);
        self
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn cursor_pos(&self) -> usize {
        self.cursor_pos
    }

    pub fn set_value(&mut self, value: &str) {
        self.value = value.chars().take(self.max_length).collect();
        self.cursor_pos = self.char_len();
    }

    fn char_len(&self) -> usize {
        self.value.chars().count()
    }

    fn byte_offset(&self, char_pos: usize) -> usize {
        self.value
            .char_indices()
            .nth(char_pos)
            .map_or(self.value.len(), |(i, _)| i)
    }

    fn accepts(&self, c: char) -> bool {
        if c.is_control() {
            return false;
        }
        !self.digits_only || c.is_ascii_digit()
    }

    /// Apply a key press
    pub fn handle_key(&mut self, key: KeyCode) -> InputChange {
        match key {
            KeyCode::Char(c) => {
                if self.accepts(c) && self.char_len() < self.max_length {
                    let at = self.byte_offset(self.cursor_pos);
                    self.value.insert(at, c);
                    self.cursor_pos += 1;
                    InputChange::Edited
                } else {
                    InputChange::Moved
                }
            }
            KeyCode::Backspace => {
                if self.cursor_pos == 0 {
                    return InputChange::Moved;
                }
                self.cursor_pos -= 1;
                let at = self.byte_offset(self.cursor_pos);
                self.value.remove(at);
                InputChange::Edited
            }
            KeyCode::Delete => {
                if self.cursor_pos >= self.char_len() {
                    return InputChange::Moved;
                }
                let at = self.byte_offset(self.cursor_pos);
                self.value.remove(at);
                InputChange::Edited
            }
            KeyCode::Left => {
                self.cursor_pos = self.cursor_pos.saturating_sub(1);
                InputChange::Moved
            }
            KeyCode::Right => {
                self.cursor_pos = (self.cursor_pos + 1).min(self.char_len());
                InputChange::Moved
            }
            KeyCode::Home => {
                self.cursor_pos = 0;
                InputChange::Moved
            }
            KeyCode::End => {
                self.cursor_pos = self.char_len();
                InputChange::Moved
            }
            _ => InputChange::Ignored,
        }
    }

    /// Render the field
    pub fn render(&self, frame: &mut Frame, area: Rect, focused: bool) {
        let border_color = if focused { Color::Cyan } else { Color::Gray };

        let line = if self.value.is_empty() && !focused {
            Line::from(Span::styled(
                self.placeholder,
                Style::default().fg(Color::DarkGray),
            ))
        } else if focused {
            let at = self.byte_offset(self.cursor_pos);
            let (before, after) = self.value.split_at(at);
            let mut rest = after.chars();
            let under_cursor = rest.next().map_or(" ".to_string(), String::from);
            Line::from(vec![
                Span::raw(before),
                Span::styled(
                    under_cursor,
                    Style::default().add_modifier(Modifier::REVERSED),
                ),
                Span::raw(rest.as_str()),
            ])
        } else {
            Line::from(Span::raw(self.value.as_str()))
        };

        let block = Block::default()
            .title(format!(" {} ", self.label))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border_color));

        frame.render_widget(Paragraph::new(line).block(block), area);
    }
}
