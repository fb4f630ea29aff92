use client::ChatMessage;
use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Widget},
};

use crate::app::InputMode;

pub(crate) struct ChatsWidget {
    username: String,
    input: String,
    character_index: usize,
    input_mode: InputMode,
    adding_friend: bool,
    chats: Vec<String>,
    selected_chat: usize,
    history: Vec<ChatMessage>,
}

impl ChatsWidget {
    pub fn new(
        username: String,
        input: String,
        character_index: usize,
        input_mode: InputMode,
        adding_friend: bool,
        chats: Vec<String>,
        selected_chat: usize,
        history: Vec<ChatMessage>,
    ) -> Self {
        Self {
            username,
            input,
            character_index,
            input_mode,
            adding_friend,
            chats,
            selected_chat,
            history,
        }
    }
}

impl Widget for ChatsWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let outer = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(area);

        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
            .split(outer[0]);

        let chat_list: Vec<ListItem> = self
            .chats
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let style = if i == self.selected_chat {
                    Style::default().add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(name.clone()).style(style)
            })
            .collect();
        List::new(chat_list)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Chats ")
                    .title_alignment(Alignment::Center),
            )
            .render(main[0], buf);

        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(main[1]);

        let active_chat = self.chats.get(self.selected_chat).cloned().unwrap_or_default();
        let messages: Vec<ListItem> = self
            .history
            .iter()
            .map(|msg| {
                let who = if msg.from == self.username { "me" } else { msg.from.as_str() };
                ListItem::new(format!("{}: {}", who, msg.text))
            })
            .collect();
        List::new(messages)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" {} ", active_chat))
                    .title_alignment(Alignment::Center),
            )
            .render(right[0], buf);

        let (before_cursor, after_cursor) = self.input.split_at(self.character_index.min(self.input.len()));
        let input_with_cursor = Line::from(vec![
            Span::raw(before_cursor),
            Span::styled("|", Style::default().fg(Color::Gray)),
            Span::raw(after_cursor),
        ]);
        let input_title = if self.adding_friend { "Add friend (username)" } else { "Message" };
        Paragraph::new(input_with_cursor)
            .block(Block::default().borders(Borders::ALL).title(input_title))
            .render(right[1], buf);

        let bottom_text = match self.input_mode {
            InputMode::Normal => Line::from(vec![
                Span::styled(" NORMAL ", Style::default().fg(Color::Black).bg(Color::Rgb(130, 170, 255))),
                Span::styled(
                    " | 'a' add a friend, 'j'/'k' select chat, 'i' insert, 'q' quit",
                    Style::default().fg(Color::White),
                ),
            ]),
            InputMode::Insert => Line::from(vec![
                Span::styled(" INSERT ", Style::default().fg(Color::Black).bg(Color::Rgb(195, 232, 141))),
                Span::styled(" | 'Enter' send, 'Esc' normal mode", Style::default().fg(Color::White)),
            ]),
        };
        Paragraph::new(bottom_text).render(outer[1], buf);
    }
}
