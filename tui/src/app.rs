use std::error;

use chrono::Utc;
use client::{ChatMessage, Client};
use crossterm::event;
use crossterm::event::{Event, KeyCode, KeyEventKind};
use ratatui::{DefaultTerminal, Frame};

use crate::errors::TuiError;
use crate::widgets::chats::ChatsWidget;
use crate::widgets::register::RegistrationWidget;

pub type AppResult<T> = Result<T, Box<dyn error::Error>>;

#[derive(Debug, Clone, Copy, Default)]
enum AppState {
    Animation,

    #[default]
    Register,

    Chats,
}

pub struct App {
    pub running: bool,
    state: AppState,

    pub client: Client,

    input: String,
    input_mode: InputMode,
    character_index: usize,
    error: Option<TuiError>,

    adding_friend: bool,
    selected_chat: usize,
}

#[derive(Debug, Clone)]
pub(crate) enum InputMode {
    Normal,
    Insert,
}

impl App {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            running: true,
            state: AppState::default(),
            client,
            input: String::new(),
            input_mode: InputMode::Insert,
            character_index: 0,
            error: None,
            adding_friend: false,
            selected_chat: 0,
        }
    }

    fn move_cursor_left(&mut self) {
        let cursor_moved_left = self.character_index.saturating_sub(1);
        self.character_index = self.clamp_cursor(cursor_moved_left);
    }

    fn move_cursor_right(&mut self) {
        let cursor_moved_right = self.character_index.saturating_add(1);
        self.character_index = self.clamp_cursor(cursor_moved_right);
    }

    fn enter_char(&mut self, new_char: char) {
        if new_char.is_whitespace() || !new_char.is_ascii_alphanumeric() {
            return;
        }

        let index = self.byte_index();
        self.input.insert(index, new_char);
        self.move_cursor_right();
    }

    /// Returns the byte index based on the character position.
    ///
    /// Since each character in a string can contain multiple bytes, it's necessary to
    /// calculate the byte index based on the index of the character.
    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .map(|(i, _)| i)
            .nth(self.character_index)
            .unwrap_or(self.input.len())
    }

    fn delete_char(&mut self) {
        if self.character_index != 0 {
            let current_index = self.character_index;
            let from_left_to_current_index = current_index - 1;

            let before_char_to_delete = self.input.chars().take(from_left_to_current_index);
            let after_char_to_delete = self.input.chars().skip(current_index);

            self.input = before_char_to_delete.chain(after_char_to_delete).collect();
            self.move_cursor_left();
        }
    }

    fn clamp_cursor(&self, new_cursor_pos: usize) -> usize {
        new_cursor_pos.clamp(0, self.input.chars().count())
    }

    fn reset_cursor(&mut self) {
        self.character_index = 0;
    }

    /// Drains relayed chat envelopes pushed by the server and applies them: opens a
    /// friend session, appends a decrypted message, or tears a friend session down.
    fn handle_incoming(&mut self) {
        while let Some(message) = self.client.poll_incoming() {
            match message.msg_type.as_str() {
                "initial_message" => {
                    if let Err(e) = self.client.add_friend(message) {
                        self.error = Some(TuiError::from(e));
                    }
                }
                "chat" => {
                    if let Err(e) = self.client.decrypt_chat_message(message) {
                        self.error = Some(TuiError::from(e));
                    }
                }
                "close_chat" => self.client.remove_friend(message.from),
                _ => {}
            }
        }
    }

    async fn submit_message(&mut self) {
        match self.state {
            AppState::Register => {
                if self.input.is_empty() {
                    self.error = Some(TuiError::EmptyUsernameInput);
                    return;
                }

                self.client.set_username(self.input.clone());
                match self.client.register_user().await {
                    Ok(_) => {
                        self.state = AppState::Chats;
                        self.error = None;
                    }
                    Err(e) => {
                        self.error = Some(TuiError::from(e));
                    }
                }
            }
            AppState::Chats => {
                if self.input.is_empty() {
                    self.input.clear();
                    self.reset_cursor();
                    return;
                }

                if self.adding_friend {
                    if self.input == self.client.username {
                        self.error = Some(TuiError::InvalidUser("Cannot add yourself".to_string()));
                    } else {
                        match self.client.get_user_prekey_bundle(self.input.clone()).await {
                            Ok(_) => {
                                self.adding_friend = false;
                                self.error = None;
                            }
                            Err(e) => self.error = Some(TuiError::from(e)),
                        }
                    }
                } else {
                    let chats = self.client.get_open_chats();
                    if let Some(to) = chats.get(self.selected_chat).cloned() {
                        let message = ChatMessage::new(
                            "chat".to_string(),
                            to,
                            self.client.username.clone(),
                            self.input.clone(),
                            Utc::now(),
                        );
                        match self.client.send_chat_message(message).await {
                            Ok(_) => self.error = None,
                            Err(e) => self.error = Some(TuiError::from(e)),
                        }
                    }
                }
            }
            AppState::Animation => {}
        }
        self.input.clear();
        self.reset_cursor();
    }

    pub async fn run(&mut self, terminal: &mut DefaultTerminal) -> AppResult<()> {
        while self.running {
            self.handle_incoming();

            terminal.draw(|frame| self.draw(frame))?;

            if !event::poll(std::time::Duration::from_millis(100))? {
                continue;
            }
            if let Event::Key(key) = event::read()? {
                match self.input_mode {
                    InputMode::Normal if key.kind == KeyEventKind::Press => match key.code {
                        KeyCode::Char('i') => self.input_mode = InputMode::Insert,
                        KeyCode::Char('q') => self.quit(),
                        KeyCode::Char('a') if matches!(self.state, AppState::Chats) => {
                            self.adding_friend = true;
                            self.input_mode = InputMode::Insert;
                            self.error = None;
                        }
                        KeyCode::Char('j') if matches!(self.state, AppState::Chats) => {
                            let count = self.client.get_friends_count();
                            if count > 0 {
                                self.selected_chat = (self.selected_chat + 1) % count;
                            }
                        }
                        KeyCode::Char('k') if matches!(self.state, AppState::Chats) => {
                            let count = self.client.get_friends_count();
                            if count > 0 {
                                self.selected_chat = (self.selected_chat + count - 1) % count;
                            }
                        }
                        _ => {}
                    },

                    InputMode::Insert if key.kind == KeyEventKind::Press => match key.code {
                        KeyCode::Char(to_insert) => self.enter_char(to_insert),
                        KeyCode::Enter => self.submit_message().await,
                        KeyCode::Backspace => self.delete_char(),
                        KeyCode::Left => self.move_cursor_left(),
                        KeyCode::Right => self.move_cursor_right(),
                        KeyCode::Esc => self.input_mode = InputMode::Normal,
                        _ => {}
                    },

                    _ => {}
                }
            }
        }

        Ok(())
    }

    fn draw(&mut self, frame: &mut Frame) {
        match self.state {
            AppState::Animation => {
                // TODO: splash animation, never reached from the default Register start state
            }
            AppState::Register => {
                let mut error_message = String::new();
                if let Some(error) = &self.error {
                    error_message = error.to_string();
                }
                frame.render_widget(
                    RegistrationWidget::new(
                        self.input.clone(),
                        error_message,
                        self.character_index,
                        self.input_mode.clone(),
                    ),
                    frame.area(),
                );
            }
            AppState::Chats => {
                let chats = self.client.get_open_chats();
                let history = chats
                    .get(self.selected_chat)
                    .and_then(|c| self.client.get_chat_history(c))
                    .unwrap_or_default();
                frame.render_widget(
                    ChatsWidget::new(
                        self.client.username.clone(),
                        self.input.clone(),
                        self.character_index,
                        self.input_mode.clone(),
                        self.adding_friend,
                        chats,
                        self.selected_chat,
                        history,
                    ),
                    frame.area(),
                );
            }
        }
    }

    pub fn quit(&mut self) {
        self.running = false;
    }
}
