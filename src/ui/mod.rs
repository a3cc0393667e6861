// Terminal plumbing for the sorting interface.

mod app;
pub mod events;

pub use app::App;
pub use events::{AppEvent, EventHandler, KeyBindings};

use anyhow::Result;
use crossterm::{
    cursor,
    event::{KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;

pub struct TerminalManager {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    /// Whether the terminal delivers key release events (kitty keyboard
    /// protocol). Hold-to-listen needs this; without it the hold key is a
    /// toggle.
    key_release_supported: bool,
    _cleanup_guard: CleanupGuard,
}

struct CleanupGuard;

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();

        let mut stdout = io::stdout();
        let _ = execute!(stdout, PopKeyboardEnhancementFlags, LeaveAlternateScreen);
        let _ = execute!(stdout, cursor::Show);
    }
}

impl TerminalManager {
    pub fn new() -> Result<Self> {
        // Ensure clean terminal state first
        let _ = disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = execute!(stdout, LeaveAlternateScreen);

        let key_release_supported =
            crossterm::terminal::supports_keyboard_enhancement().unwrap_or(false);

        enable_raw_mode()?;
        execute!(stdout, EnterAlternateScreen)?;
        if key_release_supported {
            execute!(
                stdout,
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
            )?;
        }

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        Ok(Self {
            terminal,
            key_release_supported,
            _cleanup_guard: CleanupGuard,
        })
    }

    pub fn key_release_supported(&self) -> bool {
        self.key_release_supported
    }

    pub fn draw<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut ratatui::Frame),
    {
        self.terminal.draw(f)?;
        Ok(())
    }
}

impl Drop for TerminalManager {
    fn drop(&mut self) {
        let _ = self.terminal.clear();
        let _ = self.terminal.show_cursor();

        // CleanupGuard handles raw mode and the alternate screen.
    }
}
