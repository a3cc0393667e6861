use crate::config::Config;
use anyhow::{bail, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Quit,
    Tick,

    /// File the current song into bucket `n` and advance.
    FileTo(usize),
    Skip,
    Undo,
    ToggleFullPlay,

    SectionLonger,
    SectionShorter,
    ToggleInstructions,
}

/// Key-to-action table resolved from the config's key names.
#[derive(Debug, Clone)]
pub struct KeyBindings {
    pub buckets: Vec<(KeyCode, usize)>,
    pub skip: KeyCode,
    pub full_play: KeyCode,
    pub hold: KeyCode,
    pub undo: KeyCode,
}

impl KeyBindings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let parse = |name: &str| -> Result<KeyCode> {
            match parse_key(name) {
                Some(code) => Ok(code),
                None => bail!("unknown key name {name:?} in config"),
            }
        };

        let mut buckets = Vec::new();
        for (index, bucket) in config.buckets.iter().enumerate() {
            buckets.push((parse(&bucket.key)?, index));
        }

        Ok(Self {
            buckets,
            skip: parse(&config.keys.skip)?,
            full_play: parse(&config.keys.full_play)?,
            hold: parse(&config.keys.hold)?,
            undo: parse(&config.keys.undo)?,
        })
    }
}

/// Key names accepted in the config file: arrows, "space", "enter",
/// "backspace", "esc", "tab", "f1".."f12", or any single character.
pub fn parse_key(name: &str) -> Option<KeyCode> {
    let lower = name.trim().to_ascii_lowercase();
    let code = match lower.as_str() {
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "space" => KeyCode::Char(' '),
        "enter" | "return" => KeyCode::Enter,
        "backspace" => KeyCode::Backspace,
        "esc" | "escape" => KeyCode::Esc,
        "tab" => KeyCode::Tab,
        _ => {
            if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                if (1..=12).contains(&n) {
                    return Some(KeyCode::F(n));
                }
                return None;
            }
            let mut chars = lower.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                _ => return None,
            }
        }
    };
    Some(code)
}

pub struct EventHandler {
    event_sender: mpsc::UnboundedSender<AppEvent>,
    event_receiver: mpsc::UnboundedReceiver<AppEvent>,
}

impl EventHandler {
    pub fn new() -> Self {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        Self {
            event_sender,
            event_receiver,
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<AppEvent> {
        self.event_sender.clone()
    }

    pub async fn next_event(&mut self) -> Option<AppEvent> {
        self.event_receiver.recv().await
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal input loop. The hold key writes straight into `hold_flag` on
/// press/release so the playback tick sees the physical key state; every
/// other binding becomes a discrete [`AppEvent`].
///
/// `release_supported` is false on terminals without the keyboard
/// enhancement protocol, where release events never arrive; the hold key
/// degrades to a toggle there instead of latching forever.
pub async fn listen(
    bindings: KeyBindings,
    hold_flag: Arc<AtomicBool>,
    release_supported: bool,
    sender: mpsc::UnboundedSender<AppEvent>,
) -> Result<()> {
    loop {
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                match key.kind {
                    KeyEventKind::Press => {
                        if key.code == bindings.hold {
                            if release_supported {
                                hold_flag.store(true, Ordering::Relaxed);
                            } else {
                                hold_flag.fetch_xor(true, Ordering::Relaxed);
                            }
                        } else if let Some(app_event) = key_to_event(&bindings, key.code) {
                            let _ = sender.send(app_event);
                        }
                    }
                    KeyEventKind::Release => {
                        if key.code == bindings.hold && release_supported {
                            hold_flag.store(false, Ordering::Relaxed);
                        }
                    }
                    // Key repeat carries no new information for us.
                    KeyEventKind::Repeat => {}
                }
            }
        }

        let _ = sender.send(AppEvent::Tick);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn key_to_event(bindings: &KeyBindings, code: KeyCode) -> Option<AppEvent> {
    for (key, index) in &bindings.buckets {
        if code == *key {
            return Some(AppEvent::FileTo(*index));
        }
    }

    if code == bindings.skip {
        return Some(AppEvent::Skip);
    }
    if code == bindings.full_play {
        return Some(AppEvent::ToggleFullPlay);
    }
    if code == bindings.undo {
        return Some(AppEvent::Undo);
    }

    match code {
        KeyCode::Char('+') | KeyCode::Char('=') => Some(AppEvent::SectionLonger),
        KeyCode::Char('-') => Some(AppEvent::SectionShorter),
        KeyCode::F(1) => Some(AppEvent::ToggleInstructions),
        KeyCode::Char('q') | KeyCode::Esc => Some(AppEvent::Quit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_understands_names_chars_and_function_keys() {
        assert_eq!(parse_key("right"), Some(KeyCode::Right));
        assert_eq!(parse_key("Space"), Some(KeyCode::Char(' ')));
        assert_eq!(parse_key("a"), Some(KeyCode::Char('a')));
        assert_eq!(parse_key("F1"), Some(KeyCode::F(1)));
        assert_eq!(parse_key("f12"), Some(KeyCode::F(12)));
        assert_eq!(parse_key("f13"), None);
        assert_eq!(parse_key("ctrl+x"), None);
        assert_eq!(parse_key(""), None);
    }

    #[test]
    fn default_config_bindings_resolve() {
        let bindings = KeyBindings::from_config(&Config::default()).unwrap();
        assert_eq!(bindings.buckets.len(), 2);
        assert_eq!(bindings.buckets[0].0, KeyCode::Right);
        assert_eq!(bindings.hold, KeyCode::Char(' '));
    }

    #[test]
    fn bucket_keys_shadow_the_builtin_bindings() {
        let mut config = Config::default();
        config.buckets[0].key = "q".to_string();
        let bindings = KeyBindings::from_config(&config).unwrap();

        assert_eq!(
            key_to_event(&bindings, KeyCode::Char('q')),
            Some(AppEvent::FileTo(0))
        );
        assert_eq!(key_to_event(&bindings, KeyCode::Esc), Some(AppEvent::Quit));
    }

    #[test]
    fn unknown_key_name_is_rejected() {
        let mut config = Config::default();
        config.keys.hold = "superkey".to_string();
        assert!(KeyBindings::from_config(&config).is_err());
    }
}
