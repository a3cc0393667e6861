pub mod buffer;
pub mod engine;
pub mod player;
pub mod tags;

pub use buffer::{load_track, AudioBuffer, LoadState};
pub use engine::{PlaybackPhase, SegmentEngine};
pub use player::{PlayerEvent, SegmentPlayer};

use thiserror::Error;

/// Settings for the part-preview loop. `parts` and `fade_seconds` are fixed
/// for the lifetime of the player; `section_seconds` can be changed live and
/// applies from the next part onward.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub parts: u32,
    pub section_seconds: f32,
    pub fade_seconds: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            parts: 6,
            section_seconds: 5.0,
            fade_seconds: 0.5, // must be less than half the section time
        }
    }
}

impl PlayerConfig {
    /// Rejects configs the player cannot run with at all. A fade that eats
    /// the whole section is tolerated later (sustain clamps to zero), so it
    /// is only warned about here.
    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.parts == 0 {
            return Err(PlayerError::InvalidConfig(
                "parts must be at least 1".into(),
            ));
        }
        if !(self.section_seconds > 0.0) {
            return Err(PlayerError::InvalidConfig(format!(
                "section_seconds must be positive (got {})",
                self.section_seconds
            )));
        }
        if self.fade_seconds < 0.0 {
            return Err(PlayerError::InvalidConfig(format!(
                "fade_seconds must not be negative (got {})",
                self.fade_seconds
            )));
        }
        if 2.0 * self.fade_seconds >= self.section_seconds {
            tracing::warn!(
                fade = self.fade_seconds,
                section = self.section_seconds,
                "fade is at least half the section time; crossfades will touch"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("invalid playback config: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("no audio output device available")]
    NoOutputDevice(#[from] rodio::StreamError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PlayerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_parts_is_rejected() {
        let config = PlayerConfig {
            parts: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PlayerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn nonpositive_section_is_rejected() {
        let config = PlayerConfig {
            section_seconds: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_fade_is_tolerated() {
        // Degraded crossfades, but still a runnable config.
        let config = PlayerConfig {
            section_seconds: 1.0,
            fade_seconds: 0.8,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
