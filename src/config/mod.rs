// Configuration for songsift: where the unsorted songs live, which key files
// a song into which bucket, and how the part preview behaves.
// Loads from config.toml with sensible defaults when missing; a broken file
// falls back to defaults with a warning instead of refusing to start.

use crate::audio::PlayerConfig;
use crate::library::Bucket;
use anyhow::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source_directory: PathBuf,
    pub randomize_order: bool,
    pub playback: PlaybackSettings,
    pub keys: KeySettings,
    pub buckets: Vec<BucketSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// How many evenly spaced windows of the track to preview.
    pub parts: u32,
    pub section_seconds: f32,
    /// Must stay below half the section time or the crossfades touch.
    pub fade_seconds: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySettings {
    pub skip: String,
    pub full_play: String,
    pub hold: String,
    pub undo: String,
}

/// One destination folder and the key that files the current song into it.
/// Relative folders resolve against the source directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSettings {
    pub key: String,
    pub folder: PathBuf,
    pub relative: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_directory: dirs::audio_dir().unwrap_or_else(|| PathBuf::from(".")),
            randomize_order: false,
            playback: PlaybackSettings {
                parts: 6,
                section_seconds: 5.0,
                fade_seconds: 0.5,
            },
            keys: KeySettings {
                skip: "down".to_string(),
                full_play: "up".to_string(),
                hold: "space".to_string(),
                undo: "backspace".to_string(),
            },
            buckets: vec![
                BucketSettings {
                    key: "right".to_string(),
                    folder: PathBuf::from("Approved"),
                    relative: true,
                },
                BucketSettings {
                    key: "left".to_string(),
                    folder: PathBuf::from("Rejected"),
                    relative: true,
                },
            ],
        }
    }
}

impl Config {
    /// Loads the config, writing defaults on first run. A file that exists
    /// but will not parse degrades to defaults rather than aborting.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("could not load config, falling back to defaults: {e:#}");
                Config::default()
            }
        }
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(config_path, content)?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("songsift");

        Ok(config_dir.join("config.toml"))
    }

    pub fn player_config(&self) -> PlayerConfig {
        PlayerConfig {
            parts: self.playback.parts,
            section_seconds: self.playback.section_seconds,
            fade_seconds: self.playback.fade_seconds,
        }
    }

    /// Bucket folders resolved to absolute paths, labelled by folder name.
    pub fn resolved_buckets(&self) -> Vec<Bucket> {
        self.buckets
            .iter()
            .map(|bucket| {
                let dir = if bucket.relative {
                    self.source_directory.join(&bucket.folder)
                } else {
                    bucket.folder.clone()
                };
                let label = bucket
                    .folder
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| bucket.folder.display().to_string());
                Bucket { label, dir }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();

        assert_eq!(back.buckets.len(), config.buckets.len());
        assert_eq!(back.keys.hold, "space");
        assert_eq!(back.playback.parts, 6);
    }

    #[test]
    fn default_playback_settings_are_a_valid_player_config() {
        assert!(Config::default().player_config().validate().is_ok());
    }

    #[test]
    fn relative_buckets_resolve_against_the_source_directory() {
        let mut config = Config::default();
        config.source_directory = PathBuf::from("/music/incoming");
        config.buckets.push(BucketSettings {
            key: "x".to_string(),
            folder: PathBuf::from("/elsewhere/Keep"),
            relative: false,
        });

        let buckets = config.resolved_buckets();
        assert_eq!(buckets[0].dir, PathBuf::from("/music/incoming/Approved"));
        assert_eq!(buckets[0].label, "Approved");
        assert_eq!(buckets[2].dir, PathBuf::from("/elsewhere/Keep"));
        assert_eq!(buckets[2].label, "Keep");
    }
}
