use anyhow::{bail, Context, Result};
use rodio::{Decoder, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error};

/// A track decoded fully into memory so the preview loop can jump to any
/// part boundary without re-decoding. Single-owner resource: the player
/// drops it on stop or replacement, otherwise back-to-back previews pile
/// up tens of megabytes each.
pub struct AudioBuffer {
    samples: Vec<i16>,
    channels: u16,
    sample_rate: u32,
    duration_secs: f32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<i16>, channels: u16, sample_rate: u32) -> Self {
        let frames = samples.len() / channels.max(1) as usize;
        let duration_secs = frames as f32 / sample_rate.max(1) as f32;
        Self {
            samples,
            channels,
            sample_rate,
            duration_secs,
        }
    }

    pub fn duration_secs(&self) -> f32 {
        self.duration_secs
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Source starting at `position_secs`, optionally looping the whole
    /// track. Positions past the end clamp to the end (silence).
    pub fn source_at(self: &Arc<Self>, position_secs: f32, looping: bool) -> BufferSource {
        let frame = (position_secs.max(0.0) * self.sample_rate as f32) as usize;
        let index = (frame * self.channels as usize).min(self.samples.len());
        BufferSource {
            buffer: Arc::clone(self),
            pos: index,
            looping,
        }
    }
}

/// Zero-copy playback cursor over a shared [`AudioBuffer`].
pub struct BufferSource {
    buffer: Arc<AudioBuffer>,
    pos: usize,
    looping: bool,
}

impl Iterator for BufferSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if self.pos >= self.buffer.samples.len() {
            if !self.looping || self.buffer.samples.is_empty() {
                return None;
            }
            self.pos = 0;
        }
        let sample = self.buffer.samples[self.pos];
        self.pos += 1;
        Some(sample)
    }
}

impl Source for BufferSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.buffer.channels
    }

    fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        if self.looping {
            None
        } else {
            let remaining = self.buffer.samples.len() - self.pos.min(self.buffer.samples.len());
            let frames = remaining / self.buffer.channels.max(1) as usize;
            Some(Duration::from_secs_f64(
                frames as f64 / self.buffer.sample_rate.max(1) as f64,
            ))
        }
    }
}

/// Observable decode status for a track being loaded in the background.
#[derive(Clone)]
pub enum LoadState {
    Loading,
    Loaded(Arc<AudioBuffer>),
    Failed(String),
}

impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }
}

/// Kicks off a full decode off the runtime and returns a watch handle the
/// player polls for `Loaded` before it touches any samples.
pub fn load_track(path: PathBuf) -> watch::Receiver<LoadState> {
    let (tx, rx) = watch::channel(LoadState::Loading);

    tokio::spawn(async move {
        let display_line = path.display().to_string();
        let result = tokio::task::spawn_blocking(move || decode_file(&path)).await;

        let state = match result {
            Ok(Ok(buffer)) => {
                debug!(track = %display_line, duration = buffer.duration_secs(), "track decoded");
                LoadState::Loaded(Arc::new(buffer))
            }
            Ok(Err(e)) => {
                error!(track = %display_line, "decode failed: {e:#}");
                LoadState::Failed(format!("{e:#}"))
            }
            Err(e) => {
                error!(track = %display_line, "decode task panicked: {e}");
                LoadState::Failed(e.to_string())
            }
        };
        let _ = tx.send(state);
    });

    rx
}

fn decode_file(path: &Path) -> Result<AudioBuffer> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let decoder = Decoder::new(BufReader::new(file))
        .with_context(|| format!("unsupported or corrupt audio file {}", path.display()))?;

    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<i16> = decoder.collect();

    if samples.is_empty() {
        bail!("no audio samples decoded from {}", path.display());
    }

    Ok(AudioBuffer::new(samples, channels, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_buffer(frames: usize) -> Arc<AudioBuffer> {
        // 100 Hz sample rate keeps the position math easy to eyeball.
        let samples: Vec<i16> = (0..frames * 2).map(|i| i as i16).collect();
        Arc::new(AudioBuffer::new(samples, 2, 100))
    }

    #[test]
    fn duration_from_frames_and_rate() {
        let buffer = stereo_buffer(250);
        assert!((buffer.duration_secs() - 2.5).abs() < 1e-6);
    }

    #[test]
    fn source_starts_at_requested_position() {
        let buffer = stereo_buffer(100);
        // 0.5 s at 100 Hz stereo = frame 50 = sample index 100.
        let mut source = buffer.source_at(0.5, false);
        assert_eq!(source.next(), Some(100));
    }

    #[test]
    fn source_past_end_is_silent() {
        let buffer = stereo_buffer(10);
        let mut source = buffer.source_at(99.0, false);
        assert_eq!(source.next(), None);
    }

    #[test]
    fn looping_source_wraps_to_start() {
        let buffer = stereo_buffer(2);
        let looped: Vec<i16> = buffer.source_at(0.0, true).take(6).collect();
        assert_eq!(looped, vec![0, 1, 2, 3, 0, 1]);
    }
}
