use super::buffer::{AudioBuffer, LoadState};
use super::engine::{OutputChannel, SegmentEngine};
use super::{PlayerConfig, PlayerError};
use anyhow::Result;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Scheduler tick for the preview loop. Fades are sampled once per tick.
const TICK: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    TrackStarted,
    LoadFailed(String),
}

/// Sink plus the buffer bound to it. Torn down as a unit so stopping
/// releases the decoded samples synchronously.
struct ActiveOutput {
    sink: Option<Sink>,
    buffer: Arc<AudioBuffer>,
}

struct PlayerShared {
    /// Bumped on every stop/play. A driver loop whose snapshot goes stale
    /// exits at its next tick without touching the output again.
    generation: AtomicU64,
    active: Mutex<Option<ActiveOutput>>,
    holding: AtomicBool,
    full_play: AtomicBool,
    section_seconds: Mutex<f32>,
}

impl PlayerShared {
    /// Invalidates any running driver loop and tears the output down before
    /// returning: the sink is stopped and the decoded buffer dropped under
    /// the lock, so the caller may immediately reuse or discard either.
    fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut active = self.active.lock().unwrap();
        if let Some(output) = active.take() {
            if let Some(sink) = output.sink {
                sink.pause();
                sink.stop();
            }
            // ActiveOutput drops here, freeing the decoded samples. Skipping
            // this would leak one full track per preview.
        }
        self.holding.store(false, Ordering::Relaxed);
    }
}

/// Plays a track as a loop of crossfaded part previews on a rodio sink.
///
/// The state machine itself lives in [`SegmentEngine`]; this type owns the
/// output device, spawns one driver task per `play` call and guarantees that
/// `stop` strictly happens-before any later `play` takes effect.
pub struct SegmentPlayer {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
    config: PlayerConfig,
    shared: Arc<PlayerShared>,
    hold_down: Arc<AtomicBool>,
    event_sender: Option<mpsc::UnboundedSender<PlayerEvent>>,
}

impl SegmentPlayer {
    pub fn new(config: PlayerConfig) -> Result<Self, PlayerError> {
        config.validate()?;
        let (stream, stream_handle) = OutputStream::try_default()?;

        Ok(Self {
            _stream: stream,
            stream_handle,
            shared: Arc::new(PlayerShared {
                generation: AtomicU64::new(0),
                active: Mutex::new(None),
                holding: AtomicBool::new(false),
                full_play: AtomicBool::new(false),
                section_seconds: Mutex::new(config.section_seconds),
            }),
            config,
            hold_down: Arc::new(AtomicBool::new(false)),
            event_sender: None,
        })
    }

    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<PlayerEvent>) {
        self.event_sender = Some(sender);
    }

    /// Flag the input layer writes while the hold key is physically down.
    pub fn hold_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.hold_down)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.active.lock().unwrap().is_some()
    }

    pub fn is_holding(&self) -> bool {
        self.shared.holding.load(Ordering::Relaxed)
    }

    pub fn full_play(&self) -> bool {
        self.shared.full_play.load(Ordering::Relaxed)
    }

    /// Takes effect at the next part boundary, never mid-fade.
    pub fn set_full_play(&self, enabled: bool) {
        self.shared.full_play.store(enabled, Ordering::Relaxed);
    }

    pub fn section_seconds(&self) -> f32 {
        *self.shared.section_seconds.lock().unwrap()
    }

    /// Takes effect on the next part iteration.
    pub fn set_section_seconds(&self, seconds: f32) {
        *self.shared.section_seconds.lock().unwrap() = seconds.max(0.1);
    }

    /// Starts previewing a track being decoded. Any playback already running
    /// is stopped (and its buffer released) before the new loop may bind.
    pub fn play(&self, load: watch::Receiver<LoadState>) {
        self.stop();
        let generation = self.shared.generation.load(Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let handle = self.stream_handle.clone();
        let config = self.config.clone();
        let hold_down = Arc::clone(&self.hold_down);
        let events = self.event_sender.clone();

        tokio::spawn(drive_playback(
            shared, handle, config, hold_down, events, load, generation,
        ));
    }

    /// Pauses output, cancels the driver loop and drops the bound buffer
    /// before returning. Idempotent; a no-op when nothing plays.
    pub fn stop(&self) {
        self.shared.teardown();
    }
}

impl Drop for SegmentPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn drive_playback(
    shared: Arc<PlayerShared>,
    handle: OutputStreamHandle,
    config: PlayerConfig,
    hold_down: Arc<AtomicBool>,
    events: Option<mpsc::UnboundedSender<PlayerEvent>>,
    mut load: watch::Receiver<LoadState>,
    generation: u64,
) {
    // Wait until the decoder reports the buffer ready; samples are never
    // touched before that.
    let state = match load.wait_for(|s| !s.is_loading()).await {
        Ok(state) => state.clone(),
        Err(_) => return,
    };

    if shared.generation.load(Ordering::SeqCst) != generation {
        return;
    }

    let buffer = match state {
        LoadState::Loaded(buffer) => buffer,
        LoadState::Failed(reason) => {
            if let Some(tx) = &events {
                let _ = tx.send(PlayerEvent::LoadFailed(reason));
            }
            return;
        }
        LoadState::Loading => unreachable!("wait_for returned a loading state"),
    };

    let duration_secs = buffer.duration_secs();
    if buffer.is_empty() || duration_secs <= 0.0 {
        warn!("{}", PlayerError::InvalidArgument("empty audio buffer"));
        if let Some(tx) = &events {
            let _ = tx.send(PlayerEvent::LoadFailed("empty audio buffer".into()));
        }
        return;
    }

    {
        let mut active = shared.active.lock().unwrap();
        if shared.generation.load(Ordering::SeqCst) != generation {
            return; // superseded while decoding; buffer drops right here
        }
        *active = Some(ActiveOutput { sink: None, buffer });
    }

    if let Some(tx) = &events {
        let _ = tx.send(PlayerEvent::TrackStarted);
    }
    debug!(duration_secs, "preview loop starting");

    let mut engine = SegmentEngine::new(&config, duration_secs);
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    loop {
        interval.tick().await;
        let now = Instant::now();
        let dt = (now - last_tick).as_secs_f32();
        last_tick = now;

        let mut active = shared.active.lock().unwrap();
        // Checked after every suspension point: a stale loop must never
        // touch a newer playback's sink or volume.
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let Some(output) = active.as_mut() else {
            return;
        };

        engine.set_section_seconds(*shared.section_seconds.lock().unwrap());
        engine.set_full_play(shared.full_play.load(Ordering::Relaxed));

        let mut channel = SinkChannel {
            handle: &handle,
            sink: &mut output.sink,
            buffer: &output.buffer,
        };
        if let Err(e) = engine.advance(dt, hold_down.load(Ordering::Relaxed), &mut channel) {
            error!("audio output failed, stopping preview: {e:#}");
            engine.reset();
            active.take();
            shared.holding.store(false, Ordering::Relaxed);
            return;
        }

        shared.holding.store(engine.is_holding(), Ordering::Relaxed);
    }
}

/// Real [`OutputChannel`]: each part start replaces the sink with a fresh one
/// appending a cursor into the shared buffer at the right offset.
struct SinkChannel<'a> {
    handle: &'a OutputStreamHandle,
    sink: &'a mut Option<Sink>,
    buffer: &'a Arc<AudioBuffer>,
}

impl OutputChannel for SinkChannel<'_> {
    fn start_at(&mut self, position_secs: f32, looping: bool) -> Result<()> {
        if let Some(old) = self.sink.take() {
            old.stop();
        }
        let sink = Sink::try_new(self.handle)?;
        sink.set_volume(0.0);
        sink.append(self.buffer.source_at(position_secs, looping));
        sink.play();
        *self.sink = Some(sink);
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        if let Some(sink) = self.sink.as_ref() {
            sink.set_volume(volume);
        }
        Ok(())
    }
}

// SegmentPlayer itself needs a real output device; the teardown contract is
// exercised on the shared state it delegates to.
#[cfg(test)]
mod tests {
    use super::*;

    fn shared_with_buffer() -> (Arc<PlayerShared>, std::sync::Weak<AudioBuffer>) {
        let buffer = Arc::new(AudioBuffer::new(vec![0i16; 200], 2, 100));
        let weak = Arc::downgrade(&buffer);
        let shared = Arc::new(PlayerShared {
            generation: AtomicU64::new(0),
            active: Mutex::new(Some(ActiveOutput { sink: None, buffer })),
            holding: AtomicBool::new(true),
            full_play: AtomicBool::new(false),
            section_seconds: Mutex::new(5.0),
        });
        (shared, weak)
    }

    #[test]
    fn teardown_releases_the_buffer_synchronously() {
        let (shared, weak) = shared_with_buffer();
        assert!(weak.upgrade().is_some());

        shared.teardown();

        assert!(shared.active.lock().unwrap().is_none());
        assert!(weak.upgrade().is_none(), "decoded samples must be freed");
        assert!(!shared.holding.load(Ordering::Relaxed));
    }

    #[test]
    fn teardown_invalidates_a_driver_generation_snapshot() {
        let (shared, _weak) = shared_with_buffer();
        let snapshot = shared.generation.load(Ordering::SeqCst);

        shared.teardown();

        // A loop holding `snapshot` sees the mismatch at its next tick and
        // exits without touching the output.
        assert_ne!(shared.generation.load(Ordering::SeqCst), snapshot);
    }

    #[test]
    fn teardown_is_idempotent() {
        let (shared, _weak) = shared_with_buffer();
        shared.teardown();
        shared.teardown();
        assert!(shared.active.lock().unwrap().is_none());
    }
}
