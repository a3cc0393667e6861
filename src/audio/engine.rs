use super::PlayerConfig;
use anyhow::Result;
use tracing::warn;

/// Outbound surface of the playback state machine. The real implementation
/// drives a rodio sink; tests substitute a recorder. Injected per call so the
/// engine itself stays a plain value type.
pub trait OutputChannel {
    /// Seek the playhead to `position_secs` and start output, silent.
    fn start_at(&mut self, position_secs: f32, looping: bool) -> Result<()>;
    fn set_volume(&mut self, volume: f32) -> Result<()>;
}

/// Where the preview loop currently is. Owned exclusively by the engine;
/// observable read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Stopped,
    FadingIn,
    Sustaining,
    Holding,
    FadingOut,
    FullPlayFadingIn,
    FullPlaying,
}

/// The part-preview loop as an explicit state machine: one `advance(dt)` call
/// per scheduler tick replaces each suspension point of a coroutine version.
///
/// A track of duration D is split into `parts` equal windows; window `i`
/// starts at `i * D / parts`. Each window fades in linearly over the fade
/// time, sustains for `section_seconds - 2 * fade`, fades back out, then the
/// loop moves to the next window (cyclically, forever). Holding the hold key
/// at the end of the sustain parks the loop until release; full-play mode
/// takes over at the next window boundary and loops the entire track instead.
pub struct SegmentEngine {
    parts: u32,
    fade_seconds: f32,
    section_seconds: f32,
    duration_secs: f32,

    phase: PlaybackPhase,
    part_index: u32,
    phase_elapsed: f32,
    /// Captured from `section_seconds` when a part starts, so live changes
    /// apply from the next part rather than mid-fade.
    sustain_seconds: f32,
    volume: f32,
    holding: bool,
    full_play: bool,
    /// Set when a fade-out completes; the next part starts one tick later.
    pending_start: bool,
    warned_short_section: bool,
}

impl SegmentEngine {
    pub fn new(config: &PlayerConfig, duration_secs: f32) -> Self {
        Self {
            parts: config.parts.max(1),
            fade_seconds: config.fade_seconds,
            section_seconds: config.section_seconds,
            duration_secs,
            phase: PlaybackPhase::Stopped,
            part_index: 0,
            phase_elapsed: 0.0,
            sustain_seconds: 0.0,
            volume: 0.0,
            holding: false,
            full_play: false,
            pending_start: false,
            warned_short_section: false,
        }
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn is_holding(&self) -> bool {
        self.holding
    }

    pub fn part_len(&self) -> f32 {
        self.duration_secs / self.parts as f32
    }

    /// Live section-time update; the part currently playing keeps the length
    /// it started with.
    pub fn set_section_seconds(&mut self, seconds: f32) {
        self.section_seconds = seconds;
    }

    /// Requests full-track playback (or leaving it). Only consulted at part
    /// boundaries, so an in-progress fade is never cut short.
    pub fn set_full_play(&mut self, enabled: bool) {
        self.full_play = enabled;
    }

    /// Back to `Stopped`; safe from any phase. The driver calls this before
    /// tearing the output down.
    pub fn reset(&mut self) {
        self.phase = PlaybackPhase::Stopped;
        self.part_index = 0;
        self.phase_elapsed = 0.0;
        self.volume = 0.0;
        self.holding = false;
        self.pending_start = false;
    }

    /// One scheduler tick. `dt` is wall-clock seconds since the previous
    /// tick, `hold_down` the current physical state of the hold key.
    pub fn advance(&mut self, dt: f32, hold_down: bool, out: &mut dyn OutputChannel) -> Result<()> {
        if self.pending_start {
            self.pending_start = false;
            return self.begin_boundary(out);
        }

        match self.phase {
            PlaybackPhase::Stopped => self.begin_boundary(out)?,

            PlaybackPhase::FadingIn => {
                self.phase_elapsed += dt;
                let progress = fade_progress(self.phase_elapsed, self.fade_seconds);
                self.volume = progress;
                out.set_volume(self.volume)?;
                if progress >= 1.0 {
                    self.phase = PlaybackPhase::Sustaining;
                    self.phase_elapsed = 0.0;
                }
            }

            PlaybackPhase::Sustaining => {
                self.phase_elapsed += dt;
                if self.phase_elapsed >= self.sustain_seconds {
                    if hold_down {
                        self.holding = true;
                        self.phase = PlaybackPhase::Holding;
                    } else {
                        self.phase = PlaybackPhase::FadingOut;
                        self.phase_elapsed = 0.0;
                    }
                }
            }

            PlaybackPhase::Holding => {
                // Parked; time deliberately not accounted while the key is
                // down, so the sustain stretches for as long as the operator
                // wants to keep listening.
                if !hold_down {
                    self.holding = false;
                    self.phase = PlaybackPhase::FadingOut;
                    self.phase_elapsed = 0.0;
                }
            }

            PlaybackPhase::FadingOut => {
                self.phase_elapsed += dt;
                let progress = fade_progress(self.phase_elapsed, self.fade_seconds);
                self.volume = (1.0 - progress).max(0.0);
                out.set_volume(self.volume)?;
                if progress >= 1.0 {
                    self.part_index = (self.part_index + 1) % self.parts;
                    self.pending_start = true;
                }
            }

            PlaybackPhase::FullPlayFadingIn => {
                // Additive per-tick ramp rather than a fixed-duration fade;
                // its real-time length depends on the tick rate.
                let step = if self.fade_seconds > 0.0 {
                    dt / self.fade_seconds
                } else {
                    1.0
                };
                self.volume = (self.volume + step).min(1.0);
                out.set_volume(self.volume)?;
                if self.volume >= 1.0 {
                    self.phase = PlaybackPhase::FullPlaying;
                }
            }

            PlaybackPhase::FullPlaying => {
                if !self.full_play {
                    self.part_index = 0;
                    self.begin_boundary(out)?;
                }
            }
        }

        Ok(())
    }

    /// Part-boundary decision point: start the next part, or hand over to
    /// full-track playback when the mode was requested.
    fn begin_boundary(&mut self, out: &mut dyn OutputChannel) -> Result<()> {
        self.phase_elapsed = 0.0;
        self.volume = 0.0;

        if self.full_play {
            out.start_at(0.0, true)?;
            out.set_volume(0.0)?;
            self.phase = PlaybackPhase::FullPlayFadingIn;
            return Ok(());
        }

        let sustain = self.section_seconds - 2.0 * self.fade_seconds;
        if sustain < 0.0 && !self.warned_short_section {
            warn!(
                section = self.section_seconds,
                fade = self.fade_seconds,
                "section shorter than both fades; sustain clamped to zero"
            );
            self.warned_short_section = true;
        }
        self.sustain_seconds = sustain.max(0.0);

        out.start_at(self.part_index as f32 * self.part_len(), false)?;
        out.set_volume(0.0)?;
        self.phase = PlaybackPhase::FadingIn;
        Ok(())
    }
}

fn fade_progress(elapsed: f32, fade_seconds: f32) -> f32 {
    if fade_seconds > 0.0 {
        (elapsed / fade_seconds).min(1.0)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 0.1;

    #[derive(Default)]
    struct FakeChannel {
        starts: Vec<(f32, bool)>,
        volumes: Vec<f32>,
    }

    impl OutputChannel for FakeChannel {
        fn start_at(&mut self, position_secs: f32, looping: bool) -> Result<()> {
            self.starts.push((position_secs, looping));
            Ok(())
        }

        fn set_volume(&mut self, volume: f32) -> Result<()> {
            self.volumes.push(volume);
            Ok(())
        }
    }

    fn engine(parts: u32, section: f32, fade: f32, duration: f32) -> SegmentEngine {
        let config = PlayerConfig {
            parts,
            section_seconds: section,
            fade_seconds: fade,
        };
        SegmentEngine::new(&config, duration)
    }

    fn run_until_phase(
        engine: &mut SegmentEngine,
        chan: &mut FakeChannel,
        phase: PlaybackPhase,
        hold: bool,
    ) {
        for _ in 0..10_000 {
            if engine.phase() == phase {
                return;
            }
            engine.advance(DT, hold, chan).unwrap();
        }
        panic!("never reached {phase:?}, stuck in {:?}", engine.phase());
    }

    /// Advances while the engine sits in `phase`, returning the tick count.
    fn ticks_in_phase(
        engine: &mut SegmentEngine,
        chan: &mut FakeChannel,
        phase: PlaybackPhase,
    ) -> usize {
        let mut ticks = 0;
        while engine.phase() == phase {
            engine.advance(DT, false, chan).unwrap();
            ticks += 1;
            assert!(ticks < 10_000, "stuck in {phase:?}");
        }
        ticks
    }

    #[test]
    fn parts_start_at_even_boundaries_and_wrap() {
        let mut e = engine(4, 1.0, 0.2, 100.0);
        let mut chan = FakeChannel::default();

        for _ in 0..600 {
            e.advance(DT, false, &mut chan).unwrap();
        }

        let positions: Vec<f32> = chan.starts.iter().map(|s| s.0).collect();
        assert!(positions.len() >= 6, "only {} parts started", positions.len());
        assert_eq!(&positions[..6], &[0.0, 25.0, 50.0, 75.0, 0.0, 25.0]);
        assert!(chan.starts.iter().all(|s| !s.1), "segment playback never loops");
    }

    #[test]
    fn fade_in_volume_is_monotonic_and_pins_at_one() {
        let mut e = engine(3, 2.0, 0.5, 30.0);
        let mut chan = FakeChannel::default();

        run_until_phase(&mut e, &mut chan, PlaybackPhase::Sustaining, false);

        assert_eq!(chan.volumes[0], 0.0);
        let last = *chan.volumes.last().unwrap();
        assert_eq!(last, 1.0);
        for pair in chan.volumes.windows(2) {
            assert!(pair[1] >= pair[0], "fade-in dipped: {:?}", chan.volumes);
        }
    }

    #[test]
    fn fade_out_volume_is_monotonic_to_zero() {
        let mut e = engine(3, 1.0, 0.2, 30.0);
        let mut chan = FakeChannel::default();

        run_until_phase(&mut e, &mut chan, PlaybackPhase::FadingOut, false);
        chan.volumes.clear();

        // Run until the second part starts; everything recorded in between is
        // the fade-out ramp (plus the silent boundary write).
        while chan.starts.len() < 2 {
            e.advance(DT, false, &mut chan).unwrap();
        }

        assert_eq!(*chan.volumes.last().unwrap(), 0.0);
        for pair in chan.volumes.windows(2) {
            assert!(pair[1] <= pair[0], "fade-out rose: {:?}", chan.volumes);
        }
    }

    #[test]
    fn one_tick_yield_between_parts() {
        let mut e = engine(2, 1.0, 0.2, 10.0);
        let mut chan = FakeChannel::default();

        run_until_phase(&mut e, &mut chan, PlaybackPhase::FadingOut, false);
        while *chan.volumes.last().unwrap() > 0.0 {
            e.advance(DT, false, &mut chan).unwrap();
        }

        // Fade-out has just hit zero; the next part must not start yet.
        assert_eq!(chan.starts.len(), 1);
        e.advance(DT, false, &mut chan).unwrap();
        assert_eq!(chan.starts.len(), 2);
        assert_eq!(chan.starts[1].0, 5.0);
    }

    #[test]
    fn hold_key_parks_the_loop_and_fade_out_still_happens() {
        let mut e = engine(4, 1.0, 0.2, 40.0);
        let mut chan = FakeChannel::default();

        run_until_phase(&mut e, &mut chan, PlaybackPhase::Sustaining, false);
        run_until_phase(&mut e, &mut chan, PlaybackPhase::Holding, true);
        assert!(e.is_holding());

        let starts_before = chan.starts.len();
        let volumes_before = chan.volumes.len();
        for _ in 0..500 {
            e.advance(DT, true, &mut chan).unwrap();
        }
        assert_eq!(e.phase(), PlaybackPhase::Holding);
        assert_eq!(chan.starts.len(), starts_before, "held loop must not advance");
        assert_eq!(chan.volumes.len(), volumes_before);

        // Release: holding clears immediately, then the normal fade-out runs.
        e.advance(DT, false, &mut chan).unwrap();
        assert!(!e.is_holding());
        assert_eq!(e.phase(), PlaybackPhase::FadingOut);

        chan.volumes.clear();
        while e.phase() == PlaybackPhase::FadingOut && !chan.volumes.contains(&0.0) {
            e.advance(DT, false, &mut chan).unwrap();
        }
        assert_eq!(*chan.volumes.last().unwrap(), 0.0);
    }

    #[test]
    fn full_play_waits_for_part_boundary() {
        let mut e = engine(4, 1.0, 0.2, 40.0);
        let mut chan = FakeChannel::default();

        // Toggle mid fade-in: the in-progress part must finish untouched.
        e.advance(DT, false, &mut chan).unwrap();
        e.advance(DT, false, &mut chan).unwrap();
        assert_eq!(e.phase(), PlaybackPhase::FadingIn);
        e.set_full_play(true);

        run_until_phase(&mut e, &mut chan, PlaybackPhase::FullPlayFadingIn, false);
        assert_eq!(chan.starts.len(), 2, "toggle must not restart the current part");
        assert_eq!(chan.starts[1], (0.0, true));

        // Per-tick additive ramp: dt/fade = 0.5 per tick, so two ticks to 1.0.
        e.advance(DT, false, &mut chan).unwrap();
        assert_eq!(e.phase(), PlaybackPhase::FullPlayFadingIn);
        e.advance(DT, false, &mut chan).unwrap();
        assert_eq!(e.phase(), PlaybackPhase::FullPlaying);
        assert_eq!(*chan.volumes.last().unwrap(), 1.0);
    }

    #[test]
    fn full_play_disabled_returns_to_first_part() {
        let mut e = engine(4, 1.0, 0.2, 40.0);
        let mut chan = FakeChannel::default();

        e.set_full_play(true);
        run_until_phase(&mut e, &mut chan, PlaybackPhase::FullPlaying, false);

        e.set_full_play(false);
        e.advance(DT, false, &mut chan).unwrap();
        assert_eq!(e.phase(), PlaybackPhase::FadingIn);
        assert_eq!(*chan.starts.last().unwrap(), (0.0, false));
    }

    #[test]
    fn oversized_fade_clamps_sustain_to_zero() {
        // 2 * fade > section: the sustain degenerates to a single tick.
        let mut e = engine(2, 0.3, 0.2, 10.0);
        let mut chan = FakeChannel::default();

        run_until_phase(&mut e, &mut chan, PlaybackPhase::Sustaining, false);
        e.advance(DT, false, &mut chan).unwrap();
        assert_eq!(e.phase(), PlaybackPhase::FadingOut);
    }

    #[test]
    fn section_time_change_applies_next_part() {
        let mut e = engine(2, 1.0, 0.2, 10.0);
        let mut chan = FakeChannel::default();

        run_until_phase(&mut e, &mut chan, PlaybackPhase::Sustaining, false);
        e.set_section_seconds(2.0);

        // Current part keeps its captured sustain of 0.6 s.
        assert_eq!(ticks_in_phase(&mut e, &mut chan, PlaybackPhase::Sustaining), 6);

        // Next part picks up the new section time: 2.0 - 2 * 0.2 = 1.6 s.
        run_until_phase(&mut e, &mut chan, PlaybackPhase::Sustaining, false);
        assert_eq!(ticks_in_phase(&mut e, &mut chan, PlaybackPhase::Sustaining), 16);
    }

    #[test]
    fn zero_fade_jumps_straight_to_full_volume() {
        let mut e = engine(2, 1.0, 0.0, 10.0);
        let mut chan = FakeChannel::default();

        e.advance(DT, false, &mut chan).unwrap(); // boundary
        e.advance(DT, false, &mut chan).unwrap(); // fade-in collapses
        assert_eq!(e.phase(), PlaybackPhase::Sustaining);
        assert_eq!(*chan.volumes.last().unwrap(), 1.0);
    }

    #[test]
    fn reset_clears_state_from_any_phase() {
        for target in [
            PlaybackPhase::FadingIn,
            PlaybackPhase::Sustaining,
            PlaybackPhase::Holding,
            PlaybackPhase::FadingOut,
        ] {
            let mut e = engine(4, 1.0, 0.2, 40.0);
            let mut chan = FakeChannel::default();
            run_until_phase(&mut e, &mut chan, target, target == PlaybackPhase::Holding);

            e.reset();
            assert_eq!(e.phase(), PlaybackPhase::Stopped);
            assert!(!e.is_holding());
        }
    }

    #[test]
    fn single_part_previews_the_whole_track_from_zero() {
        let mut e = engine(1, 1.0, 0.2, 60.0);
        let mut chan = FakeChannel::default();

        for _ in 0..300 {
            e.advance(DT, false, &mut chan).unwrap();
        }
        assert!(chan.starts.len() >= 2);
        assert!(chan.starts.iter().all(|s| s.0 == 0.0));
    }
}
