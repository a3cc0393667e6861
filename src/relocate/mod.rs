// Durable file relocation: a move can fail transiently (file still open in
// the player's decoder task, antivirus scan, sluggish network share), so each
// one gets a handful of spaced-out attempts before the operator is told.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_STEP: Duration = Duration::from_secs(5);

/// Filesystem move primitive, injected so tests can script failures.
pub trait FileMover: Send + Sync {
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// Default mover: plain rename. Buckets live inside the source folder, so
/// cross-device moves are not a concern.
pub struct FsMover;

impl FileMover for FsMover {
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }
}

/// The most recently *attempted* move. Recorded before the first attempt, so
/// undo follows the operator's intent even when the move itself failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRecord {
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved { attempts: u32 },
    Failed { attempts: u32 },
}

impl MoveOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, MoveOutcome::Moved { .. })
    }
}

/// Moves files with bounded, linearly backed-off retries and one level of
/// undo. Never returns an error across its boundary: every relocation
/// resolves to a [`MoveOutcome`] for the caller to display.
pub struct Relocator {
    mover: Box<dyn FileMover>,
    last_move: Option<MoveRecord>,
}

impl Relocator {
    pub fn new() -> Self {
        Self::with_mover(Box::new(FsMover))
    }

    pub fn with_mover(mover: Box<dyn FileMover>) -> Self {
        Self {
            mover,
            last_move: None,
        }
    }

    pub fn last_move(&self) -> Option<&MoveRecord> {
        self.last_move.as_ref()
    }

    /// Up to five attempts; before attempt `i` (0-based) waits `i * 5`
    /// seconds, so the schedule is 0, 5, 10, 15, 20. Any attempt error
    /// counts the same regardless of kind. Exhaustion leaves the file where
    /// it was and is reported, not raised.
    pub async fn relocate(&mut self, source: PathBuf, destination: PathBuf) -> MoveOutcome {
        self.last_move = Some(MoveRecord {
            source: source.clone(),
            destination: destination.clone(),
        });

        for attempt in 0..MAX_ATTEMPTS {
            tokio::time::sleep(BACKOFF_STEP * attempt).await;

            match self.mover.move_file(&source, &destination) {
                Ok(()) => {
                    info!(
                        from = %source.display(),
                        to = %destination.display(),
                        attempts = attempt + 1,
                        "file relocated"
                    );
                    return MoveOutcome::Moved {
                        attempts: attempt + 1,
                    };
                }
                Err(e) => {
                    debug!(
                        from = %source.display(),
                        attempt = attempt + 1,
                        "move attempt failed: {e}"
                    );
                }
            }
        }

        error!(
            from = %source.display(),
            to = %destination.display(),
            "failed to move file after {MAX_ATTEMPTS} attempts"
        );
        MoveOutcome::Failed {
            attempts: MAX_ATTEMPTS,
        }
    }

    /// Re-runs the last recorded move with source and destination swapped.
    /// `None` when nothing has been recorded yet. Single level: undoing an
    /// undo redoes the move.
    pub async fn undo(&mut self) -> Option<MoveOutcome> {
        let record = self.last_move.clone()?;
        info!(
            from = %record.destination.display(),
            to = %record.source.display(),
            "undoing last move"
        );
        Some(self.relocate(record.destination, record.source).await)
    }
}

impl Default for Relocator {
    fn default() -> Self {
        Self::new()
    }
}
