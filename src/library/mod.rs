// Source-folder scanning and triage statistics.
// The queue is flat by design: buckets live inside the source folder, and a
// recursive walk would sweep already-sorted files straight back in.

use anyhow::{ensure, Result};
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Destination folder with the key label it is bound to, resolved to an
/// absolute path.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub label: String,
    pub dir: PathBuf,
}

/// Collects the `.mp3` files sitting directly in `dir`, sorted by name for a
/// stable order, optionally shuffled.
pub fn scan_source(dir: &Path, randomize: bool) -> Result<VecDeque<PathBuf>> {
    ensure!(dir.is_dir(), "source folder {} does not exist", dir.display());

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_mp3(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    if randomize {
        files.shuffle(&mut rand::thread_rng());
    }

    info!(count = files.len(), source = %dir.display(), "scanned source folder");
    Ok(files.into())
}

fn is_mp3(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("mp3"))
        .unwrap_or(false)
}

fn count_mp3s(dir: &Path) -> usize {
    WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_mp3(entry.path()))
        .count()
}

/// File counts across the source folder and every bucket, recounted from the
/// filesystem after each move so the numbers survive restarts.
#[derive(Debug, Clone, Default)]
pub struct SortStats {
    pub remaining: usize,
    pub per_bucket: Vec<(String, usize)>,
}

impl SortStats {
    pub fn gather(source: &Path, buckets: &[Bucket]) -> Self {
        Self {
            remaining: count_mp3s(source),
            per_bucket: buckets
                .iter()
                .map(|bucket| (bucket.label.clone(), count_mp3s(&bucket.dir)))
                .collect(),
        }
    }

    pub fn sorted(&self) -> usize {
        self.per_bucket.iter().map(|(_, count)| count).sum()
    }

    pub fn total(&self) -> usize {
        self.remaining + self.sorted()
    }

    pub fn fraction_complete(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.sorted() as f64 / total as f64
    }
}
