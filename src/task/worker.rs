//! Per-thread region pipeline.
//!
//! Every file goes through: read, filter, rewrite. A failure on one file is
//! logged and the worker moves on to the next; a rewrite that fails midway
//! is rolled back before the error is logged.
//!
//! # Rewrite modes
//! - **In place**: the original is renamed to `<name>.bak`, the compacted
//!   region is written under the original name from the backup, and the
//!   backup is deleted. On failure the partial output is removed and the
//!   backup renamed back.
//! - **Copy to output**: the original is first copied verbatim into the
//!   mirrored output tree, then overwritten with the compacted region. On
//!   failure the original is copied over the output again. Files that are
//!   too young to peel are still mirrored.
//! - **Dry run**: either mode, but the compacted size is computed against a
//!   counting sink and nothing on disk changes.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use log::{debug, error, info, warn};

use super::{PeelResult, RunParams, BACKUP_SUFFIX};
use crate::error::{PeelError, Result};
use crate::protection::ProtectionIndex;
use crate::region::{parse_region_coords, read_region, read_region_from, write_region_to, Region};

/// Mark every chunk that is neither oversized nor protected and whose
/// `InhabitedTime` is at or below `min_inhabited`. Returns the number of
/// newly marked chunks.
pub fn mark_chunks_for_removal(
    region:        &mut Region,
    min_inhabited: i64,
    protection:    &ProtectionIndex,
) -> u64 {
    let mut marked = 0;
    for chunk in region.existing_chunks_mut() {
        if chunk.oversized || chunk.is_marked_for_removal() {
            continue;
        }
        if protection.contains(chunk.global_x, chunk.global_z) {
            debug!("chunk ({}, {}) is protected", chunk.global_x, chunk.global_z);
            continue;
        }
        if chunk.inhabited_time <= min_inhabited {
            chunk.mark_for_removal();
            marked += 1;
        }
    }
    marked
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Outcome of one successfully rewritten file.
#[derive(Debug, Clone, Copy)]
struct FileStats {
    chunks_removed:  u64,
    bytes_reclaimed: i64,
}

/// What a worker thread hands back when it stops.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerOutcome {
    pub result:      PeelResult,
    /// The interrupt flag stopped the worker before its queue was drained.
    pub interrupted: bool,
}

pub struct RegionWorker {
    id:        usize,
    queue:     VecDeque<PathBuf>,
    params:    Arc<RunParams>,
    interrupt: Arc<AtomicBool>,
}

impl RegionWorker {
    pub fn new(
        id:        usize,
        queue:     impl IntoIterator<Item = PathBuf>,
        params:    Arc<RunParams>,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self { id, queue: queue.into_iter().collect(), params, interrupt }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Process the queue until it is empty or the interrupt flag is raised.
    /// The flag is only checked between files.
    pub fn run(mut self) -> WorkerOutcome {
        let started = Instant::now();
        let mut result = PeelResult::default();

        while !self.interrupt.load(Ordering::SeqCst) {
            let Some(path) = self.queue.pop_front() else { break };
            match self.process_file(&path) {
                Ok(Some(stats)) => {
                    result.chunks_removed += stats.chunks_removed;
                    result.bytes_reclaimed += stats.bytes_reclaimed;
                    result.regions_affected += 1;
                }
                Ok(None) => {}
                Err(e) => warn!("worker {}: skipping {}: {e}", self.id, path.display()),
            }
        }

        result.elapsed = started.elapsed();
        let interrupted = !self.queue.is_empty();
        if interrupted {
            info!("worker {} interrupted with {} file(s) left", self.id, self.queue.len());
        }
        WorkerOutcome { result, interrupted }
    }

    fn process_file(&self, path: &Path) -> Result<Option<FileStats>> {
        let young = match self.params.min_file_age {
            Some(min_age) => {
                let modified = fs::metadata(path)?.modified()?;
                SystemTime::now()
                    .duration_since(modified)
                    .map_or(true, |age| age < min_age)
            }
            None => false,
        };
        if young {
            debug!("{} was modified too recently, not peeled", path.display());
        }
        match &self.params.output_root {
            Some(root) => self.peel_to_output(path, root, young),
            None if young => Ok(None),
            None => self.peel_in_place(path),
        }
    }

    fn mark(&self, region: &mut Region) -> u64 {
        let marked = mark_chunks_for_removal(region, self.params.min_inhabited, &self.params.protection);
        if marked == 0 {
            debug!("{}: nothing to remove", region.path().display());
        }
        marked
    }

    // ── In place ─────────────────────────────────────────────────────────────

    fn peel_in_place(&self, path: &Path) -> Result<Option<FileStats>> {
        let backup = backup_path(path);
        let (mut region, source) = match read_region(path) {
            Ok(region) => (region, path.to_path_buf()),
            Err(e) if backup.exists() => {
                warn!("{}: {e}; reading backup {}", path.display(), backup.display());
                let (region_x, region_z) = parse_region_coords(path)?;
                let mut reader = BufReader::new(File::open(&backup)?);
                let region = read_region_from(&mut reader, path, region_x, region_z)?;
                if self.params.dry_run {
                    (region, backup.clone())
                } else {
                    if path.exists() {
                        fs::remove_file(path)?;
                    }
                    fs::rename(&backup, path)?;
                    info!("{}: restored from backup", path.display());
                    (region, path.to_path_buf())
                }
            }
            Err(e) => return Err(e),
        };

        let marked = self.mark(&mut region);
        if marked == 0 {
            return Ok(None);
        }
        let original_len = fs::metadata(&source)?.len();

        if self.params.dry_run {
            let new_len = write_region_to(&region, &source, None, true)?;
            return Ok(Some(FileStats { chunks_removed: marked, bytes_reclaimed: reclaimed(original_len, new_len) }));
        }

        if backup.exists() {
            fs::remove_file(&backup)?;
        }
        fs::rename(path, &backup)?;

        let new_len = match write_region_to(&region, &backup, Some(path), false) {
            Ok(n) => n,
            Err(e) => {
                restore_backup(path, &backup);
                return Err(e);
            }
        };
        if let Err(e) = fs::remove_file(&backup) {
            warn!("failed to delete backup {}: {e}", backup.display());
        }
        debug!("{}: {} chunk(s) removed", path.display(), marked);
        Ok(Some(FileStats { chunks_removed: marked, bytes_reclaimed: reclaimed(original_len, new_len) }))
    }

    // ── Copy to output ───────────────────────────────────────────────────────

    /// A `young` file is mirrored verbatim but not peeled.
    fn peel_to_output(&self, path: &Path, output_root: &Path, young: bool) -> Result<Option<FileStats>> {
        let relative = path.strip_prefix(&self.params.source_root).map_err(|_| {
            PeelError::Format(format!(
                "{} is not under {}",
                path.display(),
                self.params.source_root.display()
            ))
        })?;
        let target = output_root.join(relative);
        if target.exists() {
            warn!("output {} already exists, skipped", target.display());
            return Ok(None);
        }
        if !self.params.dry_run {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(path, &target)?;
        }
        if young {
            return Ok(None);
        }

        let mut region = read_region(path)?;
        let marked = self.mark(&mut region);
        if marked == 0 {
            return Ok(None);
        }
        let original_len = fs::metadata(path)?.len();

        let new_len = if self.params.dry_run {
            write_region_to(&region, path, None, true)?
        } else {
            match write_region_to(&region, path, Some(&target), false) {
                Ok(n) => n,
                Err(e) => {
                    if let Err(copy_err) = fs::copy(path, &target) {
                        error!("failed to restore {} from {}: {copy_err}", target.display(), path.display());
                    }
                    return Err(e);
                }
            }
        };
        debug!("{} -> {}: {} chunk(s) removed", path.display(), target.display(), marked);
        Ok(Some(FileStats { chunks_removed: marked, bytes_reclaimed: reclaimed(original_len, new_len) }))
    }
}

fn reclaimed(original_len: u64, new_len: u64) -> i64 {
    original_len as i64 - new_len as i64
}

/// Put `backup` back under `path`, discarding any partial output.
fn restore_backup(path: &Path, backup: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            error!("failed to remove partial output {}: {e}", path.display());
        }
    }
    if let Err(e) = fs::rename(backup, path) {
        error!("failed to restore backup {}: {e}", backup.display());
    }
}
