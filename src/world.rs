//! World-level orchestration: locate the region files of a world, gather
//! its protection sources and run a dispatch over it.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;

use crate::error::{PeelError, Result};
use crate::forceload::load_forced_chunks;
use crate::protection::{read_protected_list, ProtectionIndex};
use crate::task::{PeelResult, RunParams, TaskDispatcher};

pub const REGION_DIR_NAME: &str = "region";
/// Per-world protection list, next to the region directory.
pub const WORLD_PROTECTED_LIST: &str = "chunks.protected";
pub const DATA_DIR_NAME: &str = "data";
pub const FORCE_LOADED_LEDGER: &str = "chunks.dat";
pub const REGION_EXTENSION: &str = "mca";

/// Settings for one [`peel_world`] call.
#[derive(Debug, Clone)]
pub struct PeelOptions {
    pub threads:       usize,
    pub min_inhabited: i64,
    pub dry_run:       bool,
    /// Mirror root for this world; `None` rewrites in place.
    pub output_root:   Option<PathBuf>,
    pub min_file_age:  Option<Duration>,
}

impl Default for PeelOptions {
    fn default() -> Self {
        Self {
            threads:       10,
            min_inhabited: 0,
            dry_run:       false,
            output_root:   None,
            min_file_age:  None,
        }
    }
}

/// Breadth-first search under `world_dir` for the first directory named
/// `region`. Siblings are visited in name order.
pub fn find_region_dir(world_dir: &Path) -> Option<PathBuf> {
    let mut pending = VecDeque::from([world_dir.to_path_buf()]);
    while let Some(dir) = pending.pop_front() {
        let Ok(entries) = fs::read_dir(&dir) else { continue };
        let mut subdirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        subdirs.sort();
        for sub in subdirs {
            if sub.file_name().is_some_and(|n| n == REGION_DIR_NAME) {
                return Some(sub);
            }
            pending.push_back(sub);
        }
    }
    None
}

/// The `*.mca` files directly inside `region_dir`, sorted by name.
pub fn list_region_files(region_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(region_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == REGION_EXTENSION))
        .collect();
    files.sort();
    Ok(files)
}

/// Add the per-world protection list and the force-loaded ledger found
/// next to `region_dir` to `index`.
pub fn collect_world_protection(region_dir: &Path, mut index: ProtectionIndex) -> Result<ProtectionIndex> {
    let Some(world_root) = region_dir.parent() else { return Ok(index) };

    let list = world_root.join(WORLD_PROTECTED_LIST);
    if list.is_file() {
        index = read_protected_list(&list, index)?;
        info!("protected chunks read from {}", list.display());
    }

    let ledger = world_root.join(DATA_DIR_NAME).join(FORCE_LOADED_LEDGER);
    if ledger.is_file() {
        index = load_forced_chunks(index, &ledger)?.index;
    }
    Ok(index)
}

/// Peel every region file of the world at `world_dir`.
///
/// `protection` holds the rules that apply to every world; the world's own
/// protection list and force-loaded chunks are added on top of it.
pub fn peel_world(world_dir: &Path, protection: ProtectionIndex, options: &PeelOptions) -> Result<PeelResult> {
    let region_dir = find_region_dir(world_dir).ok_or_else(|| {
        PeelError::RegionFilesNotFound(format!("no region directory under {}", world_dir.display()))
    })?;
    let files = list_region_files(&region_dir)?;
    if files.is_empty() {
        return Err(PeelError::RegionFilesNotFound(format!(
            "no .{REGION_EXTENSION} files in {}",
            region_dir.display()
        )));
    }
    info!("{}: {} region file(s) in {}", world_dir.display(), files.len(), region_dir.display());

    let protection = collect_world_protection(&region_dir, protection)?;

    let params = RunParams {
        min_inhabited: options.min_inhabited,
        protection,
        dry_run:       options.dry_run,
        source_root:   world_dir.to_path_buf(),
        output_root:   options.output_root.clone(),
        min_file_age:  options.min_file_age,
    };
    let mut dispatcher = TaskDispatcher::new(options.threads, params);
    dispatcher.add_tasks(files)?;
    dispatcher.run()
}
