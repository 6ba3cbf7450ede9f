//! Region peeling tasks.
//!
//! [`TaskDispatcher`] splits a list of region files over a fixed number of
//! worker threads; each [`RegionWorker`] runs read → filter → rewrite on its
//! own queue and reports a [`PeelResult`].

use std::ops::AddAssign;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::protection::ProtectionIndex;

pub mod dispatcher;
pub mod worker;

pub use dispatcher::{DispatchState, InterruptHandle, TaskDispatcher};
pub use worker::{mark_chunks_for_removal, RegionWorker, WorkerOutcome};

/// Suffix appended to a region file while it is being rewritten in place.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Immutable settings shared by every worker of a run.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Chunks with an `InhabitedTime` at or below this value are removed.
    pub min_inhabited: i64,
    pub protection:    ProtectionIndex,
    pub dry_run:       bool,
    /// World directory the region files live under.
    pub source_root:   PathBuf,
    /// Mirror root for copy-to-output mode. `None` rewrites in place.
    pub output_root:   Option<PathBuf>,
    /// Skip region files modified more recently than this.
    pub min_file_age:  Option<Duration>,
}

impl RunParams {
    pub fn new(source_root: impl Into<PathBuf>, protection: ProtectionIndex) -> Self {
        Self {
            min_inhabited: 0,
            protection,
            dry_run:       false,
            source_root:   source_root.into(),
            output_root:   None,
            min_file_age:  None,
        }
    }
}

/// Statistics of one worker, or of a whole run once merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeelResult {
    /// Original size minus rewritten size, summed over rewritten files.
    pub bytes_reclaimed:  i64,
    pub chunks_removed:   u64,
    pub regions_affected: u64,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed:          Duration,
}

impl PeelResult {
    /// Combine two results: counters add, elapsed time takes the longer one
    /// since workers run side by side.
    pub fn merge(self, other: PeelResult) -> PeelResult {
        PeelResult {
            bytes_reclaimed:  self.bytes_reclaimed + other.bytes_reclaimed,
            chunks_removed:   self.chunks_removed + other.chunks_removed,
            regions_affected: self.regions_affected + other.regions_affected,
            elapsed:          self.elapsed.max(other.elapsed),
        }
    }
}

impl AddAssign for PeelResult {
    fn add_assign(&mut self, other: PeelResult) {
        *self = self.merge(other);
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}
