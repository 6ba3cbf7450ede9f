//! Last-run bookkeeping.
//!
//! Loaded once when the binary starts and stored once at the end of a run
//! that processed at least one world. The record is a small JSON file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PeelError, Result};

/// Default location, relative to the working directory.
pub const DEFAULT_STATE_FILE: &str = "peeler_last_run.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Persisted {
    last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct LastRunRecord {
    path:     PathBuf,
    last_run: Option<DateTime<Utc>>,
}

impl LastRunRecord {
    /// Read the record at `path`. A missing file means no previous run.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let last_run = match fs::read_to_string(&path) {
            Ok(text) => {
                let persisted: Persisted = serde_json::from_str(&text).map_err(|e| {
                    PeelError::Format(format!("{}: {e}", path.display()))
                })?;
                persisted.last_run
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, last_run })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    /// True if the previous run ended less than `minutes` before `now`.
    /// A zero cool-down never blocks.
    pub fn in_cool_down(&self, minutes: u64, now: DateTime<Utc>) -> bool {
        match self.last_run {
            Some(last) if minutes > 0 => {
                let window = Duration::minutes(minutes.min(i64::MAX as u64 / 60_000) as i64);
                last.checked_add_signed(window).map_or(true, |end| now < end)
            }
            _ => false,
        }
    }

    /// Record `now` as the last run and write the file.
    pub fn store(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.last_run = Some(now);
        let text = serde_json::to_string_pretty(&Persisted { last_run: self.last_run })
            .map_err(|e| PeelError::Format(e.to_string()))?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_means_never_run() {
        let dir = tempdir().unwrap();
        let record = LastRunRecord::load(dir.path().join("state.json")).unwrap();
        assert_eq!(record.last_run(), None);
        assert!(!record.in_cool_down(60, Utc::now()));
    }

    #[test]
    fn store_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let now = Utc::now();
        LastRunRecord::load(&path).unwrap().store(now).unwrap();

        let record = LastRunRecord::load(&path).unwrap();
        assert_eq!(record.last_run(), Some(now));
        assert!(record.in_cool_down(10, now + Duration::minutes(9)));
        assert!(!record.in_cool_down(10, now + Duration::minutes(10)));
        assert!(!record.in_cool_down(0, now));
    }

    #[test]
    fn garbage_is_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(LastRunRecord::load(&path), Err(PeelError::Format(_))));
    }
}
