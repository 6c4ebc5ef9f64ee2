//! Purging derivatives when their source changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::library::AttachmentListener;
use crate::request::AttachmentId;

/// Temp files older than this belong to a render that never finished
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Outcome of one purge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: usize,
    pub failed: usize,
    /// Abandoned `.tmp-*` files cleared along the way
    pub swept: usize,
}

/// Deletes every derivative of an attachment from the cache directory.
#[derive(Debug, Clone)]
pub struct Invalidator {
    cache_dir: PathBuf,
}

impl Invalidator {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn on_source_edited(&self, id: &AttachmentId) -> PurgeReport {
        self.purge(id)
    }

    pub fn on_source_deleted(&self, id: &AttachmentId) -> PurgeReport {
        self.purge(id)
    }

    /// Remove files named `{id}_…` or `{id}-…`. Best effort: a file that
    /// cannot be removed is logged and skipped.
    ///
    /// `.tmp-*` files left by an interrupted render are removed too once
    /// they are older than [`STALE_TEMP_AGE`]; younger ones may still be
    /// in flight.
    pub fn purge(&self, id: &AttachmentId) -> PurgeReport {
        let mut report = PurgeReport::default();
        if !self.cache_dir.is_dir() {
            debug!(dir = %self.cache_dir.display(), "no cache directory, nothing to purge");
            return report;
        }

        let underscore = format!("{id}_");
        let dash = format!("{id}-");

        for entry in WalkDir::new(&self.cache_dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable cache entry: {e}");
                    report.failed += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with(".tmp-") {
                if is_stale(entry.path()) && fs::remove_file(entry.path()).is_ok() {
                    debug!(path = %entry.path().display(), "removed abandoned temp file");
                    report.swept += 1;
                }
                continue;
            }
            if !name.starts_with(&underscore) && !name.starts_with(&dash) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => report.removed += 1,
                // Someone else got there first
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %entry.path().display(), "could not remove derivative: {e}");
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 || report.failed > 0 {
            info!(attachment = %id, removed = report.removed, failed = report.failed, "purged derivatives");
        }
        report
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_TEMP_AGE)
}

impl AttachmentListener for Invalidator {
    fn on_source_edited(&self, id: &AttachmentId) {
        Invalidator::on_source_edited(self, id);
    }

    fn on_source_deleted(&self, id: &AttachmentId) {
        Invalidator::on_source_deleted(self, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_purge_removes_all_keys_for_id() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "42_300x200-aaaa-photo.jpg");
        touch(dir.path(), "42_300x-bbbb-photo.jpg");
        touch(dir.path(), "42-legacy.jpg");
        touch(dir.path(), "420_300x200-aaaa-other.jpg");
        touch(dir.path(), "4_300x200-aaaa-other.jpg");

        let report = Invalidator::new(dir.path()).on_source_deleted(&AttachmentId::try_from(42_i64).unwrap());

        assert_eq!(report, PurgeReport { removed: 3, failed: 0, swept: 0 });
        assert_eq!(
            names(dir.path()),
            ["420_300x200-aaaa-other.jpg", "4_300x200-aaaa-other.jpg"]
        );
    }

    #[test]
    fn test_purge_without_matches_is_fine() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "7_10x10-k-a.jpg");
        let report = Invalidator::new(dir.path()).on_source_edited(&AttachmentId::try_from(8_i64).unwrap());
        assert_eq!(report, PurgeReport::default());
        assert_eq!(names(dir.path()).len(), 1);
    }

    #[test]
    fn test_purge_missing_directory() {
        let dir = TempDir::new().unwrap();
        let report = Invalidator::new(dir.path().join("resized")).purge(&AttachmentId::try_from(1_i64).unwrap());
        assert_eq!(report, PurgeReport::default());
    }

    #[test]
    fn test_purge_sweeps_only_stale_temp_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), ".tmp-old123.jpg");
        touch(dir.path(), ".tmp-new456.jpg");
        let old = SystemTime::now() - STALE_TEMP_AGE - Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(dir.path().join(".tmp-old123.jpg"))
            .unwrap()
            .set_modified(old)
            .unwrap();

        let report = Invalidator::new(dir.path()).purge(&AttachmentId::try_from(3_i64).unwrap());
        assert_eq!(report, PurgeReport { removed: 0, failed: 0, swept: 1 });
        assert_eq!(names(dir.path()), [".tmp-new456.jpg"]);
    }

    #[test]
    fn test_purge_skips_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("5_subdir")).unwrap();
        touch(dir.path(), "5_1x1-k-a.jpg");
        let report = Invalidator::new(dir.path()).purge(&AttachmentId::try_from(5_i64).unwrap());
        assert_eq!(report.removed, 1);
        assert!(dir.path().join("5_subdir").is_dir());
    }
}
