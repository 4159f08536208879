//! Claim step: moving a dropped file into the in-progress location.
//!
//! The rename is the only serialization point between competing discovery
//! sources (or competing processes sharing a drop directory). Whoever loses the
//! rename sees the source vanish and drops the candidate quietly.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::error::Result;
use crate::filter::FileFilter;
use crate::layout;

/// A file owned by this pipeline between claim and its terminal location.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessingFile {
    current_path: PathBuf,
    original_path: PathBuf,
    original_full_path: PathBuf,
}

impl ProcessingFile {
    pub fn new(
        current_path: impl Into<PathBuf>,
        original_path: impl Into<PathBuf>,
        original_full_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            current_path: current_path.into(),
            original_path: original_path.into(),
            original_full_path: original_full_path.into(),
        }
    }

    /// Location inside the in-progress directory.
    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    /// Path relative to the drop root as seen at drop time.
    pub fn original_path(&self) -> &Path {
        &self.original_path
    }

    /// Absolute path at drop time.
    pub fn original_full_path(&self) -> &Path {
        &self.original_full_path
    }

    /// Directory of the original file relative to the drop root (may be empty).
    pub fn relative_dir(&self) -> &Path {
        self.original_path.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.original_path
            .file_name()
            .or_else(|| self.current_path.file_name())
    }
}

/// Turns candidate paths into [`ProcessingFile`]s.
#[derive(Debug, Clone)]
pub struct Claimer {
    drop_root: PathBuf,
    in_progress: PathBuf,
    monitor_subdirectories: bool,
    filter: Arc<dyn FileFilter>,
}

impl Claimer {
    pub fn new(
        drop_root: impl Into<PathBuf>,
        in_progress: impl Into<PathBuf>,
        monitor_subdirectories: bool,
        filter: Arc<dyn FileFilter>,
    ) -> Self {
        Self {
            drop_root: drop_root.into(),
            in_progress: in_progress.into(),
            monitor_subdirectories,
            filter,
        }
    }

    pub fn drop_root(&self) -> &Path {
        &self.drop_root
    }

    /// Attempt to claim `candidate`.
    ///
    /// `Ok(None)` covers every "not ours" case: outside the drop root, filtered
    /// out, not a regular file, or already claimed by someone else.
    pub fn claim(&self, candidate: &Path) -> Result<Option<ProcessingFile>> {
        let Some(relative) = layout::relative_to(&self.drop_root, candidate) else {
            trace!(target: "ingest::claim", path = %candidate.display(), "candidate outside drop root");
            return Ok(None);
        };
        if relative.as_os_str().is_empty() {
            return Ok(None);
        }
        if !self.monitor_subdirectories && relative.components().count() > 1 {
            trace!(target: "ingest::claim", path = %candidate.display(), "nested candidate ignored");
            return Ok(None);
        }

        let source = self.drop_root.join(&relative);
        match fs::symlink_metadata(&source) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(err) if is_race_loss(&err) => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        if !self.filter.include_file(&source) {
            trace!(target: "ingest::claim", path = %source.display(), "candidate rejected by filter");
            return Ok(None);
        }

        let relative_dir = relative.parent().unwrap_or_else(|| Path::new(""));
        let target_dir = layout::render(&self.in_progress, relative_dir);
        fs::create_dir_all(&target_dir)?;
        let Some(file_name) = relative.file_name() else {
            return Ok(None);
        };
        let target = target_dir.join(file_name);

        if target.exists() {
            debug!(
                target: "ingest::claim",
                path = %source.display(),
                claimed = %target.display(),
                "in-progress slot already occupied, leaving candidate in place"
            );
            return Ok(None);
        }

        if let Err(err) = fs::rename(&source, &target) {
            if is_race_loss(&err) {
                debug!(target: "ingest::claim", path = %source.display(), "claim lost to a concurrent consumer");
                return Ok(None);
            }
            return Err(err.into());
        }

        // Claim age is measured from the rename, not from when the file was written.
        if let Err(err) = touch(&target) {
            debug!(target: "ingest::claim", path = %target.display(), error = %err, "could not stamp claim time");
        }

        debug!(
            target: "ingest::claim",
            path = %source.display(),
            claimed = %target.display(),
            "file claimed"
        );
        Ok(Some(ProcessingFile::new(target, relative, source)))
    }
}

fn is_race_loss(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::AlreadyExists
    )
}

fn touch(path: &Path) -> io::Result<()> {
    fs::OpenOptions::new()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{AcceptAll, ExcludeSegmentsFilter};
    use std::time::Duration;
    use tempfile::tempdir;

    fn claimer(root: &Path, recursive: bool) -> Claimer {
        Claimer::new(
            root.join("drop"),
            root.join("inprog"),
            recursive,
            Arc::new(AcceptAll),
        )
    }

    #[test]
    fn claims_nested_file_preserving_structure() {
        let tmp = tempdir().unwrap();
        let claimer = claimer(tmp.path(), true);
        let dropped = tmp.path().join("drop/a/b/report.csv");
        fs::create_dir_all(dropped.parent().unwrap()).unwrap();
        fs::write(&dropped, "x").unwrap();

        let file = claimer.claim(&dropped).unwrap().expect("claimed");
        assert_eq!(file.current_path(), tmp.path().join("inprog/a/b/report.csv"));
        assert_eq!(file.original_path(), Path::new("a/b/report.csv"));
        assert_eq!(file.original_full_path(), dropped.as_path());
        assert_eq!(file.relative_dir(), Path::new("a/b"));
        assert!(!dropped.exists());
        assert_eq!(fs::read_to_string(file.current_path()).unwrap(), "x");
    }

    #[test]
    fn second_claim_of_same_file_is_silently_skipped() {
        let tmp = tempdir().unwrap();
        let claimer = claimer(tmp.path(), false);
        let dropped = tmp.path().join("drop/one.csv");
        fs::create_dir_all(dropped.parent().unwrap()).unwrap();
        fs::write(&dropped, "x").unwrap();

        assert!(claimer.claim(&dropped).unwrap().is_some());
        assert!(claimer.claim(&dropped).unwrap().is_none());
    }

    #[test]
    fn nested_files_ignored_without_subdirectory_monitoring() {
        let tmp = tempdir().unwrap();
        let claimer = claimer(tmp.path(), false);
        let dropped = tmp.path().join("drop/a/one.csv");
        fs::create_dir_all(dropped.parent().unwrap()).unwrap();
        fs::write(&dropped, "x").unwrap();

        assert!(claimer.claim(&dropped).unwrap().is_none());
        assert!(dropped.exists());
    }

    #[test]
    fn occupied_slot_leaves_candidate_in_drop() {
        let tmp = tempdir().unwrap();
        let claimer = claimer(tmp.path(), false);
        let dropped = tmp.path().join("drop/one.csv");
        fs::create_dir_all(dropped.parent().unwrap()).unwrap();
        fs::create_dir_all(tmp.path().join("inprog")).unwrap();
        fs::write(&dropped, "new").unwrap();
        fs::write(tmp.path().join("inprog/one.csv"), "old").unwrap();

        assert!(claimer.claim(&dropped).unwrap().is_none());
        assert_eq!(fs::read_to_string(&dropped).unwrap(), "new");
        assert_eq!(fs::read_to_string(tmp.path().join("inprog/one.csv")).unwrap(), "old");
    }

    #[test]
    fn filtered_file_stays_put() {
        let tmp = tempdir().unwrap();
        let claimer = Claimer::new(
            tmp.path().join("drop"),
            tmp.path().join("inprog"),
            true,
            Arc::new(ExcludeSegmentsFilter::new(["skip"], false)),
        );
        let excluded = tmp.path().join("drop/skip/one.csv");
        let included = tmp.path().join("drop/keep/one.csv");
        for path in [&excluded, &included] {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "x").unwrap();
        }

        assert!(claimer.claim(&excluded).unwrap().is_none());
        assert!(excluded.exists());
        assert!(claimer.claim(&included).unwrap().is_some());
    }

    #[test]
    fn claim_resets_modification_time() {
        let tmp = tempdir().unwrap();
        let claimer = claimer(tmp.path(), false);
        let dropped = tmp.path().join("drop/old.csv");
        fs::create_dir_all(dropped.parent().unwrap()).unwrap();
        fs::write(&dropped, "x").unwrap();
        let long_ago = SystemTime::now() - Duration::from_secs(3_600);
        fs::OpenOptions::new()
            .write(true)
            .open(&dropped)
            .unwrap()
            .set_modified(long_ago)
            .unwrap();

        let file = claimer.claim(&dropped).unwrap().unwrap();
        let modified = fs::metadata(file.current_path()).unwrap().modified().unwrap();
        assert!(modified.elapsed().unwrap_or_default() < Duration::from_secs(60));
    }
}
