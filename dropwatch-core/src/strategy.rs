//! Terminal handling strategies applied by the outcome router.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::claim::ProcessingFile;
use crate::error::{IngestError, Result};
use crate::layout;
use crate::retry::{RetryPolicy, retry_io};

/// Moves a claimed file to its terminal location.
///
/// Returns the file's final path, or `None` when it no longer exists anywhere
/// (deleted).
#[async_trait]
pub trait HandlingStrategy: Send + Sync + fmt::Debug {
    async fn apply(&self, file: &ProcessingFile) -> Result<Option<PathBuf>>;
}

/// Deletes the claimed file.
#[derive(Debug, Clone, Default)]
pub struct DeleteStrategy {
    retry: RetryPolicy,
}

impl DeleteStrategy {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }
}

#[async_trait]
impl HandlingStrategy for DeleteStrategy {
    async fn apply(&self, file: &ProcessingFile) -> Result<Option<PathBuf>> {
        let path = file.current_path();
        match retry_io(&self.retry, "delete", path, || fs::remove_file(path)).await {
            Ok(()) => Ok(None),
            Err(IngestError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                debug!(target: "ingest::router", path = %path.display(), "file already gone before delete");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Moves the claimed file beneath a (possibly templated) target directory,
/// recreating the original relative directory.
#[derive(Debug, Clone)]
pub struct MoveStrategy {
    target: PathBuf,
    retry: RetryPolicy,
}

impl MoveStrategy {
    pub fn new(target: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            target: target.into(),
            retry,
        }
    }
}

#[async_trait]
impl HandlingStrategy for MoveStrategy {
    async fn apply(&self, file: &ProcessingFile) -> Result<Option<PathBuf>> {
        let source = file.current_path();
        let destination = destination_for(&self.target, file)?;

        let dest = match placement(source, &destination).await? {
            Placement::Duplicate(existing) => {
                warn!(
                    target: "ingest::router",
                    path = %source.display(),
                    destination = %existing.display(),
                    "identical file already at destination; discarding claimed copy"
                );
                match retry_io(&self.retry, "discard duplicate", source, || fs::remove_file(source))
                    .await
                {
                    Ok(()) => {}
                    Err(IngestError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err),
                }
                return Ok(Some(existing));
            }
            Placement::Free(dest) => dest,
        };

        ensure_parent(&dest, &self.retry).await?;
        retry_io(&self.retry, "move", source, || move_file(source, &dest)).await?;
        debug!(
            target: "ingest::router",
            path = %source.display(),
            destination = %dest.display(),
            "file moved"
        );
        Ok(Some(dest))
    }
}

/// Copies the claimed file beneath a target directory, leaving the original.
///
/// Meant to be combined with [`DeleteStrategy`] for copy-then-delete routing.
#[derive(Debug, Clone)]
pub struct CopyStrategy {
    target: PathBuf,
    retry: RetryPolicy,
}

impl CopyStrategy {
    pub fn new(target: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            target: target.into(),
            retry,
        }
    }
}

#[async_trait]
impl HandlingStrategy for CopyStrategy {
    async fn apply(&self, file: &ProcessingFile) -> Result<Option<PathBuf>> {
        let source = file.current_path();
        let destination = destination_for(&self.target, file)?;

        let dest = match placement(source, &destination).await? {
            Placement::Duplicate(existing) => {
                warn!(
                    target: "ingest::router",
                    path = %source.display(),
                    destination = %existing.display(),
                    "identical copy already at destination"
                );
                return Ok(Some(existing));
            }
            Placement::Free(dest) => dest,
        };

        ensure_parent(&dest, &self.retry).await?;
        retry_io(&self.retry, "copy", source, || fs::copy(source, &dest)).await?;
        Ok(Some(dest))
    }
}

/// Applies several strategies in order, stopping at the first failure.
///
/// The reported final path is the last one produced by any step.
#[derive(Debug, Clone, Default)]
pub struct CombinedStrategy {
    steps: Vec<Arc<dyn HandlingStrategy>>,
}

impl CombinedStrategy {
    pub fn new(steps: Vec<Arc<dyn HandlingStrategy>>) -> Self {
        Self { steps }
    }
}

#[async_trait]
impl HandlingStrategy for CombinedStrategy {
    async fn apply(&self, file: &ProcessingFile) -> Result<Option<PathBuf>> {
        let mut final_path = None;
        for step in &self.steps {
            if let Some(path) = step.apply(file).await? {
                final_path = Some(path);
            }
        }
        Ok(final_path)
    }
}

fn destination_for(template: &Path, file: &ProcessingFile) -> Result<PathBuf> {
    let file_name = file.file_name().ok_or_else(|| {
        IngestError::Internal(format!(
            "claimed file {} has no file name",
            file.current_path().display()
        ))
    })?;
    Ok(layout::render(template, file.relative_dir()).join(file_name))
}

/// Alternate names tried before a collision is reported as an error.
const MAX_ALTERNATE_NAMES: u32 = 1_000;

#[derive(Debug, PartialEq, Eq)]
enum Placement {
    /// Nothing lives at this path yet.
    Free(PathBuf),
    /// A byte-identical file already lives at this path.
    Duplicate(PathBuf),
}

/// Pick where `source` should land given the preferred `destination`.
///
/// An occupied destination holding the same bytes means an earlier partial run
/// already placed the file. Different content is never overwritten or
/// discarded; the file gets the first free `name-N.ext` instead.
async fn placement(source: &Path, destination: &Path) -> Result<Placement> {
    if !fs::try_exists(destination).await? {
        return Ok(Placement::Free(destination.to_path_buf()));
    }
    if same_contents(source, destination).await? {
        return Ok(Placement::Duplicate(destination.to_path_buf()));
    }

    for n in 1..=MAX_ALTERNATE_NAMES {
        let candidate = alternate_name(destination, n);
        if !fs::try_exists(&candidate).await? {
            warn!(
                target: "ingest::router",
                path = %source.display(),
                destination = %destination.display(),
                alternate = %candidate.display(),
                "destination holds a different file; using alternate name"
            );
            return Ok(Placement::Free(candidate));
        }
        if same_contents(source, &candidate).await? {
            return Ok(Placement::Duplicate(candidate));
        }
    }

    Err(IngestError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!(
            "no free name for {} after {MAX_ALTERNATE_NAMES} attempts",
            destination.display()
        ),
    )))
}

/// `dir/report.csv` → `dir/report-3.csv`.
fn alternate_name(path: &Path, n: u32) -> PathBuf {
    let mut name = path
        .file_stem()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(format!("-{n}"));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

async fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    let (a, b) = (a.to_path_buf(), b.to_path_buf());
    tokio::task::spawn_blocking(move || {
        let (meta_a, meta_b) = (std::fs::metadata(&a)?, std::fs::metadata(&b)?);
        if !meta_b.is_file() || meta_a.len() != meta_b.len() {
            return Ok(false);
        }

        let mut reader_a = BufReader::new(std::fs::File::open(&a)?);
        let mut reader_b = BufReader::new(std::fs::File::open(&b)?);
        let mut buf_a = [0u8; 8 * 1024];
        let mut buf_b = [0u8; 8 * 1024];
        let mut remaining = meta_a.len();
        while remaining > 0 {
            let chunk = remaining.min(buf_a.len() as u64) as usize;
            reader_a.read_exact(&mut buf_a[..chunk])?;
            reader_b.read_exact(&mut buf_b[..chunk])?;
            if buf_a[..chunk] != buf_b[..chunk] {
                return Ok(false);
            }
            remaining -= chunk as u64;
        }
        Ok(true)
    })
    .await
    .map_err(io::Error::other)?
}

async fn ensure_parent(destination: &Path, retry: &RetryPolicy) -> Result<()> {
    let Some(parent) = destination.parent() else {
        return Ok(());
    };
    retry_io(retry, "create directory", parent, || fs::create_dir_all(parent)).await
}

/// Rename, falling back to copy + remove when the target is on another volume.
pub(crate) async fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination).await {
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(source, destination).await?;
            fs::remove_file(source).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(1),
        }
    }

    async fn claimed(root: &Path, relative: &str) -> ProcessingFile {
        let current = root.join("inprog").join(relative);
        fs::create_dir_all(current.parent().unwrap()).await.unwrap();
        fs::write(&current, "x").await.unwrap();
        ProcessingFile::new(current, relative, root.join("drop").join(relative))
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let tmp = tempdir().unwrap();
        let file = claimed(tmp.path(), "a.csv").await;
        let result = DeleteStrategy::new(policy()).apply(&file).await.unwrap();
        assert_eq!(result, None);
        assert!(!file.current_path().exists());
    }

    #[tokio::test]
    async fn move_substitutes_filepath_token() {
        let tmp = tempdir().unwrap();
        let file = claimed(tmp.path(), "a/b/report.csv").await;
        let target = tmp.path().join("fail/%filepath%/rejected");
        let moved = MoveStrategy::new(&target, policy()).apply(&file).await.unwrap();
        let expected = tmp.path().join("fail/a/b/rejected/report.csv");
        assert_eq!(moved, Some(expected.clone()));
        assert!(expected.exists());
        assert!(!file.current_path().exists());
    }

    #[tokio::test]
    async fn move_without_token_keeps_relative_structure() {
        let tmp = tempdir().unwrap();
        let file = claimed(tmp.path(), "a/b/report.csv").await;
        let moved = MoveStrategy::new(tmp.path().join("ok"), policy())
            .apply(&file)
            .await
            .unwrap();
        assert_eq!(moved, Some(tmp.path().join("ok/a/b/report.csv")));
    }

    #[tokio::test]
    async fn identical_file_at_destination_is_treated_as_handled() {
        let tmp = tempdir().unwrap();
        let file = claimed(tmp.path(), "dup.csv").await;
        fs::create_dir_all(tmp.path().join("fail")).await.unwrap();
        fs::write(tmp.path().join("fail/dup.csv"), "x").await.unwrap();

        let moved = MoveStrategy::new(tmp.path().join("fail"), policy())
            .apply(&file)
            .await
            .unwrap();
        assert_eq!(moved, Some(tmp.path().join("fail/dup.csv")));
        assert!(!file.current_path().exists());
        assert!(!tmp.path().join("fail/dup-1.csv").exists());
    }

    #[tokio::test]
    async fn different_file_at_destination_is_kept_alongside() {
        let tmp = tempdir().unwrap();
        let file = claimed(tmp.path(), "dup.csv").await;
        fs::create_dir_all(tmp.path().join("fail")).await.unwrap();
        fs::write(tmp.path().join("fail/dup.csv"), "earlier").await.unwrap();
        fs::write(tmp.path().join("fail/dup-1.csv"), "older still").await.unwrap();

        let moved = MoveStrategy::new(tmp.path().join("fail"), policy())
            .apply(&file)
            .await
            .unwrap();
        assert_eq!(moved, Some(tmp.path().join("fail/dup-2.csv")));
        assert_eq!(
            fs::read_to_string(tmp.path().join("fail/dup.csv")).await.unwrap(),
            "earlier"
        );
        assert_eq!(
            fs::read_to_string(tmp.path().join("fail/dup-2.csv")).await.unwrap(),
            "x"
        );
        assert!(!file.current_path().exists());
    }

    #[tokio::test]
    async fn copy_never_replaces_a_different_file() {
        let tmp = tempdir().unwrap();
        let file = claimed(tmp.path(), "c.csv").await;
        fs::create_dir_all(tmp.path().join("ok")).await.unwrap();
        fs::write(tmp.path().join("ok/c.csv"), "yesterday").await.unwrap();

        let copied = CopyStrategy::new(tmp.path().join("ok"), policy())
            .apply(&file)
            .await
            .unwrap();
        assert_eq!(copied, Some(tmp.path().join("ok/c-1.csv")));
        assert_eq!(
            fs::read_to_string(tmp.path().join("ok/c.csv")).await.unwrap(),
            "yesterday"
        );
        assert!(file.current_path().exists());
    }

    #[test]
    fn alternate_names_keep_the_extension() {
        assert_eq!(
            alternate_name(Path::new("/fail/a/report.csv"), 3),
            PathBuf::from("/fail/a/report-3.csv")
        );
        assert_eq!(
            alternate_name(Path::new("/fail/README"), 1),
            PathBuf::from("/fail/README-1")
        );
        assert_eq!(
            alternate_name(Path::new("/fail/data.tar.gz"), 2),
            PathBuf::from("/fail/data.tar-2.gz")
        );
    }

    #[tokio::test]
    async fn combined_copy_then_delete() {
        let tmp = tempdir().unwrap();
        let file = claimed(tmp.path(), "sub/c.csv").await;
        let combined = CombinedStrategy::new(vec![
            Arc::new(CopyStrategy::new(tmp.path().join("ok"), policy())),
            Arc::new(DeleteStrategy::new(policy())),
        ]);
        let result = combined.apply(&file).await.unwrap();
        assert_eq!(result, Some(tmp.path().join("ok/sub/c.csv")));
        assert!(tmp.path().join("ok/sub/c.csv").exists());
        assert!(!file.current_path().exists());
    }
}
