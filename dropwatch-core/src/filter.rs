//! Eligibility predicates applied to discovered paths before a claim is attempted.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobMatcher};

use crate::error::{IngestError, Result};

/// Decides whether a discovered path may be claimed.
///
/// Implementations must never panic on odd input; anything that cannot be
/// inspected is simply excluded.
pub trait FileFilter: Send + Sync + fmt::Debug {
    fn include_file(&self, path: &Path) -> bool;
}

/// Default filter: every path is eligible.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl FileFilter for AcceptAll {
    fn include_file(&self, _path: &Path) -> bool {
        true
    }
}

/// Rejects paths that pass through any of the configured directory names.
///
/// With [`below`](Self::below) only the segments under that root are tested,
/// so a drop folder living somewhere under `/data/archive` is not excluded by
/// an `archive` segment.
#[derive(Debug, Clone)]
pub struct ExcludeSegmentsFilter {
    segments: Vec<String>,
    case_insensitive: bool,
    root: Option<PathBuf>,
}

impl ExcludeSegmentsFilter {
    pub fn new<I, S>(segments: I, case_insensitive: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments
            .into_iter()
            .map(Into::into)
            .filter(|segment: &String| !segment.is_empty())
            .map(|segment| {
                if case_insensitive {
                    segment.to_lowercase()
                } else {
                    segment
                }
            })
            .collect();
        Self {
            segments,
            case_insensitive,
            root: None,
        }
    }

    pub fn below(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn is_excluded_segment(&self, segment: &str) -> bool {
        if self.case_insensitive {
            let lowered = segment.to_lowercase();
            self.segments.iter().any(|excluded| *excluded == lowered)
        } else {
            self.segments.iter().any(|excluded| excluded == segment)
        }
    }
}

impl FileFilter for ExcludeSegmentsFilter {
    fn include_file(&self, path: &Path) -> bool {
        if std::fs::metadata(path).is_err() {
            return false;
        }

        let scoped = self
            .root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);
        let Some(parent) = scoped.parent() else {
            return true;
        };

        !parent.components().any(|component| match component {
            Component::Normal(segment) => self.is_excluded_segment(&segment.to_string_lossy()),
            _ => false,
        })
    }
}

/// Matches the file name against the endpoint's inclusion pattern (`*.csv`).
#[derive(Clone)]
pub struct PatternFilter {
    pattern: String,
    matcher: GlobMatcher,
}

impl PatternFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = if pattern.trim().is_empty() {
            "*"
        } else {
            pattern.trim()
        };
        let glob = Glob::new(pattern).map_err(|err| {
            IngestError::Config(format!("invalid filter pattern {pattern:?}: {err}"))
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Debug for PatternFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternFilter")
            .field("pattern", &self.pattern)
            .finish()
    }
}

impl FileFilter for PatternFilter {
    fn include_file(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.matcher.is_match(Path::new(name)))
    }
}

/// Accepts a path only when every inner filter accepts it.
#[derive(Debug, Clone, Default)]
pub struct AllOf(Vec<Arc<dyn FileFilter>>);

impl AllOf {
    pub fn new(filters: Vec<Arc<dyn FileFilter>>) -> Self {
        Self(filters)
    }
}

impl FileFilter for AllOf {
    fn include_file(&self, path: &Path) -> bool {
        self.0.iter().all(|filter| filter.include_file(path))
    }
}
