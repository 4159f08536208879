//! Directory layout helpers for `%filepath%` path templates.
//!
//! In-progress, success and failure locations may embed the `%filepath%` token as
//! a whole path segment. At the point of use the token is replaced by the claimed
//! file's directory relative to the drop root, so routed files keep the structure
//! they were dropped with. Templates without the token get the relative directory
//! appended instead.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Placeholder substituted with the original file's relative directory.
pub const FILEPATH_TOKEN: &str = "%filepath%";

/// Number of `%filepath%` segments in a template.
pub fn token_count(template: &Path) -> usize {
    template
        .components()
        .filter(|component| is_token(component.as_os_str()))
        .count()
}

/// True when the token appears inside a segment instead of forming one.
pub fn has_embedded_token(template: &Path) -> bool {
    template.components().any(|component| {
        let segment = component.as_os_str();
        !is_token(segment) && segment.to_string_lossy().contains(FILEPATH_TOKEN)
    })
}

/// Resolve a template against a relative directory.
pub fn render(template: &Path, relative_dir: &Path) -> PathBuf {
    let mut rendered = PathBuf::new();
    let mut substituted = false;
    for component in template.components() {
        if is_token(component.as_os_str()) {
            push_relative(&mut rendered, relative_dir);
            substituted = true;
        } else {
            rendered.push(component.as_os_str());
        }
    }
    if !substituted {
        push_relative(&mut rendered, relative_dir);
    }
    rendered
}

/// The fixed part of a template: every segment before the first token.
pub fn template_root(template: &Path) -> PathBuf {
    let mut root = PathBuf::new();
    for component in template.components() {
        if is_token(component.as_os_str()) {
            break;
        }
        root.push(component.as_os_str());
    }
    root
}

/// Inverse of [`render`]: recover the relative directory that produced `dir`.
///
/// Returns `None` when `dir` was not produced by this template.
pub fn relative_dir_for(template: &Path, dir: &Path) -> Option<PathBuf> {
    let template_parts: Vec<_> = template.components().collect();
    let dir_parts: Vec<_> = dir.components().collect();

    let token_at = template_parts
        .iter()
        .position(|component| is_token(component.as_os_str()));

    let (prefix, suffix) = match token_at {
        Some(index) => (&template_parts[..index], &template_parts[index + 1..]),
        None => (&template_parts[..], &[][..]),
    };

    if dir_parts.len() < prefix.len() + suffix.len() || !dir_parts.starts_with(prefix) {
        return None;
    }
    if !dir_parts.ends_with(suffix) {
        return None;
    }

    let middle = &dir_parts[prefix.len()..dir_parts.len() - suffix.len()];
    let mut relative = PathBuf::new();
    for component in middle {
        match component {
            Component::Normal(segment) => relative.push(segment),
            _ => return None,
        }
    }
    Some(relative)
}

/// Sanitised relative path of `path` beneath `root`.
///
/// Rejects paths outside `root` and paths that climb out of it through `..`.
pub fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    let rel = path.strip_prefix(root).ok()?;
    let mut clean = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(segment) => clean.push(segment),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(clean)
}

fn push_relative(target: &mut PathBuf, relative_dir: &Path) {
    for component in relative_dir.components() {
        if let Component::Normal(segment) = component {
            target.push(segment);
        }
    }
}

fn is_token(segment: &OsStr) -> bool {
    segment == OsStr::new(FILEPATH_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_token_segment() {
        let rendered = render(Path::new("/fail/%filepath%/rejected"), Path::new("a/b"));
        assert_eq!(rendered, PathBuf::from("/fail/a/b/rejected"));
    }

    #[test]
    fn render_collapses_empty_relative_dir() {
        let rendered = render(Path::new("/fail/%filepath%/rejected"), Path::new(""));
        assert_eq!(rendered, PathBuf::from("/fail/rejected"));
    }

    #[test]
    fn render_appends_when_token_missing() {
        assert_eq!(
            render(Path::new("/inprog"), Path::new("a/b")),
            PathBuf::from("/inprog/a/b")
        );
    }

    #[test]
    fn relative_dir_round_trips_through_suffix() {
        let template = Path::new("/work/%filepath%/claimed");
        let dir = render(template, Path::new("x/y"));
        assert_eq!(
            relative_dir_for(template, &dir),
            Some(PathBuf::from("x/y"))
        );
        assert_eq!(relative_dir_for(template, Path::new("/elsewhere/x")), None);
    }

    #[test]
    fn template_root_stops_at_token() {
        assert_eq!(
            template_root(Path::new("/work/%filepath%/claimed")),
            PathBuf::from("/work")
        );
        assert_eq!(template_root(Path::new("/work/claimed")), PathBuf::from("/work/claimed"));
    }

    #[test]
    fn embedded_token_is_detected() {
        assert!(has_embedded_token(Path::new("/fail/x%filepath%")));
        assert!(!has_embedded_token(Path::new("/fail/%filepath%")));
        assert_eq!(token_count(Path::new("/a/%filepath%/b/%filepath%")), 2);
    }

    #[test]
    fn relative_to_rejects_escape() {
        assert_eq!(
            relative_to(Path::new("/drop"), Path::new("/drop/a/../b/c.csv")),
            Some(PathBuf::from("b/c.csv"))
        );
        assert_eq!(relative_to(Path::new("/drop"), Path::new("/other/c.csv")), None);
    }
}
