//! Repository path canonicalization.
//!
//! Canonical paths are `/`-separated, relative to the repository root, and
//! carry no leading slash, empty segments, `.` or `..`.

/// Canonicalize a repository path, or `None` if it cannot name a file.
pub fn canonicalize(path: &str) -> Option<String> {
    let normalized = path.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" => continue,
            "." | ".." => return None,
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

/// Strip a directory prefix from a canonical path.
///
/// `directory` is canonicalized first; an empty directory matches everything.
pub fn strip_directory<'a>(path: &'a str, directory: &str) -> Option<&'a str> {
    let Some(directory) = canonicalize(directory) else {
        return Some(path);
    };
    path.strip_prefix(directory.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
}
