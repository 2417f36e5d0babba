//! Source location records and the file-id table

use std::collections::HashMap;

use serde::Serialize;

/// Source position carried on instructions for diagnostics and debugging.
///
/// A component of `0` means "unknown"; [`SourceLoc::UNKNOWN`] is all zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct SourceLoc {
    /// File id from a [`SourceManager`] (0 = unknown)
    pub file: u32,
    /// Line number (1-indexed, 0 = unknown)
    pub line: u32,
    /// Column number (1-indexed, 0 = unknown)
    pub col: u32,
}

impl SourceLoc {
    /// The unknown location
    pub const UNKNOWN: SourceLoc = SourceLoc {
        file: 0,
        line: 0,
        col: 0,
    };

    /// Create a fully known location
    pub fn new(file: u32, line: u32, col: u32) -> Self {
        SourceLoc { file, line, col }
    }

    /// True when at least a file and a line are known
    pub fn is_known(&self) -> bool {
        self.file != 0 && self.line != 0
    }
}

/// Interns file paths to dense non-zero ids.
///
/// Id 0 is reserved for "unknown" so a zeroed [`SourceLoc`] is always safe.
#[derive(Debug, Default, Clone)]
pub struct SourceManager {
    paths: Vec<String>,
    map: HashMap<String, u32>,
}

impl SourceManager {
    /// Create an empty file table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a path, returning its non-zero file id
    pub fn intern(&mut self, path: &str) -> u32 {
        if let Some(&id) = self.map.get(path) {
            return id;
        }
        self.paths.push(path.to_string());
        let id = self.paths.len() as u32;
        self.map.insert(path.to_string(), id);
        id
    }

    /// Resolve a file id back to its path
    pub fn path(&self, id: u32) -> Option<&str> {
        if id == 0 {
            return None;
        }
        self.paths.get(id as usize - 1).map(|s| s.as_str())
    }

    /// Number of registered files
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// True when no file has been registered
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Normalize a path for breakpoint comparison: both `\` and `/` are accepted
/// as separators, and `.`/`..` components are collapsed.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let mut out = String::new();
    if path.starts_with(['/', '\\']) {
        out.push('/');
    }
    out.push_str(&parts.join("/"));
    out
}

/// Final component of a path, used as the breakpoint fallback comparison
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_ids_are_nonzero_and_stable() {
        let mut files = SourceManager::new();
        let a = files.intern("foo.bas");
        let b = files.intern("bar.bas");
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(files.intern("foo.bas"), a);
        assert_eq!(files.path(a), Some("foo.bas"));
        assert_eq!(files.path(0), None);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a\\b\\c.il"), "a/b/c.il");
        assert_eq!(normalize_path("./a/./b.il"), "a/b.il");
        assert_eq!(normalize_path("a/x/../b.il"), "a/b.il");
        assert_eq!(normalize_path("/abs/./p.il"), "/abs/p.il");
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("dir/sub/foo.il"), "foo.il");
        assert_eq!(basename("dir\\foo.il"), "foo.il");
        assert_eq!(basename("foo.il"), "foo.il");
    }
}
