//! Path layout of the coordination tree.
//!
//! The cluster-wide naming conventions live here and nowhere else:
//!
//! - membership: `<hosts>/<address>`
//! - collection to bundle mapping: `<collections>/<collection>/config=<bundle>`
//! - bundle files: `<configs>/<bundle>/<file>`
//!
//! Roots default to `/hosts`, `/collections` and `/configs` and can be moved
//! per deployment.

use config::PathRoots;

use crate::error::{CoordinationError, CoordinationResult};
use crate::models::{BundleName, CollectionName, HostAddress};

/// Prefix of the collection child that names its bundle.
pub const BUNDLE_MARKER_PREFIX: &str = "config=";

/// Logical roots of the coordination tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Root {
    Hosts,
    Collections,
    Configs,
}

impl std::fmt::Display for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Root::Hosts => write!(f, "hosts"),
            Root::Collections => write!(f, "collections"),
            Root::Configs => write!(f, "configs"),
        }
    }
}

/// All logical roots, for iteration.
pub const ALL_ROOTS: &[Root] = &[Root::Hosts, Root::Collections, Root::Configs];

/// Pure path builder: maps logical nodes to concrete tree paths.
///
/// Constructed from configuration. Validates that all roots are absolute,
/// distinct and free of empty segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    roots: PathRoots,
}

impl PathLayout {
    /// Create a layout from explicit roots.
    pub fn new(roots: PathRoots) -> CoordinationResult<Self> {
        let layout = Self { roots };
        layout.validate()?;
        Ok(layout)
    }

    /// Create a layout using the default roots.
    pub fn with_defaults() -> Self {
        Self {
            roots: PathRoots::default(),
        }
    }

    /// Resolve a logical root to its path.
    pub fn root(&self, root: Root) -> &str {
        match root {
            Root::Hosts => &self.roots.hosts,
            Root::Collections => &self.roots.collections,
            Root::Configs => &self.roots.configs,
        }
    }

    /// `<hosts>/<address>`
    pub fn membership(&self, address: &HostAddress) -> String {
        join(self.root(Root::Hosts), address.as_str())
    }

    /// `<collections>/<collection>`
    pub fn collection(&self, collection: &CollectionName) -> String {
        join(self.root(Root::Collections), collection.as_str())
    }

    /// `<configs>/<bundle>`
    pub fn bundle(&self, bundle: &BundleName) -> String {
        join(self.root(Root::Configs), bundle.as_str())
    }

    fn validate(&self) -> CoordinationResult<()> {
        for root in ALL_ROOTS {
            let path = self.root(*root);
            validate_path(path)?;
            if path == "/" {
                return Err(CoordinationError::Config(format!(
                    "{root} root must not be '/'"
                )));
            }
        }
        for (i, a) in ALL_ROOTS.iter().enumerate() {
            for b in &ALL_ROOTS[i + 1..] {
                if self.root(*a) == self.root(*b) {
                    return Err(CoordinationError::Config(format!(
                        "{a} and {b} roots are both '{}'",
                        self.root(*a)
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for PathLayout {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Extract the bundle name a collection child encodes, if any.
///
/// The bundle is everything after the first `=`.
pub fn bundle_marker(child: &str) -> Option<&str> {
    if !child.starts_with(BUNDLE_MARKER_PREFIX) {
        return None;
    }
    child.split_once('=').map(|(_, bundle)| bundle)
}

/// Join a parent path and a child name.
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Parent of an absolute path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of an absolute path.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Every proper ancestor of `path`, shallowest first, excluding the root.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out: Vec<&str> = path
        .match_indices('/')
        .filter(|(idx, _)| *idx > 0)
        .map(|(idx, _)| &path[..idx])
        .collect();
    out.dedup();
    out
}

/// Check that `path` is absolute with no empty, `.` or `..` segments and no
/// trailing slash.
pub fn validate_path(path: &str) -> CoordinationResult<()> {
    if !path.starts_with('/') {
        return Err(CoordinationError::invalid_path(path, "must start with '/'"));
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(CoordinationError::invalid_path(
            path,
            "must not end with '/'",
        ));
    }
    for segment in path[1..].split('/') {
        check_segment(segment).map_err(|reason| CoordinationError::invalid_path(path, reason))?;
    }
    Ok(())
}

/// Check that `segment` can stand as exactly one path component.
pub fn validate_segment(segment: &str) -> CoordinationResult<()> {
    check_segment(segment).map_err(|reason| CoordinationError::invalid_path(segment, reason))
}

fn check_segment(segment: &str) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("empty path segment");
    }
    if segment == "." || segment == ".." {
        return Err("relative path segment");
    }
    if segment.contains('/') {
        return Err("segment contains '/'");
    }
    if segment.chars().any(char::is_control) {
        return Err("segment contains control characters");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
