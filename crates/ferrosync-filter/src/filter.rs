//! Include/exclude file filtering
//!
//! Patterns in a schedule's `filePatterns` list are include patterns unless prefixed with
//! `!`, which turns them into exclude patterns. Exclusion always wins over inclusion. An
//! empty include list accepts every name.

use crate::matcher::{MatchOptions, Pattern};
use chrono::{DateTime, Utc};
use ferrosync_types::{Entry, Result};

/// Size and modification-time bounds applied to files (never to directories)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterBounds {
    /// Smallest accepted size in bytes
    pub min_size: Option<u64>,
    /// Largest accepted size in bytes
    pub max_size: Option<u64>,
    /// Reject files modified before this instant
    pub newer_than: Option<DateTime<Utc>>,
    /// Reject files modified after this instant
    pub older_than: Option<DateTime<Utc>>,
}

impl FilterBounds {
    /// Whether any bound is set
    pub fn is_empty(&self) -> bool {
        self.min_size.is_none()
            && self.max_size.is_none()
            && self.newer_than.is_none()
            && self.older_than.is_none()
    }

    /// Check an entry against the bounds.
    ///
    /// Entries without a modification time pass the date bounds.
    pub fn accepts(&self, entry: &Entry) -> bool {
        if self.min_size.is_some_and(|min| entry.size < min) {
            return false;
        }
        if self.max_size.is_some_and(|max| entry.size > max) {
            return false;
        }
        if let Some(modified) = entry.modified {
            if self.newer_than.is_some_and(|bound| modified < bound) {
                return false;
            }
            if self.older_than.is_some_and(|bound| modified > bound) {
                return false;
            }
        }
        true
    }
}

/// Compiled include/exclude filter
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    bounds: FilterBounds,
}

impl FileFilter {
    /// Build a filter from separate include and exclude lists
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S], options: MatchOptions) -> Result<Self> {
        Ok(Self {
            include: compile_all(include, options)?,
            exclude: compile_all(exclude, options)?,
            bounds: FilterBounds::default(),
        })
    }

    /// Build a name-only filter from a schedule pattern list, where `!pattern` excludes
    pub fn names_only<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            match pattern.strip_prefix('!') {
                Some(negated) => exclude.push(negated),
                None => include.push(pattern),
            }
        }
        Self::new(&include, &exclude, MatchOptions::default())
    }

    /// Attach size/date bounds
    #[must_use]
    pub fn with_bounds(mut self, bounds: FilterBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Whether the filter accepts everything
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.bounds.is_empty()
    }

    /// Whether the name passes the include stage
    pub fn should_include(&self, path: &str) -> bool {
        self.include.is_empty() || self.include.iter().any(|pattern| pattern.matches(path))
    }

    /// Whether the name is rejected by an exclude pattern
    pub fn should_exclude(&self, path: &str) -> bool {
        self.exclude.iter().any(|pattern| pattern.matches(path))
    }

    /// Name-level decision.
    ///
    /// Directories pass the include stage when any include pattern names a sub-path, so
    /// traversal can reach the files those patterns target.
    pub fn accepts_name(&self, path: &str, is_directory: bool) -> bool {
        if self.should_exclude(path) {
            return false;
        }
        if is_directory && self.include.iter().any(Pattern::has_separator) {
            return true;
        }
        self.should_include(path)
    }

    /// Full decision for a listed entry at the given relative path
    pub fn accepts(&self, path: &str, entry: &Entry) -> bool {
        if !self.accepts_name(path, entry.is_directory) {
            return false;
        }
        entry.is_directory || self.bounds.accepts(entry)
    }
}

/// Whether a name matches any include pattern; an empty list includes everything
pub fn should_include<S: AsRef<str>>(filename: &str, patterns: &[S], options: &MatchOptions) -> bool {
    patterns.is_empty()
        || patterns
            .iter()
            .any(|pattern| crate::matcher::matches(filename, pattern.as_ref(), options))
}

/// Whether a name matches any exclude pattern; an empty list excludes nothing
pub fn should_exclude<S: AsRef<str>>(filename: &str, patterns: &[S], options: &MatchOptions) -> bool {
    patterns
        .iter()
        .any(|pattern| crate::matcher::matches(filename, pattern.as_ref(), options))
}

fn compile_all<S: AsRef<str>>(patterns: &[S], options: MatchOptions) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|pattern| Pattern::new(pattern.as_ref(), options))
        .collect()
}
