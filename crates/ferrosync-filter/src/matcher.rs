//! Multi-strategy file name matcher
//!
//! A pattern is tried against a candidate with a fixed sequence of strategies and the first
//! one that succeeds decides the match:
//!
//! 1. exact (case-normalized) basename equality
//! 2. extension shorthand `*.ext`
//! 3. prefix shorthand `prefix*`
//! 4. deep-path patterns containing `**`, against the full relative path
//! 5. `*`/`?` wildcards translated to an anchored regex, against the basename
//! 6. full glob syntax, against the basename and then the full path
//!
//! Compiling a [`Pattern`] once and reusing it is the fast path; [`matches`] compiles on
//! every call.

use ferrosync_types::{Error, Result};
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use std::fmt;
use tracing::debug;

const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}'];

/// Matching options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    /// Compare names case-sensitively
    pub case_sensitive: bool,
    /// Let patterns match hidden (dot) files
    pub dot: bool,
    /// Match slash-free patterns against the basename rather than the full path
    pub match_base: bool,
    /// Log the strategy that decided each match
    pub debug: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            dot: true,
            match_base: true,
            debug: false,
        }
    }
}

/// The strategy that produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Basename equality
    Exact,
    /// `*.ext` shorthand
    Extension,
    /// `prefix*` shorthand
    Prefix,
    /// `**` pattern against the full path
    DeepPath,
    /// Wildcard regex against the basename
    Wildcard,
    /// Glob fallback
    Glob,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exact => "exact",
            Self::Extension => "extension",
            Self::Prefix => "prefix",
            Self::DeepPath => "deep-path",
            Self::Wildcard => "wildcard",
            Self::Glob => "glob",
        };
        f.write_str(name)
    }
}

/// A compiled file pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    normalized: String,
    options: MatchOptions,
    extension: Option<String>,
    prefix: Option<String>,
    deep: Option<GlobMatcher>,
    wildcard: Option<Regex>,
    glob: GlobMatcher,
}

impl Pattern {
    /// Compile a pattern
    pub fn new(pattern: &str, options: MatchOptions) -> Result<Self> {
        let normalized = normalize(pattern.trim(), options.case_sensitive);
        if normalized.is_empty() {
            return Err(Error::Pattern {
                pattern: pattern.to_string(),
                message: "pattern is empty".to_string(),
            });
        }

        let extension = normalized
            .strip_prefix("*.")
            .filter(|rest| is_literal_segment(rest))
            .map(|rest| format!(".{rest}"));

        let prefix = normalized
            .strip_suffix('*')
            .filter(|head| is_literal_segment(head))
            .map(str::to_string);

        let deep = if normalized.contains("**") {
            Some(compile_glob(pattern, &normalized)?)
        } else {
            None
        };

        let wildcard = if !normalized.contains('/')
            && normalized.contains(['*', '?'])
            && !normalized.contains(['[', ']', '{', '}'])
        {
            Some(compile_wildcard(pattern, &normalized)?)
        } else {
            None
        };

        let glob = compile_glob(pattern, &normalized)?;

        Ok(Self {
            raw: pattern.to_string(),
            normalized,
            options,
            extension,
            prefix,
            deep,
            wildcard,
            glob,
        })
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains a path separator
    pub fn has_separator(&self) -> bool {
        self.normalized.contains('/')
    }

    /// Whether the candidate path matches
    pub fn matches(&self, path: &str) -> bool {
        self.explain(path).is_some()
    }

    /// The strategy that matched the candidate path, if any
    pub fn explain(&self, path: &str) -> Option<MatchStrategy> {
        let strategy = self.evaluate(path);
        if self.options.debug {
            match strategy {
                Some(strategy) => debug!(
                    pattern = %self.raw,
                    file = path,
                    %strategy,
                    "pattern matched"
                ),
                None => debug!(pattern = %self.raw, file = path, "pattern did not match"),
            }
        }
        strategy
    }

    fn evaluate(&self, path: &str) -> Option<MatchStrategy> {
        let full = normalize(path, self.options.case_sensitive);
        let full = full.trim_start_matches("./").trim_end_matches('/');
        let base = basename(full);

        if !self.options.dot && self.hides(full) {
            return None;
        }

        let subject = if self.options.match_base { base } else { full };

        if subject == self.normalized {
            return Some(MatchStrategy::Exact);
        }
        if self
            .extension
            .as_deref()
            .is_some_and(|ext| subject.ends_with(ext))
        {
            return Some(MatchStrategy::Extension);
        }
        if self
            .prefix
            .as_deref()
            .is_some_and(|prefix| subject.starts_with(prefix))
        {
            return Some(MatchStrategy::Prefix);
        }
        if self.deep.as_ref().is_some_and(|deep| deep.is_match(full)) {
            return Some(MatchStrategy::DeepPath);
        }
        if self
            .wildcard
            .as_ref()
            .is_some_and(|wildcard| wildcard.is_match(subject))
        {
            return Some(MatchStrategy::Wildcard);
        }
        if (self.options.match_base && self.glob.is_match(base)) || self.glob.is_match(full) {
            return Some(MatchStrategy::Glob);
        }
        None
    }

    /// Whether `path` has a hidden segment, at any depth, that the pattern does not name.
    /// A pattern segment names a hidden one when it starts with `.` and is either equal to
    /// it or contains a wildcard.
    fn hides(&self, path: &str) -> bool {
        let named: Vec<&str> = self
            .normalized
            .split('/')
            .filter(|segment| segment.starts_with('.'))
            .collect();
        path.split('/')
            .filter(|segment| segment.starts_with('.') && *segment != "." && *segment != "..")
            .any(|segment| {
                !named
                    .iter()
                    .any(|p| *p == segment || p.contains(['*', '?', '[']))
            })
    }
}

/// Match one candidate against one pattern; invalid patterns never match
pub fn matches(filename: &str, pattern: &str, options: &MatchOptions) -> bool {
    match Pattern::new(pattern, *options) {
        Ok(pattern) => pattern.matches(filename),
        Err(error) => {
            debug!(%error, "ignoring invalid pattern");
            false
        }
    }
}

fn normalize(value: &str, case_sensitive: bool) -> String {
    let value = value.replace('\\', "/");
    if case_sensitive {
        value
    } else {
        value.to_lowercase()
    }
}

fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[index + 1..],
        None => path,
    }
}

fn is_literal_segment(value: &str) -> bool {
    !value.is_empty() && !value.contains(GLOB_META) && !value.contains('/')
}

fn compile_glob(raw: &str, normalized: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(normalized)
        .literal_separator(true)
        .backslash_escape(false)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| Error::Pattern {
            pattern: raw.to_string(),
            message: e.to_string(),
        })
}

fn compile_wildcard(raw: &str, normalized: &str) -> Result<Regex> {
    let mut expression = String::with_capacity(normalized.len() + 8);
    expression.push('^');
    for c in normalized.chars() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expression.push('$');

    Regex::new(&expression).map_err(|e| Error::Pattern {
        pattern: raw.to_string(),
        message: e.to_string(),
    })
}
