//! File filtering for FerroSync
//!
//! [`Pattern`] is the multi-strategy matcher, [`FileFilter`] combines include and exclude
//! patterns with optional size/date bounds.
//!
//! # Examples
//!
//! ```rust
//! use ferrosync_filter::FileFilter;
//!
//! let filter = FileFilter::names_only(&["*.csv", "!*_tmp.csv"]).unwrap();
//! assert!(filter.accepts_name("daily.csv", false));
//! assert!(!filter.accepts_name("daily_tmp.csv", false));
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod filter;
pub mod matcher;

pub use filter::{should_exclude, should_include, FileFilter, FilterBounds};
pub use matcher::{matches, MatchOptions, MatchStrategy, Pattern};
