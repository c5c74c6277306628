//! Segmented filenames as carried in OFT headers.
//!
//! A transferred name is a relative path whose components travel joined by
//! `0x01` rather than a platform separator, so neither side has to guess the
//! other's path syntax.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Separator between path segments on the wire.
pub const SEGMENT_SEPARATOR: char = '\u{1}';

/// A relative filename split into path segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SegmentedFilename {
    segments: Vec<String>,
}

impl SegmentedFilename {
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a name from a native relative path, keeping only normal
    /// components.
    pub fn from_path(path: &Path) -> Self {
        let segments = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Self { segments }
    }

    /// Splits a decoded wire string on the segment separator.
    pub fn from_wire(s: &str) -> Self {
        if s.is_empty() {
            return Self::default();
        }
        Self::from_segments(s.split(SEGMENT_SEPARATOR))
    }

    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push(SEGMENT_SEPARATOR);
            }
            out.push_str(segment);
        }
        out
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, i.e. the bare file name.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Joins the segments with the native separator. No validation happens
    /// here; callers writing to disk must check the segments first.
    pub fn to_relative_path(&self) -> PathBuf {
        self.segments.iter().collect()
    }
}

impl fmt::Display for SegmentedFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
