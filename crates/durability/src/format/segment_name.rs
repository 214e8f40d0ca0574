//! Segment file naming.
//!
//! Log segments are named `logNNNNNNNNNNNN.tidelogV` where `NNNNNNNNNNNN` is
//! the zero-padded segment index and `V` the format version the segment was
//! written in. Segments written before versions were tagged in the name end
//! in a bare `.tidelog` and are treated as `LOG_VERSION_LEGACY`.

use std::path::{Path, PathBuf};

use tidewal_core::LOG_VERSION_LEGACY;

use super::LogError;

/// File name prefix shared by all segments.
pub const SEGMENT_PREFIX: &str = "log";

/// Marker between the index and the version tag.
pub const SEGMENT_EXTENSION: &str = ".tidelog";

/// Index and version decoded from a segment file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentName {
    /// Segment index, increasing with file age.
    pub index: i64,
    /// Format version tag.
    pub version: u32,
}

impl SegmentName {
    /// Create a segment name.
    pub fn new(index: i64, version: u32) -> Self {
        SegmentName { index, version }
    }

    /// File name for this segment.
    pub fn file_name(&self) -> String {
        format!(
            "{}{:012}{}{}",
            SEGMENT_PREFIX, self.index, SEGMENT_EXTENSION, self.version
        )
    }

    /// Full path of this segment inside `dir`.
    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// Parse a file name. Returns `None` for anything that is not a segment.
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(SEGMENT_PREFIX)?;
        let marker = rest.find(SEGMENT_EXTENSION)?;
        let (digits, tail) = rest.split_at(marker);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index = digits.parse::<i64>().ok()?;

        let tag = &tail[SEGMENT_EXTENSION.len()..];
        let version = if tag.is_empty() {
            LOG_VERSION_LEGACY
        } else if tag.bytes().all(|b| b.is_ascii_digit()) {
            tag.parse::<u32>().ok()?
        } else {
            return None;
        };

        Some(SegmentName { index, version })
    }

    /// Parse the final component of `path`.
    pub fn from_path(path: &Path) -> Result<Self, LogError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::parse(&name).ok_or(LogError::InvalidSegmentName(name))
    }
}

/// A segment found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    /// Decoded name.
    pub name: SegmentName,
    /// Full path.
    pub path: PathBuf,
}

/// List the segments in `dir`, oldest (lowest index) first.
///
/// A missing directory holds no segments. Files that do not match the naming
/// scheme are ignored.
pub fn list_segments(dir: &Path) -> Result<Vec<SegmentFile>, LogError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LogError::Io(e)),
    };

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if let Some(name) = SegmentName::parse(&file_name) {
            segments.push(SegmentFile {
                name,
                path: entry.path(),
            });
        }
    }

    segments.sort_by_key(|s| s.name.index);
    Ok(segments)
}

/// Highest format version among the segments in `dir`, `None` if there are none.
pub fn version_of_logs_on_disk(dir: &Path) -> Result<Option<u32>, LogError> {
    Ok(list_segments(dir)?.iter().map(|s| s.name.version).max())
}
