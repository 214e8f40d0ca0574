//! Log cursors.
//!
//! A cursor walks log entries across segment boundaries in LSN order. The
//! upgrader and the segment scan only ever ask for the first or last entry
//! and step from there, so `LogCursor` is a small trait and the file-backed
//! implementation keeps one segment in memory at a time.
//!
//! `LogSource` is the seam through which callers obtain cursors, either over
//! a whole log directory or over a single segment file.
//!
//! A partial record at the end of a segment is a crash artifact only in the
//! newest segment of a directory. Anywhere else the cursor reports
//! `LogError::TruncatedSegment`.

use std::path::{Path, PathBuf};

use crate::format::{list_segments, read_segment, LogEntry, LogError};

/// Bidirectional iteration over log entries.
///
/// Every method returns `Ok(None)` at the corresponding end of the log and
/// leaves the position where it was.
pub trait LogCursor {
    /// Position on the oldest entry.
    fn first(&mut self) -> Result<Option<LogEntry>, LogError>;

    /// Position on the newest entry.
    fn last(&mut self) -> Result<Option<LogEntry>, LogError>;

    /// Step towards newer entries. From an unpositioned cursor this is `first`.
    fn next(&mut self) -> Result<Option<LogEntry>, LogError>;

    /// Step towards older entries. From an unpositioned cursor this is `last`.
    fn prev(&mut self) -> Result<Option<LogEntry>, LogError>;
}

/// Opens cursors over a log.
pub trait LogSource: Send + Sync {
    /// Cursor over every segment in `log_dir`.
    fn open_log(&self, log_dir: &Path) -> Result<Box<dyn LogCursor>, LogError>;

    /// Cursor over the single segment at `path`.
    fn open_segment(&self, path: &Path) -> Result<Box<dyn LogCursor>, LogError>;
}

/// `LogSource` over segment files written by `SegmentWriter`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLogSource;

impl LogSource for FileLogSource {
    fn open_log(&self, log_dir: &Path) -> Result<Box<dyn LogCursor>, LogError> {
        Ok(Box::new(FileLogCursor::open(log_dir)?))
    }

    fn open_segment(&self, path: &Path) -> Result<Box<dyn LogCursor>, LogError> {
        Ok(Box::new(FileLogCursor::open_segment(path)?))
    }
}

struct LoadedSegment {
    slot: usize,
    entries: Vec<LogEntry>,
}

/// Cursor over segment files.
pub struct FileLogCursor {
    segments: Vec<PathBuf>,
    /// Slot of the newest segment on disk, the only one allowed a torn tail
    newest_slot: Option<usize>,
    loaded: Option<LoadedSegment>,
    position: Option<(usize, usize)>,
}

impl FileLogCursor {
    /// Cursor over all segments in `log_dir`, oldest first.
    pub fn open(log_dir: &Path) -> Result<Self, LogError> {
        let segments: Vec<PathBuf> = list_segments(log_dir)?
            .into_iter()
            .map(|s| s.path)
            .collect();
        let newest_slot = segments.len().checked_sub(1);
        Ok(Self::over(segments, newest_slot))
    }

    /// Cursor over one segment file.
    pub fn open_segment(path: &Path) -> Result<Self, LogError> {
        if !path.is_file() {
            return Err(LogError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no segment at {}", path.display()),
            )));
        }
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let newest = list_segments(dir)?.pop();
        let is_newest = newest.map_or(true, |newest| newest.path.file_name() == path.file_name());
        Ok(Self::over(
            vec![path.to_path_buf()],
            if is_newest { Some(0) } else { None },
        ))
    }

    fn over(segments: Vec<PathBuf>, newest_slot: Option<usize>) -> Self {
        FileLogCursor {
            segments,
            newest_slot,
            loaded: None,
            position: None,
        }
    }

    fn load(&mut self, slot: usize) -> Result<&[LogEntry], LogError> {
        let cached = matches!(&self.loaded, Some(l) if l.slot == slot);
        if !cached {
            let contents = read_segment(&self.segments[slot])?;
            if contents.torn_tail && self.newest_slot != Some(slot) {
                return Err(LogError::TruncatedSegment {
                    path: self.segments[slot].clone(),
                });
            }
            self.loaded = Some(LoadedSegment {
                slot,
                entries: contents.entries,
            });
        }
        Ok(self
            .loaded
            .as_ref()
            .map(|l| l.entries.as_slice())
            .unwrap_or(&[]))
    }

    fn len_of(&mut self, slot: usize) -> Result<usize, LogError> {
        Ok(self.load(slot)?.len())
    }

    fn move_to(&mut self, slot: usize, idx: usize) -> Result<Option<LogEntry>, LogError> {
        let entry = self.load(slot)?.get(idx).cloned();
        if entry.is_some() {
            self.position = Some((slot, idx));
        }
        Ok(entry)
    }
}

impl LogCursor for FileLogCursor {
    fn first(&mut self) -> Result<Option<LogEntry>, LogError> {
        for slot in 0..self.segments.len() {
            if self.len_of(slot)? > 0 {
                return self.move_to(slot, 0);
            }
        }
        Ok(None)
    }

    fn last(&mut self) -> Result<Option<LogEntry>, LogError> {
        for slot in (0..self.segments.len()).rev() {
            let len = self.len_of(slot)?;
            if len > 0 {
                return self.move_to(slot, len - 1);
            }
        }
        Ok(None)
    }

    fn next(&mut self) -> Result<Option<LogEntry>, LogError> {
        let (slot, idx) = match self.position {
            None => return self.first(),
            Some(pos) => pos,
        };
        if idx + 1 < self.len_of(slot)? {
            return self.move_to(slot, idx + 1);
        }
        for later in slot + 1..self.segments.len() {
            if self.len_of(later)? > 0 {
                return self.move_to(later, 0);
            }
        }
        Ok(None)
    }

    fn prev(&mut self) -> Result<Option<LogEntry>, LogError> {
        let (slot, idx) = match self.position {
            None => return self.last(),
            Some(pos) => pos,
        };
        if idx > 0 {
            return self.move_to(slot, idx - 1);
        }
        for earlier in (0..slot).rev() {
            let len = self.len_of(earlier)?;
            if len > 0 {
                return self.move_to(earlier, len - 1);
            }
        }
        Ok(None)
    }
}
