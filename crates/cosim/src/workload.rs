//! Batch workload queue.
//!
//! A workload list has one `<image_path> <instruction_budget>` entry per line.
//! The file is opened on the first [`WorkloadQueue::advance`] and stays open
//! for the rest of the process; each call consumes one entry.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::config::SimConfig;
use crate::error::QueueOutcome;

/// One unit of work in a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadEntry {
    pub image_path: PathBuf,
    pub instruction_budget: u64,
}

impl WorkloadEntry {
    /// Parse `<path> <u64>`; anything else is rejected.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let image_path = fields.next()?;
        let instruction_budget = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            image_path: PathBuf::from(image_path),
            instruction_budget,
        })
    }
}

#[derive(Debug, Clone)]
enum Closed {
    Exhausted,
    Malformed { line: usize, content: String },
}

/// Lazily-opened reader over a workload list.
#[derive(Debug)]
pub struct WorkloadQueue {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    closed: Option<Closed>,
    line: usize,
}

impl WorkloadQueue {
    /// Create a queue over `path`. Nothing is opened until the first advance.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            closed: None,
            line: 0,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the list has been read to a clean end of file.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self.closed, Some(Closed::Exhausted))
    }

    /// Read the next entry and apply it to `config`.
    ///
    /// # Errors
    ///
    /// - [`QueueOutcome::Exhausted`] at end of file (the batch is done).
    /// - [`QueueOutcome::Malformed`] for a line that does not parse.
    /// - [`QueueOutcome::Unreadable`] if the file cannot be opened or read.
    pub fn advance(&mut self, config: &mut SimConfig) -> Result<WorkloadEntry, QueueOutcome> {
        if let Some(closed) = &self.closed {
            return Err(match closed.clone() {
                Closed::Exhausted => QueueOutcome::Exhausted,
                Closed::Malformed { line, content } => QueueOutcome::Malformed { line, content },
            });
        }

        let entry = self.next_entry()?;
        if let Err(e) = config.set_image(&entry.image_path) {
            error!(error = %e, line = self.line, "workload entry has an unusable image path");
            return Err(self.close_malformed(entry.image_path.display().to_string()));
        }
        config.set_max_instrs(entry.instruction_budget);
        Ok(entry)
    }

    fn next_entry(&mut self) -> Result<WorkloadEntry, QueueOutcome> {
        let unreadable = |path: &Path, source| QueueOutcome::Unreadable {
            path: path.display().to_string(),
            source,
        };

        if self.reader.is_none() {
            let file = File::open(&self.path).map_err(|e| {
                error!(path = %self.path.display(), error = %e, "fail to open workload list");
                unreadable(&self.path, e)
            })?;
            debug!(path = %self.path.display(), "opened workload list");
            self.reader = Some(BufReader::new(file));
        }

        let mut buf = String::new();
        loop {
            buf.clear();
            let read = match self.reader.as_mut() {
                Some(reader) => reader.read_line(&mut buf),
                None => return Err(QueueOutcome::Exhausted),
            };
            let read = read.map_err(|e| unreadable(&self.path, e))?;
            if read == 0 {
                info!(path = %self.path.display(), "workload list is completed");
                self.reader = None;
                self.closed = Some(Closed::Exhausted);
                return Err(QueueOutcome::Exhausted);
            }
            self.line += 1;
            let content = buf.trim();
            if content.is_empty() {
                continue;
            }
            return match WorkloadEntry::parse(content) {
                Some(entry) => {
                    debug!(line = self.line, image = %entry.image_path.display(), budget = entry.instruction_budget, "next workload");
                    Ok(entry)
                }
                None => {
                    let content = content.to_string();
                    error!(line = self.line, content = %content, "unknown workload list format");
                    Err(self.close_malformed(content))
                }
            };
        }
    }

    fn close_malformed(&mut self, content: String) -> QueueOutcome {
        self.reader = None;
        self.closed = Some(Closed::Malformed {
            line: self.line,
            content: content.clone(),
        });
        QueueOutcome::Malformed {
            line: self.line,
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(contents: &str) -> (tempfile::TempDir, WorkloadQueue) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workloads.txt");
        std::fs::write(&path, contents).unwrap();
        (dir, WorkloadQueue::new(path))
    }

    #[test]
    fn test_parse_entry() {
        let entry = WorkloadEntry::parse("linux.bin 123456").unwrap();
        assert_eq!(entry.image_path, PathBuf::from("linux.bin"));
        assert_eq!(entry.instruction_budget, 123_456);

        assert!(WorkloadEntry::parse("b.bin").is_none());
        assert!(WorkloadEntry::parse("b.bin -4").is_none());
        assert!(WorkloadEntry::parse("b.bin 12 extra").is_none());
        assert!(WorkloadEntry::parse("b.bin 18446744073709551615").is_some());
    }

    #[test]
    fn test_advance_applies_entry() {
        let (_dir, mut queue) = queue_with("a.bin 1000\nc.bin 0\n");
        let mut config = SimConfig::default();

        let first = queue.advance(&mut config).unwrap();
        assert_eq!(first.instruction_budget, 1000);
        assert_eq!(config.image(), Path::new("a.bin"));
        assert_eq!(config.max_instrs(), 1000);

        queue.advance(&mut config).unwrap();
        assert_eq!(config.image(), Path::new("c.bin"));
        assert_eq!(config.max_instrs(), 0);

        assert!(matches!(queue.advance(&mut config), Err(QueueOutcome::Exhausted)));
        assert!(queue.is_completed());
        assert!(matches!(queue.advance(&mut config), Err(QueueOutcome::Exhausted)));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let (_dir, mut queue) = queue_with("\na.bin 5\n\n   \n");
        let mut config = SimConfig::default();
        assert!(queue.advance(&mut config).is_ok());
        assert!(matches!(queue.advance(&mut config), Err(QueueOutcome::Exhausted)));
    }

    #[test]
    fn test_malformed_is_terminal() {
        let (_dir, mut queue) = queue_with("a.bin 1000\nb.bin\nc.bin 10\n");
        let mut config = SimConfig::default();

        assert!(queue.advance(&mut config).is_ok());
        match queue.advance(&mut config) {
            Err(QueueOutcome::Malformed { line, content }) => {
                assert_eq!(line, 2);
                assert_eq!(content, "b.bin");
            }
            other => panic!("expected malformed, got {other:?}"),
        }
        assert!(!queue.is_completed());
        assert!(matches!(
            queue.advance(&mut config),
            Err(QueueOutcome::Malformed { line: 2, .. })
        ));
        assert_eq!(config.image(), Path::new("a.bin"));
    }

    #[test]
    fn test_unreadable() {
        let mut queue = WorkloadQueue::new("/nonexistent/workloads.txt");
        let mut config = SimConfig::default();
        let outcome = queue.advance(&mut config).unwrap_err();
        assert!(matches!(outcome, QueueOutcome::Unreadable { .. }));
        assert!(outcome.is_failure());
    }

    #[test]
    fn test_empty_list_is_exhausted() {
        let (_dir, mut queue) = queue_with("");
        let mut config = SimConfig::default();
        let outcome = queue.advance(&mut config).unwrap_err();
        assert!(!outcome.is_failure());
    }
}
