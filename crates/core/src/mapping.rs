//! Mapping list reader.
//!
//! The mapping file format, one migration per line:
//!
//! ```text
//! # source :: target
//! acme/billing::newco/billing
//! acme/web-frontend :: newco/frontend
//! ```
//!
//! Blank lines and `#` comments are ignored. A malformed line is recorded as
//! a [`RejectedLine`] and never stops the lines after it from being read.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{MappingError, ParseError};
use crate::models::{MigrationTask, RepoRef};

/// Separator between the source and target halves of a line.
pub const DELIMITER: &str = "::";

/// A line that did not yield a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedLine {
    /// 1-based line number.
    pub line: usize,
    pub content: String,
    pub reason: ParseError,
}

/// Parsed mapping list: tasks in file order plus rejected lines.
#[derive(Debug, Clone, Default)]
pub struct MappingList {
    pub tasks: Vec<MigrationTask>,
    pub rejected: Vec<RejectedLine>,
}

/// Parse the text of a mapping list.
pub fn parse_mapping(text: &str) -> MappingList {
    let mut list = MappingList::default();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            debug!(line = line_no, "skipping blank or comment line");
            continue;
        }

        match parse_line(trimmed) {
            Ok((source, target)) => {
                list.tasks.push(MigrationTask::new(source, target, line_no));
            }
            Err(reason) => {
                warn!(line = line_no, content = trimmed, %reason, "rejected mapping line");
                list.rejected.push(RejectedLine {
                    line: line_no,
                    content: trimmed.to_string(),
                    reason,
                });
            }
        }
    }

    debug!(
        tasks = list.tasks.len(),
        rejected = list.rejected.len(),
        "parsed mapping list"
    );
    list
}

/// Parse one non-blank line into a `(source, target)` pair.
pub fn parse_line(line: &str) -> Result<(RepoRef, RepoRef), ParseError> {
    let mut halves = line.split(DELIMITER);
    let (source, target) = match (halves.next(), halves.next(), halves.next()) {
        (Some(source), Some(target), None) => (source, target),
        (Some(_), Some(_), Some(_)) => return Err(ParseError::ExtraDelimiter),
        _ => return Err(ParseError::MissingDelimiter),
    };
    Ok((RepoRef::parse(source)?, RepoRef::parse(target)?))
}

/// Read and parse the mapping file at `path`.
///
/// A missing or unreadable file is an error for the caller to treat as fatal;
/// malformed lines inside a readable file are not.
pub fn load_mapping_file<P: AsRef<Path>>(path: P) -> Result<MappingList, MappingError> {
    let path = path.as_ref();
    info!(path = %path.display(), "loading mapping file");

    let contents = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MappingError::FileNotFound(path.display().to_string())
        } else {
            MappingError::Io {
                path: path.display().to_string(),
                source: e,
            }
        }
    })?;

    let list = parse_mapping(&contents);
    info!(
        tasks = list.tasks.len(),
        rejected = list.rejected.len(),
        "mapping file loaded"
    );
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_line() {
        let list = parse_mapping("acme/billing::newco/billing\n");
        assert_eq!(list.tasks.len(), 1);
        assert!(list.rejected.is_empty());
        let task = &list.tasks[0];
        assert_eq!(task.source.org, "acme");
        assert_eq!(task.source.name, "billing");
        assert_eq!(task.target.org, "newco");
        assert_eq!(task.target.name, "billing");
        assert_eq!(task.line, 1);
        assert_eq!(task.attempt, 0);
    }

    #[test]
    fn test_whitespace_around_halves_is_trimmed() {
        let list = parse_mapping("  acme/web :: newco/frontend  ");
        assert_eq!(list.tasks[0].source.to_string(), "acme/web");
        assert_eq!(list.tasks[0].target.to_string(), "newco/frontend");
    }

    #[test]
    fn test_rejection_reasons() {
        let cases = [
            ("bad-line-no-delimiter", ParseError::MissingDelimiter),
            ("a/b::c/d::e/f", ParseError::ExtraDelimiter),
            ("acme::newco/billing", ParseError::MissingSlash),
            ("acme/billing::newco", ParseError::MissingSlash),
            ("acme/billing/x::newco/billing", ParseError::ExtraSlash),
            ("acme/::newco/billing", ParseError::EmptyField),
            ("acme/billing::/billing", ParseError::EmptyField),
            ("acme/bill$ing::newco/billing", ParseError::InvalidCharacters),
        ];
        for (line, expected) in cases {
            let list = parse_mapping(line);
            assert!(list.tasks.is_empty(), "line {line:?} produced a task");
            assert_eq!(list.rejected.len(), 1);
            assert_eq!(list.rejected[0].reason, expected, "line {line:?}");
        }
    }

    #[test]
    fn test_rejected_line_does_not_stop_processing() {
        let text = "\
acme/one::newco/one
bad-line-no-delimiter

# a comment
acme/two::newco/two
acme/three::newco
acme/four::newco/four
";
        let list = parse_mapping(text);
        let names: Vec<_> = list.tasks.iter().map(|t| t.source.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two", "four"]);
        assert_eq!(list.tasks[1].line, 5);

        assert_eq!(list.rejected.len(), 2);
        assert_eq!(list.rejected[0].line, 2);
        assert_eq!(list.rejected[0].content, "bad-line-no-delimiter");
        assert_eq!(list.rejected[1].line, 6);
        assert_eq!(list.rejected[1].reason, ParseError::MissingSlash);
    }

    #[test]
    fn test_empty_input() {
        let list = parse_mapping("\n\n   \n");
        assert!(list.tasks.is_empty());
        assert!(list.rejected.is_empty());
    }

    #[test]
    fn test_load_mapping_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.txt");
        std::fs::write(&path, "acme/billing::newco/billing\nnope\n").unwrap();

        let list = load_mapping_file(&path).unwrap();
        assert_eq!(list.tasks.len(), 1);
        assert_eq!(list.rejected.len(), 1);
    }

    #[test]
    fn test_load_nonexistent() {
        let result = load_mapping_file("/nonexistent/repos.txt");
        assert!(matches!(result, Err(MappingError::FileNotFound(_))));
    }

    #[test]
    fn test_load_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            load_mapping_file(&path),
            Err(MappingError::Io { .. })
        ));
    }
}
