//! Human-readable warnings and errors for the CLI.

use colored::Colorize;
use std::fmt;

/// An inclusive range used for tracking positions in source code.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Position {
    pub start: usize,
    pub end: usize,
}

impl Position {
    /// A position covering the single byte at `index`.
    pub fn at(index: usize) -> Self {
        Position {
            start: index,
            end: index,
        }
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// The severity of the Info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Warning,
    Error,
}

/// Info represents a message to the user, a warning or an error with
/// an optional reference to a position in the BF source.
#[derive(Debug)]
pub struct Info {
    pub level: Level,
    pub filename: String,
    pub message: String,
    pub position: Option<Position>,
    pub source: Option<String>,
}

impl Info {
    /// Build an error report for a malformed program.
    pub fn error(filename: &str, err: &crate::ParseError, source: &str) -> Self {
        Info {
            level: Level::Error,
            filename: filename.to_owned(),
            message: err.to_string(),
            position: Some(err.position()),
            source: Some(source.to_owned()),
        }
    }
}

// Given an index into a string, return the line number and column
// count (both zero-indexed).
fn line_and_column(s: &str, i: usize) -> (usize, usize) {
    let mut char_count = 0;
    let mut last_line = 0;
    for (line_idx, line) in s.split('\n').enumerate() {
        let line_length = line.len();
        if char_count + line_length >= i {
            return (line_idx, i - char_count);
        }

        char_count += line_length + 1;
        last_line = line_idx;
    }

    // Past the end of the source: point just after the last line.
    (last_line, 0)
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut file_text = self.filename.clone();

        // Find line and column offsets, if we have an index.
        let offsets = match (&self.position, &self.source) {
            (Some(range), Some(source)) => {
                debug_assert!(range.start <= range.end);

                let (line_idx, column_idx) = line_and_column(source, range.start);

                file_text.push_str(&format!(":{}:{}", line_idx + 1, column_idx + 1));
                Some((line_idx, column_idx, range.end - range.start))
            }
            _ => None,
        };

        let level_text = match self.level {
            Level::Warning => " warning: ".purple().bold(),
            Level::Error => " error: ".red().bold(),
        };

        write!(f, "{}{}{}", file_text.bold(), level_text, self.message.bold())?;

        if let (Some((line_idx, column_idx, width)), Some(source)) = (offsets, &self.source) {
            // The faulty line of code.
            let line = source.split('\n').nth(line_idx).unwrap_or("");

            // Highlight the faulty characters on that line.
            let caret_line = format!("{}^{}", " ".repeat(column_idx), "~".repeat(width));
            let caret_line = match self.level {
                Level::Warning => caret_line.purple().bold(),
                Level::Error => caret_line.red().bold(),
            };

            write!(f, "\n{}\n{}", line, caret_line)?;
        }

        Ok(())
    }
}

#[test]
fn position_debug_single() {
    assert_eq!(format!("{:?}", Position::at(3)), "3");
}

#[test]
fn position_debug_range() {
    assert_eq!(format!("{:?}", Position { start: 1, end: 4 }), "1-4");
}

#[test]
fn line_and_column_second_line() {
    assert_eq!(line_and_column("++\n+[", 4), (1, 1));
}

#[test]
fn line_and_column_first_char() {
    assert_eq!(line_and_column("[", 0), (0, 0));
}

#[test]
fn error_report_points_at_bracket() {
    colored::control::set_override(false);

    let source = "+\n+]";
    let err = crate::parse(source).unwrap_err();
    let report = Info::error("foo.bf", &err, source).to_string();

    assert_eq!(report, "foo.bf:2:2 error: This ] has no matching [\n+]\n ^");
}
