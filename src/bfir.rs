//! bfir defines a tree IR for BF. Loops own their bodies, so a
//! program is a plain value: cloning, comparing and rewriting it
//! never involves shared state.
//!
//! It also provides functions for generating the IR from source code,
//! producing errors that point at the offending bracket on malformed
//! inputs.

use self::Instruction::*;
use crate::diagnostics::Position;
use std::fmt;
use std::num::Wrapping;
use thiserror::Error;

#[cfg(test)]
use pretty_assertions::assert_eq;

/// A cell is the fundamental BF datatype that we work with. BF
/// requires this to be at least one byte, we provide a cell of
/// exactly one byte. Arithmetic on cells wraps.
pub type Cell = Wrapping<i8>;

/// The number of cells on the tape of a compiled program.
pub const NUM_CELLS: usize = 30000;

/// `Instruction` represents a node in our BF IR.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Instruction {
    /// Add to the current cell.
    Increment(Cell),
    /// Move the cell pointer.
    PointerIncrement(isize),
    Read,
    Write,
    /// Assign the current cell. This has no direct equivalent in BF,
    /// we generate it during optimisation once a cell's value is
    /// known statically.
    Set(Cell),
    /// Run the body while the current cell is non-zero.
    Loop(Program),
}

/// Instructions in execution order.
pub type Program = Vec<Instruction>;

fn fmt_with_indent(instr: &Instruction, indent: usize, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", "  ".repeat(indent))?;

    match instr {
        Loop(body) => {
            write!(f, "Loop")?;

            for loop_instr in body {
                writeln!(f)?;
                fmt_with_indent(loop_instr, indent + 1, f)?;
            }
            Ok(())
        }
        Increment(amount) => write!(f, "Increment {}", amount.0),
        PointerIncrement(amount) => write!(f, "PointerIncrement {}", amount),
        Set(amount) => write!(f, "Set {}", amount.0),
        Read => write!(f, "Read"),
        Write => write!(f, "Write"),
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_with_indent(self, 0, f)
    }
}

/// A malformed program: the brackets are not balanced.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("This [ has no matching ]")]
    UnmatchedOpen { position: usize },
    #[error("This ] has no matching [")]
    UnmatchedClose { position: usize },
}

impl ParseError {
    /// Where in the source the offending bracket is.
    pub fn position(&self) -> Position {
        match *self {
            ParseError::UnmatchedOpen { position } | ParseError::UnmatchedClose { position } => {
                Position::at(position)
            }
        }
    }
}

/// Return the index of the `]` that matches the `[` at `open_index`,
/// or None if the source ends first.
pub fn match_close(source: &[u8], open_index: usize) -> Option<usize> {
    debug_assert_eq!(source.get(open_index), Some(&b'['));

    let mut depth = 0isize;
    for (index, &c) in source.iter().enumerate().skip(open_index) {
        match c {
            b'[' => depth += 1,
            b']' => depth -= 1,
            _ => continue,
        }

        if depth == 0 {
            return Some(index);
        }
    }

    None
}

/// Return the index of the `[` that matches the `]` at `close_index`,
/// or None if we reach the start of the source first.
pub fn match_open(source: &[u8], close_index: usize) -> Option<usize> {
    debug_assert_eq!(source.get(close_index), Some(&b']'));

    let mut depth = 0isize;
    for index in (0..=close_index).rev() {
        match source[index] {
            b']' => depth += 1,
            b'[' => depth -= 1,
            _ => continue,
        }

        if depth == 0 {
            return Some(index);
        }
    }

    None
}

/// The matching `]` of every `[` in a source, computed in one pass.
#[derive(Debug)]
pub struct BracketTable {
    closes: Vec<Option<usize>>,
}

impl BracketTable {
    /// Pair up every bracket in `source`. The error reported is the
    /// one a left-to-right scan meets first: the first `]` with no
    /// open loop, otherwise the outermost `[` that is never closed.
    pub fn build(source: &[u8]) -> Result<Self, ParseError> {
        let mut closes = vec![None; source.len()];
        let mut stack = vec![];

        for (index, &c) in source.iter().enumerate() {
            match c {
                b'[' => stack.push(index),
                b']' => match stack.pop() {
                    Some(open_index) => closes[open_index] = Some(index),
                    None => return Err(ParseError::UnmatchedClose { position: index }),
                },
                _ => (),
            }
        }

        if let Some(&position) = stack.first() {
            return Err(ParseError::UnmatchedOpen { position });
        }

        Ok(BracketTable { closes })
    }

    /// The index of the `]` closing the `[` at `open_index`.
    pub fn close_of(&self, open_index: usize) -> Option<usize> {
        self.closes.get(open_index).copied().flatten()
    }
}

/// Given a string of BF source code, parse and return our BF IR
/// representation. If parsing fails, return a ParseError describing
/// which bracket is unmatched.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let bytes = source.as_bytes();
    let table = BracketTable::build(bytes)?;

    parse_between(bytes, &table, 0, bytes.len())
}

/// Parse `source[from..to]`, which must not contain unmatched
/// brackets of its own.
fn parse_between(
    source: &[u8],
    table: &BracketTable,
    from: usize,
    to: usize,
) -> Result<Program, ParseError> {
    let mut instructions = vec![];

    let mut index = from;
    while index < to {
        match source[index] {
            b'+' => instructions.push(Increment(Wrapping(1))),
            b'-' => instructions.push(Increment(Wrapping(-1))),
            b'>' => instructions.push(PointerIncrement(1)),
            b'<' => instructions.push(PointerIncrement(-1)),
            b',' => instructions.push(Read),
            b'.' => instructions.push(Write),
            b'[' => {
                let close_index = table
                    .close_of(index)
                    .ok_or(ParseError::UnmatchedOpen { position: index })?;
                let body = parse_between(source, table, index + 1, close_index)?;
                instructions.push(Loop(body));

                // Resume after the matching ].
                index = close_index;
            }
            // Any ] we reach was not consumed as the end of a loop.
            b']' => return Err(ParseError::UnmatchedClose { position: index }),
            _ => (),
        }

        index += 1;
    }

    Ok(instructions)
}

#[test]
fn parse_increment() {
    assert_eq!(parse("+").unwrap(), [Increment(Wrapping(1))]);
    assert_eq!(
        parse("+++").unwrap(),
        [
            Increment(Wrapping(1)),
            Increment(Wrapping(1)),
            Increment(Wrapping(1))
        ]
    );
}

#[test]
fn parse_decrement() {
    assert_eq!(parse("-").unwrap(), [Increment(Wrapping(-1))]);
}

#[test]
fn parse_pointer_increment() {
    assert_eq!(parse(">").unwrap(), [PointerIncrement(1)]);
}

#[test]
fn parse_pointer_decrement() {
    assert_eq!(parse("<").unwrap(), [PointerIncrement(-1)]);
}

#[test]
fn parse_read() {
    assert_eq!(parse(",").unwrap(), [Read]);
}

#[test]
fn parse_write() {
    assert_eq!(parse(".").unwrap(), [Write]);
}

#[test]
fn parse_empty_loop() {
    assert_eq!(parse("[]").unwrap(), [Loop(vec![])]);
}

#[test]
fn parse_simple_loop() {
    assert_eq!(parse("[+]").unwrap(), [Loop(vec![Increment(Wrapping(1))])]);
}

#[test]
fn parse_complex_loop() {
    let expected = [
        Write,
        Loop(vec![Read, Increment(Wrapping(1))]),
        Increment(Wrapping(-1)),
    ];
    assert_eq!(parse(".[,+]-").unwrap(), expected);
}

#[test]
fn parse_nested_loops() {
    let expected = [Loop(vec![
        PointerIncrement(1),
        Loop(vec![Increment(Wrapping(-1))]),
        Loop(vec![]),
    ])];
    assert_eq!(parse("[>[-][]]").unwrap(), expected);
}

#[test]
fn parse_unmatched_open() {
    assert_eq!(parse("[+"), Err(ParseError::UnmatchedOpen { position: 0 }));
    assert_eq!(parse("+[[]"), Err(ParseError::UnmatchedOpen { position: 1 }));
}

#[test]
fn parse_unmatched_close() {
    assert_eq!(parse("+]"), Err(ParseError::UnmatchedClose { position: 1 }));
    assert_eq!(parse("[]]["), Err(ParseError::UnmatchedClose { position: 2 }));
}

#[test]
fn parse_unbalanced_loop() {
    assert!(parse("[").is_err());
    assert!(parse("]").is_err());
    assert!(parse("][").is_err());
    assert!(parse("[][").is_err());
}

#[test]
fn parse_comment() {
    assert_eq!(parse("foo! ").unwrap(), []);
    assert_eq!(parse("a+b").unwrap(), [Increment(Wrapping(1))]);
}

#[test]
fn parse_error_position() {
    let err = ParseError::UnmatchedOpen { position: 3 };
    assert_eq!(err.position(), Position::at(3));
}

#[test]
fn match_close_nested() {
    let source = b"[[]+]";
    assert_eq!(match_close(source, 0), Some(4));
    assert_eq!(match_close(source, 1), Some(2));
}

#[test]
fn match_close_not_found() {
    assert_eq!(match_close(b"+[[]", 1), None);
}

#[test]
fn match_open_nested() {
    let source = b"[[]+]";
    assert_eq!(match_open(source, 4), Some(0));
    assert_eq!(match_open(source, 2), Some(1));
}

#[test]
fn bracket_table_matches_scan() {
    let source = b"+[>[-]<[[]]]-[]";
    let table = BracketTable::build(source).unwrap();
    for (index, &c) in source.iter().enumerate() {
        if c == b'[' {
            assert_eq!(table.close_of(index), match_close(source, index));
        }
    }
}

#[test]
fn structural_equality_is_deep() {
    let loop1 = Loop(vec![Increment(Wrapping(1))]);
    let loop2 = Loop(vec![Increment(Wrapping(1))]);

    assert_eq!(loop1, loop2);
    assert_ne!(loop1, Loop(vec![Increment(Wrapping(2))]));
    assert_ne!(loop1, Loop(vec![]));
    assert_ne!(loop1, Loop(vec![Loop(vec![Increment(Wrapping(1))])]));
}

#[test]
fn structural_equality_distinguishes_variants() {
    assert_eq!(Read, Read);
    assert_ne!(Read, Write);
    assert_ne!(Write, Increment(Wrapping(1)));
    assert_ne!(Increment(Wrapping(1)), Set(Wrapping(1)));
    assert_ne!(PointerIncrement(1), Increment(Wrapping(1)));
}

#[test]
fn program_equality() {
    let prog1: Program = vec![PointerIncrement(1)];
    let prog2: Program = vec![PointerIncrement(1)];

    assert_eq!(prog1, prog2);
    assert_ne!(prog1, vec![]);
    assert_ne!(prog1, vec![PointerIncrement(2)]);
    assert_ne!(prog1, vec![PointerIncrement(1), PointerIncrement(1)]);
}

#[test]
fn display_indents_loops() {
    let instr = Loop(vec![Increment(Wrapping(-1)), Loop(vec![Write])]);
    assert_eq!(
        instr.to_string(),
        "Loop\n  Increment -1\n  Loop\n    Write"
    );
}
