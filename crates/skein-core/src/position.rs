//! Source code position tracking shared by every positioned error in the
//! runtime (spec.md §4.2, §7).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single point in a template/script source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A span over source text. The runtime only ever needs the start position
/// (`lineno`/`colno` in spec.md), but a span is kept for parity with
/// `spec.md`'s `pos: {lineno, colno}` command record field and for any
/// future multi-point diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn point(pos: Position) -> Self {
        Self { start: pos, end: pos }
    }

    pub fn dummy() -> Self {
        Self {
            start: Position::default(),
            end: Position::default(),
        }
    }

    pub fn lineno(&self) -> usize {
        self.start.line
    }

    pub fn colno(&self) -> usize {
        self.start.column
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::dummy()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
