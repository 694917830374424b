use std::fmt;

/// A position inside of the source text. Lines and columns are 1-based for
/// anything that comes out of the scanner, while the default value (all zeroes)
/// stands for "no source position" and it's used for global messages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    /// Line number.
    pub line: usize,

    /// Column inside of the line. It is zero right after a newline, and it
    /// becomes 1 once the first character of the line has been consumed.
    pub column: usize,

    /// Absolute byte offset from the beginning of the buffer.
    pub char_offset: usize,
}

impl Location {
    /// Returns a new location with the given values.
    pub fn new(line: usize, column: usize, char_offset: usize) -> Self {
        Self {
            line,
            column,
            char_offset,
        }
    }

    /// Returns the location where a scan starts: first line, no column
    /// consumed yet.
    pub fn start() -> Self {
        Self::new(1, 0, 0)
    }

    /// Returns the "no position" location.
    pub fn null() -> Self {
        Self::default()
    }

    /// Returns true if this location does not point anywhere in the source.
    pub fn is_null(&self) -> bool {
        *self == Self::default()
    }

    /// Returns the location for the next character on the same line.
    pub fn increment(self) -> Self {
        Self {
            line: self.line,
            column: self.column + 1,
            char_offset: self.char_offset + 1,
        }
    }

    /// Returns the location for the beginning of the next line. The character
    /// offset is preserved: it's up to the caller to account for the
    /// characters that made up the line ending.
    pub fn newline(self) -> Self {
        Self {
            line: self.line + 1,
            column: 0,
            char_offset: self.char_offset,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
