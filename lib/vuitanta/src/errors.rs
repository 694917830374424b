use crate::location::Location;
use std::fmt;

/// Fatal error raised by the library when an operation cannot produce a
/// meaningful result at all (e.g. asking for the tree of a source that never
/// produced a statement).
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblerException {
    pub message: String,
}

impl AssemblerException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::error::Error for AssemblerException {}

impl fmt::Display for AssemblerException {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// How bad an assembler message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Exception,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "Warning"),
            Severity::Error => write!(f, "Error"),
            Severity::Exception => write!(f, "Exception"),
        }
    }
}

/// A diagnostic produced while assembling some source.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblerMessage {
    /// Where the problem was found. It's the null location for messages that
    /// are not attached to the source.
    pub location: Location,

    /// Human-readable description.
    pub text: String,

    pub severity: Severity,
}

impl AssemblerMessage {
    /// Returns true if this message is not attached to any source position.
    pub fn is_global(&self) -> bool {
        self.location.is_null()
    }
}

impl fmt::Display for AssemblerMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_global() {
            write!(f, "{}", self.text)
        } else {
            write!(f, "{} - {}", self.location, self.text)
        }
    }
}

/// Ordered sink of assembler messages. It is owned by the caller and borrowed
/// mutably by the parser, so the same handler can collect the messages of
/// multiple stages. Messages are never dropped nor deduplicated.
#[derive(Debug, Default, Clone)]
pub struct ErrorHandler {
    messages: Vec<AssemblerMessage>,
    errors: usize,
    warnings: usize,
    exceptions: usize,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a syntax error where `expected` was expected but `found` was
    /// given.
    pub fn syntax_error(&mut self, location: Location, expected: impl fmt::Display, found: &str) {
        let text = if found.is_empty() {
            format!("Expected {}", expected)
        } else {
            format!("Expected {}: {}", expected, found)
        };
        self.push(location, text, Severity::Error);
    }

    /// Records a semantic error at the given location.
    pub fn error(&mut self, location: Location, text: impl Into<String>) {
        self.push(location, text.into(), Severity::Error);
    }

    /// Records a warning at the given location.
    pub fn warning(&mut self, location: Location, text: impl Into<String>) {
        self.push(location, text.into(), Severity::Warning);
    }

    /// Records a warning which is not attached to any source position.
    pub fn global_warning(&mut self, text: impl Into<String>) {
        self.push(Location::null(), text.into(), Severity::Warning);
    }

    /// Records an internal failure that has nothing to do with the source
    /// being assembled.
    pub fn exception(&mut self, text: impl Into<String>) {
        self.push(Location::null(), text.into(), Severity::Exception);
    }

    fn push(&mut self, location: Location, text: String, severity: Severity) {
        match severity {
            Severity::Warning => self.warnings += 1,
            Severity::Error => self.errors += 1,
            Severity::Exception => self.exceptions += 1,
        }
        self.messages.push(AssemblerMessage {
            location,
            text,
            severity,
        });
    }

    pub fn num_errors(&self) -> usize {
        self.errors
    }

    pub fn num_warnings(&self) -> usize {
        self.warnings
    }

    pub fn num_exceptions(&self) -> usize {
        self.exceptions
    }

    /// Returns all the messages in the order they were reported.
    pub fn messages(&self) -> &[AssemblerMessage] {
        &self.messages
    }

    /// Returns the messages attached to the given source line.
    pub fn messages_for_line(&self, line: usize) -> impl Iterator<Item = &AssemblerMessage> {
        self.messages.iter().filter(move |m| m.location.line == line)
    }

    /// Turns all warnings into errors, keeping the message order.
    pub fn promote_warnings(&mut self) {
        for message in self.messages.iter_mut() {
            if message.severity == Severity::Warning {
                message.severity = Severity::Error;
            }
        }
        self.errors += self.warnings;
        self.warnings = 0;
    }
}

/// Errors raised when reading or writing object files.
#[derive(Debug)]
pub enum ObjectFileError {
    Io(std::io::Error),
    BadMagic,
    UnsupportedVersion(u8),
    Truncated,
    InvalidSegment(u8),
    DuplicateSegment(u8),
    InvalidName,
    TooLarge(String),
}

impl From<std::io::Error> for ObjectFileError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ObjectFileError::Truncated
        } else {
            ObjectFileError::Io(err)
        }
    }
}

impl std::error::Error for ObjectFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ObjectFileError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectFileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectFileError::Io(err) => write!(f, "{}", err),
            ObjectFileError::BadMagic => write!(f, "not an object file"),
            ObjectFileError::UnsupportedVersion(v) => {
                write!(f, "unsupported object file version {}", v)
            }
            ObjectFileError::Truncated => write!(f, "truncated object file"),
            ObjectFileError::InvalidSegment(id) => write!(f, "invalid segment identifier {}", id),
            ObjectFileError::DuplicateSegment(id) => write!(f, "duplicated segment {}", id),
            ObjectFileError::InvalidName => write!(f, "name is not valid UTF-8"),
            ObjectFileError::TooLarge(what) => write!(f, "{} is too large", what),
        }
    }
}

/// Error raised when parsing a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub message: String,
}

impl std::error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_follow_messages() {
        let mut handler = ErrorHandler::new();

        handler.syntax_error(Location::new(1, 1, 0), "Opcode", "FOO");
        handler.error(Location::new(2, 5, 10), "Duplicate label: A");
        handler.warning(Location::new(3, 1, 20), "whatever");
        handler.global_warning("global");
        handler.exception("boom");

        assert_eq!(handler.num_errors(), 2);
        assert_eq!(handler.num_warnings(), 2);
        assert_eq!(handler.num_exceptions(), 1);
        assert_eq!(
            handler.messages().len(),
            handler.num_errors() + handler.num_warnings() + handler.num_exceptions()
        );
    }

    #[test]
    fn insertion_order_and_no_dedup() {
        let mut handler = ErrorHandler::new();

        handler.error(Location::new(2, 1, 0), "second");
        handler.error(Location::new(1, 1, 0), "first");
        handler.error(Location::new(1, 1, 0), "first");

        let texts: Vec<&str> = handler.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "first", "first"]);
    }

    #[test]
    fn global_messages_have_null_location() {
        let mut handler = ErrorHandler::new();

        handler.global_warning("w");
        handler.exception("e");

        assert!(handler.messages().iter().all(|m| m.is_global()));
        assert_eq!(handler.messages()[1].severity, Severity::Exception);
        assert_eq!(handler.messages()[1].to_string(), "e");
    }

    #[test]
    fn syntax_error_text() {
        let mut handler = ErrorHandler::new();

        handler.syntax_error(Location::new(4, 2, 0), "Opcode", "FOO");
        handler.syntax_error(Location::new(4, 2, 0), "EOL", "");

        assert_eq!(handler.messages()[0].to_string(), "4:2 - Expected Opcode: FOO");
        assert_eq!(handler.messages()[1].text, "Expected EOL");
    }

    #[test]
    fn promote_warnings() {
        let mut handler = ErrorHandler::new();

        handler.warning(Location::new(1, 1, 0), "w");
        handler.error(Location::new(2, 1, 0), "e");
        handler.promote_warnings();

        assert_eq!(handler.num_errors(), 2);
        assert_eq!(handler.num_warnings(), 0);
        assert_eq!(handler.messages()[0].severity, Severity::Error);
    }
}
