use crate::location::Location;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// The kind of token as returned by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    EndOfFile,
    Identifier,
    Number,
    String,
    Comment,
    Colon,
    Comma,
    Eol,
    Unknown,

    /// A lone '$', which refers to the location counter.
    Dollar,
    Plus,
    Minus,

    // Keywords.
    Cpu,
    Org,
    End,
    Equ,
    Set,
    Db,
    Dw,
}

impl TokenKind {
    /// Returns true if this token kind is one of the directive keywords.
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Cpu
                | TokenKind::Org
                | TokenKind::End
                | TokenKind::Equ
                | TokenKind::Set
                | TokenKind::Db
                | TokenKind::Dw
        )
    }

    /// Returns true if this token terminates a statement line.
    pub fn ends_line(&self) -> bool {
        matches!(self, TokenKind::Eol | TokenKind::EndOfFile)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenKind::EndOfFile => write!(f, "EndOfFile"),
            TokenKind::Identifier => write!(f, "Identifier"),
            TokenKind::Number => write!(f, "Number"),
            TokenKind::String => write!(f, "String"),
            TokenKind::Comment => write!(f, "Comment"),
            TokenKind::Colon => write!(f, "Colon"),
            TokenKind::Comma => write!(f, "Comma"),
            TokenKind::Eol => write!(f, "EOL"),
            TokenKind::Unknown => write!(f, "Unknown"),
            TokenKind::Dollar => write!(f, "$"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Cpu => write!(f, "CPU"),
            TokenKind::Org => write!(f, "ORG"),
            TokenKind::End => write!(f, "END"),
            TokenKind::Equ => write!(f, "EQU"),
            TokenKind::Set => write!(f, "SET"),
            TokenKind::Db => write!(f, "DB"),
            TokenKind::Dw => write!(f, "DW"),
        }
    }
}

// Directive keywords. These are case-sensitive, as opposed to mnemonics which
// are resolved by the instruction set.
static KEYWORDS: LazyLock<HashMap<&'static str, TokenKind>> = LazyLock::new(|| {
    HashMap::from([
        ("CPU", TokenKind::Cpu),
        ("ORG", TokenKind::Org),
        ("END", TokenKind::End),
        ("EQU", TokenKind::Equ),
        ("SET", TokenKind::Set),
        ("DB", TokenKind::Db),
        ("DW", TokenKind::Dw),
    ])
});

/// A token as produced by the scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token.
    pub kind: TokenKind,

    /// The text of the token. Strings keep their delimiters, comments drop the
    /// leading ';' and numbers keep their prefix or suffix.
    pub value: String,

    /// Byte offset of the first character of the token in the buffer.
    pub buffer_pos: usize,

    /// Location of the first character of the token.
    pub location: Location,
}

impl Token {
    /// Returns the numeric value for a `Number` token, or None if this is not
    /// a number or its value does not fit.
    pub fn number(&self) -> Option<i64> {
        if self.kind != TokenKind::Number {
            return None;
        }
        parse_number(&self.value)
    }

    /// Returns true if this token has the given kind.
    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

// Returns the value of the given numeric literal as scanned by the scanner. The
// base is determined by either the prefix or the suffix.
fn parse_number(text: &str) -> Option<i64> {
    let (digits, radix) = if let Some(rest) = text.strip_prefix('$') {
        (rest, 16)
    } else if let Some(rest) = text.strip_prefix('%') {
        (rest, 2)
    } else if let Some(rest) = text.strip_prefix('@') {
        (rest, 8)
    } else {
        match text.chars().last()?.to_ascii_uppercase() {
            'H' => (&text[..text.len() - 1], 16),
            'O' | 'Q' => (&text[..text.len() - 1], 8),
            'B' => (&text[..text.len() - 1], 2),
            _ => (text, 10),
        }
    };

    if digits.is_empty() {
        return None;
    }
    i64::from_str_radix(digits, radix).ok()
}

/// What `Scanner::next_ch` can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ch {
    Char(char),
    Eol,
    Eof,
}

/// Converts source text into tokens, one at a time. Line endings ("\r",
/// "\n" and "\r\n") are all reported as a single end of line. The scanner never
/// fails: lexemes that cannot be classified become `Unknown` tokens.
#[derive(Debug, Clone)]
pub struct Scanner {
    buffer: Vec<char>,

    // Byte offset of each character of `buffer`, plus the length of the text.
    offsets: Vec<usize>,

    pos: usize,
    location: Location,
    done: bool,
}

impl Scanner {
    /// Returns a new scanner over the given `text`.
    pub fn new(text: &str) -> Self {
        Self {
            buffer: text.chars().collect(),
            offsets: text
                .char_indices()
                .map(|(idx, _)| idx)
                .chain(std::iter::once(text.len()))
                .collect(),
            pos: 0,
            location: Location::start(),
            done: false,
        }
    }

    /// Returns the location of the last consumed character.
    pub fn location(&self) -> Location {
        self.location
    }

    /// Consumes and returns the next character.
    pub fn next_ch(&mut self) -> Ch {
        match self.buffer.get(self.pos) {
            None => Ch::Eof,
            Some('\r') => {
                self.pos += 1;
                if self.buffer.get(self.pos) == Some(&'\n') {
                    self.pos += 1;
                }
                self.break_line();
                Ch::Eol
            }
            Some('\n') => {
                self.pos += 1;
                self.break_line();
                Ch::Eol
            }
            Some(&c) => {
                self.pos += 1;
                self.location = self.location.increment();
                self.location.char_offset = self.offset();
                Ch::Char(c)
            }
        }
    }

    /// Returns the next token.
    pub fn next_token(&mut self) -> Token {
        while matches!(self.peek(), Ch::Char(c) if c.is_whitespace()) {
            self.next_ch();
        }

        let start = self.offset();
        let location = Location::new(self.location.line, self.location.column + 1, start);

        let (kind, value) = match self.peek() {
            Ch::Eof => (TokenKind::EndOfFile, String::new()),
            Ch::Eol => {
                self.next_ch();
                (TokenKind::Eol, String::from("\n"))
            }
            Ch::Char(c) => match c {
                ';' => {
                    self.next_ch();
                    (TokenKind::Comment, self.take_while(|_| true))
                }
                ':' => self.single(TokenKind::Colon),
                ',' => self.single(TokenKind::Comma),
                '+' => self.single(TokenKind::Plus),
                '-' => self.single(TokenKind::Minus),
                '\'' | '"' => self.string(c),
                '$' => self.prefixed(16),
                '%' => self.prefixed(2),
                '@' => self.prefixed(8),
                c if c.is_ascii_digit() => self.number(),
                c if c.is_ascii_alphabetic() || c == '_' => self.identifier(),
                _ => self.single(TokenKind::Unknown),
            },
        };

        Token {
            kind,
            value,
            buffer_pos: start,
            location,
        }
    }

    // Byte offset of the next character to be consumed.
    fn offset(&self) -> usize {
        self.offsets
            .get(self.pos)
            .copied()
            .unwrap_or_else(|| self.offsets.last().copied().unwrap_or_default())
    }

    // Peek the next character without consuming it.
    fn peek(&self) -> Ch {
        match self.buffer.get(self.pos) {
            None => Ch::Eof,
            Some('\r') | Some('\n') => Ch::Eol,
            Some(&c) => Ch::Char(c),
        }
    }

    fn break_line(&mut self) {
        let mut next = self.location.newline();
        next.char_offset = self.offset();
        self.location = next;
    }

    // Consume characters as long as `pred` holds and they are on the current
    // line.
    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut res = String::new();
        while let Ch::Char(c) = self.peek() {
            if !pred(c) {
                break;
            }
            res.push(c);
            self.next_ch();
        }
        res
    }

    fn single(&mut self, kind: TokenKind) -> (TokenKind, String) {
        match self.next_ch() {
            Ch::Char(c) => (kind, c.to_string()),
            _ => (kind, String::new()),
        }
    }

    // Strings are delimited by the same quote character on the same line. An
    // unterminated string is returned as an `Unknown` token.
    fn string(&mut self, quote: char) -> (TokenKind, String) {
        self.next_ch();
        let mut value = quote.to_string();
        value.push_str(&self.take_while(|c| c != quote));

        if self.peek() == Ch::Char(quote) {
            self.next_ch();
            value.push(quote);
            (TokenKind::String, value)
        } else {
            (TokenKind::Unknown, value)
        }
    }

    // Numbers with an explicit prefix: '$' (hex), '%' (binary) or '@' (octal).
    // Digits are consumed as long as they are valid for the base, the rest is
    // left for the next token. A lone '$' is the location counter.
    fn prefixed(&mut self, radix: u32) -> (TokenKind, String) {
        let prefix = match self.next_ch() {
            Ch::Char(c) => c,
            _ => return (TokenKind::Unknown, String::new()),
        };
        let digits = self.take_while(|c| c.is_digit(radix));

        if digits.is_empty() {
            if prefix == '$' {
                (TokenKind::Dollar, prefix.to_string())
            } else {
                (TokenKind::Unknown, prefix.to_string())
            }
        } else {
            (TokenKind::Number, format!("{}{}", prefix, digits))
        }
    }

    // Numbers starting with a decimal digit. The base suffix wins only if all
    // the preceding characters are valid digits for that base. Otherwise a
    // decimal run is accepted, and it is truncated before a hexadecimal letter
    // so the remainder is scanned again as a new token. Any other trailing
    // letter makes the whole lexeme unknown.
    fn number(&mut self) -> (TokenKind, String) {
        let candidate: Vec<char> = self.buffer[self.pos..]
            .iter()
            .take_while(|c| c.is_ascii_alphanumeric())
            .copied()
            .collect();
        let (kind, len) = classify_number(&candidate);

        let mut value = String::new();
        for _ in 0..len {
            if let Ch::Char(c) = self.next_ch() {
                value.push(c);
            }
        }
        (kind, value)
    }

    fn identifier(&mut self) -> (TokenKind, String) {
        let value = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
        match KEYWORDS.get(value.as_str()) {
            Some(kind) => (*kind, value),
            None => (TokenKind::Identifier, value),
        }
    }
}

// Returns the token kind and the amount of characters to be consumed for the
// given alphanumeric run which starts with a decimal digit.
fn classify_number(candidate: &[char]) -> (TokenKind, usize) {
    let len = candidate.len();

    if len > 1 {
        let body = &candidate[..len - 1];
        let valid = match candidate[len - 1].to_ascii_uppercase() {
            'H' => body.iter().all(|c| c.is_ascii_hexdigit()),
            'O' | 'Q' => body.iter().all(|c| c.is_digit(8)),
            'B' => body.iter().all(|c| c.is_digit(2)),
            _ => false,
        };
        if valid {
            return (TokenKind::Number, len);
        }
    }

    let decimal = candidate.iter().take_while(|c| c.is_ascii_digit()).count();
    if decimal == len {
        return (TokenKind::Number, len);
    }
    if candidate[decimal].is_ascii_hexdigit() {
        (TokenKind::Number, decimal)
    } else {
        (TokenKind::Unknown, len)
    }
}

impl Iterator for Scanner {
    type Item = Token;

    /// Yields tokens up to (but not including) the end of file.
    fn next(&mut self) -> Option<Token> {
        if self.done {
            return None;
        }
        let token = self.next_token();
        if token.kind == TokenKind::EndOfFile {
            self.done = true;
            None
        } else {
            Some(token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        Scanner::new(text).map(|t| t.kind).collect()
    }

    fn assert_single(text: &str, kind: TokenKind, value: &str) {
        let tokens: Vec<Token> = Scanner::new(text).collect();
        assert_eq!(tokens.len(), 1, "'{}' gave {:#?}", text, tokens);
        assert_eq!(tokens[0].kind, kind);
        assert_eq!(tokens[0].value, value);
    }

    fn assert_number(text: &str, value: i64) {
        let tokens: Vec<Token> = Scanner::new(text).collect();
        assert_eq!(tokens.len(), 1, "'{}' gave {:#?}", text, tokens);
        assert_eq!(tokens[0].number(), Some(value), "'{}'", text);
    }

    #[test]
    fn empty_input() {
        let mut scanner = Scanner::new("");
        assert_eq!(scanner.next_token().kind, TokenKind::EndOfFile);
        assert_eq!(scanner.next_token().kind, TokenKind::EndOfFile);
    }

    #[test]
    fn next_ch_normalizes_line_endings() {
        for text in ["a\nb", "a\rb", "a\r\nb"] {
            let mut scanner = Scanner::new(text);
            assert_eq!(scanner.next_ch(), Ch::Char('a'));
            assert_eq!(scanner.next_ch(), Ch::Eol);
            assert_eq!(scanner.next_ch(), Ch::Char('b'));
            assert_eq!(scanner.next_ch(), Ch::Eof);
            assert_eq!(scanner.location().line, 2);
            assert_eq!(scanner.location().column, 1);
        }
    }

    #[test]
    fn single_eol_per_line_ending() {
        use TokenKind::*;

        assert_eq!(kinds("NOP\r\nNOP\rNOP\n"), vec![Identifier, Eol, Identifier, Eol, Identifier, Eol]);
        assert_eq!(kinds("\n\n"), vec![Eol, Eol]);
    }

    #[test]
    fn identifiers_and_keywords() {
        assert_single("START", TokenKind::Identifier, "START");
        assert_single("_loop_2", TokenKind::Identifier, "_loop_2");
        assert_single("ORG", TokenKind::Org, "ORG");
        assert_single("DW", TokenKind::Dw, "DW");

        // Keywords are case-sensitive.
        assert_single("org", TokenKind::Identifier, "org");
    }

    #[test]
    fn decimal_numbers() {
        assert_number("0", 0);
        assert_number("255", 255);
        assert_number("65536", 65536);
    }

    #[test]
    fn hexadecimal_numbers() {
        assert_number("$FF", 0xFF);
        assert_number("$1f", 0x1F);
        assert_number("0FFh", 0xFF);
        assert_number("10000h", 0x10000);
        assert_number("12ABH", 0x12AB);
    }

    #[test]
    fn binary_numbers() {
        assert_number("%1010", 0b1010);
        assert_number("1010b", 0b1010);
        assert_number("1B", 1);
    }

    #[test]
    fn octal_numbers() {
        assert_number("@17", 0o17);
        assert_number("17o", 0o17);
        assert_number("17Q", 0o17);
        assert_number("17q", 0o17);
    }

    #[test]
    fn suffix_needs_valid_digits() {
        // '3' is not a binary digit, so the 'B' does not act as a suffix: the
        // decimal part is returned and 'B' is scanned again.
        let tokens: Vec<Token> = Scanner::new("3B").collect();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[0].value, "3");
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].value, "B");

        // Same for octal with digits out of range.
        let tokens: Vec<Token> = Scanner::new("19O").collect();
        assert_eq!(tokens[0].kind, TokenKind::Unknown);
        assert_eq!(tokens[0].value, "19O");
    }

    #[test]
    fn trailing_non_hex_letter() {
        assert_single("12G", TokenKind::Unknown, "12G");
        assert_single("1Z", TokenKind::Unknown, "1Z");
    }

    #[test]
    fn prefixes_without_digits() {
        assert_single("$", TokenKind::Dollar, "$");
        assert_single("%", TokenKind::Unknown, "%");
        assert_single("@", TokenKind::Unknown, "@");

        // Invalid digits for the base end the number.
        let tokens: Vec<Token> = Scanner::new("%102").collect();
        assert_eq!(tokens[0].value, "%10");
        assert_eq!(tokens[1].value, "2");
    }

    #[test]
    fn strings() {
        assert_single("'A'", TokenKind::String, "'A'");
        assert_single("\"Hello, world\"", TokenKind::String, "\"Hello, world\"");
        assert_single("'it\"s'", TokenKind::String, "'it\"s'");

        // Unterminated.
        let tokens: Vec<Token> = Scanner::new("'abc\nNOP").collect();
        assert_eq!(tokens[0].kind, TokenKind::Unknown);
        assert_eq!(tokens[0].value, "'abc");
        assert_eq!(tokens[1].kind, TokenKind::Eol);
    }

    #[test]
    fn comments() {
        let tokens: Vec<Token> = Scanner::new("NOP ; do nothing\nHLT").collect();
        assert_eq!(tokens[1].kind, TokenKind::Comment);
        assert_eq!(tokens[1].value, " do nothing");
        assert_eq!(tokens[2].kind, TokenKind::Eol);
        assert_eq!(tokens[3].value, "HLT");
    }

    #[test]
    fn punctuation() {
        use TokenKind::*;

        assert_eq!(
            kinds("LOOP: MOV A,B ; x"),
            vec![Identifier, Colon, Identifier, Identifier, Comma, Identifier, Comment]
        );
        assert_eq!(kinds("$+2-X"), vec![Dollar, Plus, Number, Minus, Identifier]);
        assert_eq!(kinds("#"), vec![Unknown]);
    }

    #[test]
    fn token_locations() {
        let tokens: Vec<Token> = Scanner::new("  MOV A,B\nLOOP: NOP").collect();

        assert_eq!(tokens[0].location, Location::new(1, 3, 2));
        assert_eq!(tokens[0].buffer_pos, 2);
        assert_eq!(tokens[1].location, Location::new(1, 7, 6));
        assert_eq!(tokens[3].location, Location::new(1, 9, 8));

        // After the line break.
        assert_eq!(tokens[5].value, "LOOP");
        assert_eq!(tokens[5].location, Location::new(2, 1, 10));
        assert_eq!(tokens[7].location, Location::new(2, 7, 16));
    }

    #[test]
    fn offsets_count_bytes() {
        let text = "DB 'é' ; ñú\r\nNOP";
        let tokens: Vec<Token> = Scanner::new(text).collect();

        assert_eq!(tokens[1].value, "'é'");
        assert_eq!(tokens[2].buffer_pos, 8);
        assert_eq!(tokens[4].value, "NOP");
        assert_eq!(tokens[4].buffer_pos, text.find("NOP").unwrap());
        assert_eq!(tokens[4].location, Location::new(2, 1, 16));
        assert_eq!(&text[tokens[4].buffer_pos..], "NOP");
    }
}
