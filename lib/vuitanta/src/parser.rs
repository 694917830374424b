use crate::ast::{ASTree, Expr, NodeId, NodeKind, Term};
use crate::errors::{AssemblerException, ErrorHandler};
use crate::isa::{
    instruction_set, Cpu, EncodingErrorKind, InstructionSet, Lookup, Operand, OperandKind,
};
use crate::location::Location;
use crate::object::{ObjectCode, SegmentId};
use crate::opcodes::{register_code, PAIRS_PSW, PAIRS_SP};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::symbols::{SymbolKind, SymbolMap};

/// Module name used when none is given.
pub const DEFAULT_MODULE: &str = "MAIN";

// Why a line could not be parsed. In both cases the rest of the line is
// skipped and no statement line is created for it.
#[derive(Debug)]
enum Failure {
    Syntax {
        location: Location,
        expected: String,
        found: String,
    },
    Semantic {
        location: Location,
        message: String,
    },
}

type Result<T> = std::result::Result<T, Failure>;

/// A value that could not be computed when its line was parsed because it
/// references a symbol that did not exist yet. It is patched into the object
/// code once the whole unit has been parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixup {
    pub segment: SegmentId,

    /// Index of the first byte to patch inside of the segment.
    pub index: usize,

    /// Amount of bytes to patch: 1 or 2 (little-endian).
    pub width: usize,

    pub expr: Expr,

    /// Value of '$' on the line where the expression was found.
    pub loc_counter: u16,

    pub location: Location,

    /// Node holding the value on the tree.
    pub node: NodeId,
}

// A value operand whose bytes have not been emitted yet. `offset` is relative
// to the start of the statement.
#[derive(Debug)]
struct PendingValue {
    expr: Expr,
    location: Location,
    node: NodeId,
    width: usize,
    offset: usize,
}

// An operand ready to be handed to the instruction set.
struct ParsedOperand {
    node: NodeId,
    operand: Operand,
    location: Location,
    pending: Option<PendingValue>,
    valid: bool,
}

/// Everything produced out of a parsed unit.
#[derive(Debug, Clone)]
pub struct Program {
    pub ast: ASTree,
    pub object: ObjectCode,
    pub symbols: SymbolMap,

    /// The CPU that was selected by the end of the unit.
    pub cpu: Cpu,
}

/// Parser for a whole source unit. It drives the scanner one token at a time,
/// builds the tree, emits the object code into the current segment and reports
/// any problem into the given error handler. Forward references are recorded
/// as fixups which are resolved at the end of `parse`.
pub struct Parser<'a> {
    scanner: Scanner,
    token: Token,
    peeked: Option<Token>,
    isa: Box<dyn InstructionSet>,
    diagnostics: &'a mut ErrorHandler,
    symbols: SymbolMap,
    ast: ASTree,
    object: ObjectCode,
    segment: SegmentId,
    fixups: Vec<Fixup>,

    // Value of the location counter at the start of the current line.
    line_address: u16,

    ended: bool,
    parsed: bool,
}

impl<'a> Parser<'a> {
    /// Returns a parser for the given `source` which reports into
    /// `diagnostics`. It starts with the Intel 8080 instruction set.
    pub fn new(source: &str, diagnostics: &'a mut ErrorHandler) -> Self {
        let mut scanner = Scanner::new(source);
        let token = scanner.next_token();

        Self {
            scanner,
            token,
            peeked: None,
            isa: instruction_set(Cpu::default()),
            diagnostics,
            symbols: SymbolMap::new(),
            ast: ASTree::new(),
            object: ObjectCode::new(DEFAULT_MODULE),
            segment: ObjectCode::DEFAULT_SEGMENT,
            fixups: vec![],
            line_address: 0,
            ended: false,
            parsed: false,
        }
    }

    /// Sets the CPU to be assumed until a CPU directive says otherwise.
    pub fn with_cpu(mut self, cpu: Cpu) -> Self {
        self.isa = instruction_set(cpu);
        self
    }

    /// Sets the name of the module for the produced object code.
    pub fn with_module(mut self, name: &str) -> Self {
        self.object.set_module_name(name);
        self
    }

    /// Parses the whole unit. Calling it more than once has no effect.
    pub fn parse(&mut self) {
        if self.parsed {
            return;
        }
        self.parsed = true;

        log::debug!("parsing with {}", self.isa.cpu());

        while !self.token.is(TokenKind::EndOfFile) {
            if self.ended {
                self.after_end();
                break;
            }
            self.parse_line();
        }

        self.resolve_fixups();

        log::debug!(
            "parsing done: {} symbols, {} errors",
            self.symbols.len(),
            self.diagnostics.num_errors()
        );
    }

    /// Returns the tree, or an error if nothing recognizable was ever parsed.
    pub fn ast(&self) -> std::result::Result<&ASTree, AssemblerException> {
        match self.ast.root() {
            Some(_) => Ok(&self.ast),
            None => Err(AssemblerException::new("no statements have been parsed")),
        }
    }

    pub fn object_code(&self) -> &ObjectCode {
        &self.object
    }

    pub fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    /// Returns the fixups that are still unresolved.
    pub fn fixups(&self) -> &[Fixup] {
        &self.fixups
    }

    pub fn cpu(&self) -> Cpu {
        self.isa.cpu()
    }

    /// Consumes the parser and returns what it produced.
    pub fn finish(self) -> Program {
        Program {
            cpu: self.isa.cpu(),
            ast: self.ast,
            object: self.object,
            symbols: self.symbols,
        }
    }

    // Token handling

    fn advance(&mut self) {
        self.token = match self.peeked.take() {
            Some(token) => token,
            None => self.scanner.next_token(),
        };
    }

    fn peek(&mut self) -> &Token {
        if self.peeked.is_none() {
            self.peeked = Some(self.scanner.next_token());
        }
        self.peeked.as_ref().unwrap_or(&self.token)
    }

    // Returns a printable version of the current token.
    fn found(&self) -> String {
        match self.token.kind {
            TokenKind::Eol | TokenKind::EndOfFile => self.token.kind.to_string(),
            _ => self.token.value.clone(),
        }
    }

    fn syntax(&self, expected: impl ToString) -> Failure {
        Failure::Syntax {
            location: self.token.location,
            expected: expected.to_string(),
            found: self.found(),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<()> {
        if self.token.is(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.syntax(kind))
        }
    }

    // Statements must be followed by either a comment or the end of the line.
    fn expect_end(&self) -> Result<()> {
        match self.token.kind {
            TokenKind::Comment | TokenKind::Eol | TokenKind::EndOfFile => Ok(()),
            _ => Err(self.syntax(TokenKind::Eol)),
        }
    }

    fn skip_to_eol(&mut self) {
        while !self.token.kind.ends_line() {
            self.advance();
        }
        if self.token.is(TokenKind::Eol) {
            self.advance();
        }
    }

    fn report(&mut self, failure: Failure) {
        match failure {
            Failure::Syntax {
                location,
                expected,
                found,
            } => self.diagnostics.syntax_error(location, expected, &found),
            Failure::Semantic { location, message } => self.diagnostics.error(location, message),
        }
    }

    // Anything after the END directive is ignored, but a warning is given if
    // there was anything meaningful.
    fn after_end(&mut self) {
        while matches!(self.token.kind, TokenKind::Eol | TokenKind::Comment) {
            self.advance();
        }
        if !self.token.is(TokenKind::EndOfFile) {
            self.diagnostics
                .warning(self.token.location, "Text after END is ignored");
        }
    }

    // Object code

    fn segment_size(&self) -> usize {
        self.object
            .get_segment(self.segment)
            .map(|s| s.size())
            .unwrap_or_default()
    }

    fn segment_offset(&self) -> u16 {
        self.object
            .get_segment(self.segment)
            .map(|s| s.offset())
            .unwrap_or_default()
    }

    fn loc_counter(&self) -> u16 {
        self.object
            .get_segment(self.segment)
            .map(|s| s.end_address() as u16)
            .unwrap_or_default()
    }

    fn emit(&mut self, bytes: &[u8], location: Location) {
        if let Ok(segment) = self.object.get_segment_mut(self.segment) {
            if segment.end_address() + bytes.len() > 0x10000 {
                self.diagnostics
                    .error(location, "Location counter out of range");
            }
            segment.append(bytes);
        }
    }

    // Turns the pending values of the statement that starts at `start` into
    // fixups.
    fn add_fixups(&mut self, start: usize, pending: Vec<PendingValue>) {
        for value in pending {
            log::trace!("forward reference at {}", value.location);

            self.fixups.push(Fixup {
                segment: self.segment,
                index: start + value.offset,
                width: value.width,
                expr: value.expr,
                loc_counter: self.line_address,
                location: value.location,
                node: value.node,
            });
        }
    }

    fn resolve_fixups(&mut self) {
        for fixup in std::mem::take(&mut self.fixups) {
            let value = match fixup.expr.eval(&self.symbols, fixup.loc_counter) {
                Ok(v) => v,
                Err(name) => {
                    self.diagnostics
                        .error(fixup.location, format!("Undefined label: {}", name));
                    continue;
                }
            };
            let value = self.check_range(value, fixup.width * 8, fixup.location);

            log::trace!("fixup at {}: {}", fixup.location, value);

            let bytes = value.to_le_bytes();
            if let Ok(segment) = self.object.get_segment_mut(fixup.segment) {
                if !segment.patch(fixup.index, &bytes[..fixup.width]) {
                    self.diagnostics
                        .exception(format!("fixup out of bounds at {}", fixup.location));
                }
            }

            let node = self.ast.node_mut(fixup.node);
            node.kind = match node.kind {
                NodeKind::RefAddress(_) => NodeKind::RefAddress(Some(value)),
                NodeKind::RefData(_) => NodeKind::RefData(Some(value)),
                ref other => other.clone(),
            };
        }
    }

    // Returns `value` if it fits in the given amount of bits. Otherwise it
    // reports an error and returns 0.
    fn check_range(&mut self, value: i64, bits: usize, location: Location) -> u16 {
        if value < 0 || value >= (1 << bits) {
            self.diagnostics.error(
                location,
                format!("Value out of range for {} bit value: {}", bits, value),
            );
            0
        } else {
            value as u16
        }
    }

    // Symbols

    fn define_label(&mut self, name: &str, location: Location, value: u16) {
        if let Err(err) = self.symbols.add(name, value, SymbolKind::Label) {
            self.diagnostics.error(location, err.message);
        }
    }

    // Lines

    fn parse_line(&mut self) {
        // Blank lines don't make it into the tree.
        if self.token.is(TokenKind::Eol) {
            self.advance();
            return;
        }

        let location = self.token.location;
        let segment = self.segment;
        let before = self.segment_size();
        self.line_address = self.loc_counter();

        let children = match self.parse_statement_line() {
            Ok(children) => children,
            Err(failure) => {
                self.report(failure);
                self.skip_to_eol();
                return;
            }
        };

        let after = self.segment_size();
        let is_org = children
            .iter()
            .any(|id| self.ast.node(*id).kind == NodeKind::Org);
        let (address, start, size) = if is_org {
            (self.loc_counter(), after, 0)
        } else {
            (self.segment_offset().wrapping_add(before as u16), before, after - before)
        };

        let line = self.ast.add(
            NodeKind::StatementLine {
                segment,
                address,
                start,
                size,
            },
            "",
            location,
        );
        for child in children {
            self.ast.append_child(line, child);
        }
        self.ast.add_line(line);

        if self.token.is(TokenKind::Eol) {
            self.advance();
        }
    }

    fn parse_statement_line(&mut self) -> Result<Vec<NodeId>> {
        let mut children = vec![];

        // Labels are either followed by a colon, or they are given without one
        // for EQU and SET.
        let mut label = None;
        if self.token.is(TokenKind::Identifier)
            && matches!(
                self.peek().kind,
                TokenKind::Colon | TokenKind::Equ | TokenKind::Set
            )
        {
            let name = self.token.value.clone();
            let location = self.token.location;
            children.push(self.ast.add(NodeKind::Label, &name, location));

            self.advance();
            if self.token.is(TokenKind::Colon) {
                self.advance();
            }
            label = Some((name, location));
        }

        let statement = match self.token.kind {
            TokenKind::Equ => self.parse_equ(label, false)?,
            TokenKind::Set => self.parse_equ(label, true)?,
            TokenKind::Org => self.parse_org(label)?,
            kind => {
                if let Some((name, location)) = &label {
                    self.define_label(name, *location, self.line_address);
                }

                match kind {
                    TokenKind::Eol | TokenKind::EndOfFile | TokenKind::Comment => {
                        self.ast.add(NodeKind::Empty, "", self.token.location)
                    }
                    TokenKind::Cpu => self.parse_cpu()?,
                    TokenKind::End => self.parse_end()?,
                    TokenKind::Db => self.parse_data(1)?,
                    TokenKind::Dw => self.parse_data(2)?,
                    TokenKind::Identifier => self.parse_opcode()?,
                    _ => return Err(self.syntax("Opcode")),
                }
            }
        };
        children.push(statement);

        if self.token.is(TokenKind::Comment) {
            children.push(
                self.ast
                    .add(NodeKind::Comment, &self.token.value, self.token.location),
            );
            self.advance();
        }
        if !self.token.kind.ends_line() {
            return Err(self.syntax(TokenKind::Eol));
        }

        Ok(children)
    }

    // Directives

    fn parse_cpu(&mut self) -> Result<NodeId> {
        let location = self.token.location;
        self.advance();

        if !matches!(self.token.kind, TokenKind::Identifier | TokenKind::Number) {
            return Err(self.syntax(TokenKind::Identifier));
        }
        let name = self.token.value.clone();
        let name_location = self.token.location;
        self.advance();
        self.expect_end()?;

        match name.parse::<Cpu>() {
            Ok(cpu) => {
                log::debug!("switching to {}", cpu);
                self.isa = instruction_set(cpu);
            }
            Err(message) => self.diagnostics.error(name_location, message),
        }

        Ok(self.ast.add(NodeKind::Cpu, &name, location))
    }

    fn parse_end(&mut self) -> Result<NodeId> {
        let location = self.token.location;
        self.advance();
        self.expect_end()?;

        self.ended = true;
        Ok(self.ast.add(NodeKind::End, "END", location))
    }

    // ORG moves the location counter of the current segment. On an empty
    // segment it sets its base address, otherwise it can only move forward and
    // the gap is filled with zeroes.
    fn parse_org(&mut self, label: Option<(String, Location)>) -> Result<NodeId> {
        let node = self.ast.add(NodeKind::Org, "ORG", self.token.location);
        self.advance();

        let (expr, text, location) = self.parse_expr()?;
        self.expect_end()?;
        let value = self.eval_now(&expr, 16, location);
        let child = self.value_node(&expr, &text, location, OperandKind::Address, value);
        self.ast.append_child(node, child);

        if let Some(value) = value {
            let current = self.loc_counter();

            if self.segment_size() == 0 {
                log::debug!("setting origin of {} to {:04X}", self.segment, value);
                if let Ok(segment) = self.object.get_segment_mut(self.segment) {
                    segment.set_offset(value);
                }
            } else if value >= current {
                self.emit(&vec![0; (value - current) as usize], location);
            } else {
                self.diagnostics.error(
                    location,
                    format!("Cannot move the location counter backwards to {:04X}", value),
                );
            }
        }

        if let Some((name, location)) = label {
            self.define_label(&name, location, self.loc_counter());
        }
        Ok(node)
    }

    // EQU and SET give a value to the label of the line. Only symbols defined
    // with SET can be given a new value later.
    fn parse_equ(&mut self, label: Option<(String, Location)>, set: bool) -> Result<NodeId> {
        let (kind, keyword) = if set {
            (NodeKind::Set, "SET")
        } else {
            (NodeKind::Equ, "EQU")
        };
        let node = self.ast.add(kind, keyword, self.token.location);
        let keyword_location = self.token.location;
        self.advance();

        let (expr, text, location) = self.parse_expr()?;
        self.expect_end()?;
        let value = self.eval_now(&expr, 16, location);
        let child = self.value_node(&expr, &text, location, OperandKind::Data16, value);
        self.ast.append_child(node, child);

        let Some((name, label_location)) = label else {
            self.diagnostics
                .error(keyword_location, format!("Missing label for {}", keyword));
            return Ok(node);
        };
        if let Some(value) = value {
            let res = if set {
                self.symbols.assign(&name, value)
            } else {
                self.symbols.add(&name, value, SymbolKind::Equ)
            };
            if let Err(err) = res {
                self.diagnostics.error(label_location, err.message);
            }
        }

        Ok(node)
    }

    // DB and DW: a list of values. DB also takes strings, which emit one byte
    // per character.
    fn parse_data(&mut self, width: usize) -> Result<NodeId> {
        let (kind, keyword) = if width == 1 {
            (NodeKind::Db, "DB")
        } else {
            (NodeKind::Dw, "DW")
        };
        let node = self.ast.add(kind, keyword, self.token.location);
        self.advance();

        let operand = if width == 1 {
            OperandKind::Data8
        } else {
            OperandKind::Data16
        };
        let mut bytes = vec![];
        let mut pending = vec![];

        loop {
            if width == 1 && self.token.is(TokenKind::String) && self.string_item_ends() {
                // One node per character. The first one carries the source text
                // of the whole string.
                let value = self.token.value.clone();
                for (idx, c) in value[1..value.len() - 1].chars().enumerate() {
                    let byte = self.check_range(c as i64, 8, self.token.location) as u8;
                    let text = if idx == 0 { value.as_str() } else { "" };
                    let item = self
                        .ast
                        .add(NodeKind::Data8(byte), text, self.token.location);
                    self.ast.append_child(node, item);
                    bytes.push(byte);
                }
                self.advance();
            } else {
                let parsed = self.parse_value(operand)?;
                self.ast.append_child(node, parsed.node);

                let value = match parsed.operand {
                    Operand::Value(v) => v as u16,
                    Operand::Register(_) => 0,
                };
                if let Some(mut forward) = parsed.pending {
                    forward.offset = bytes.len();
                    pending.push(forward);
                }
                bytes.extend_from_slice(&value.to_le_bytes()[..width]);
            }

            if !self.token.is(TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect_end()?;

        let start = self.segment_size();
        let location = self.ast.node(node).location;
        self.emit(&bytes, location);
        self.add_fixups(start, pending);

        Ok(node)
    }

    // Returns true if the string on the current token is a whole item of a
    // data list, rather than the start of an expression.
    fn string_item_ends(&mut self) -> bool {
        let next = self.peek().kind;
        matches!(
            next,
            TokenKind::Comma | TokenKind::Comment | TokenKind::Eol | TokenKind::EndOfFile
        ) && self.token.value.chars().count() != 3
    }

    // Instructions

    fn parse_opcode(&mut self) -> Result<NodeId> {
        let mnemonic = self.token.value.clone();
        let location = self.token.location;

        let info = match self.isa.lookup(&mnemonic) {
            Lookup::Supported(info) => info,
            Lookup::OtherCpu(_) => return Err(self.syntax("Opcode")),
            Lookup::Unknown => {
                return Err(Failure::Semantic {
                    location,
                    message: format!("Unknown mnemonic: {}", mnemonic),
                })
            }
        };
        let node = self.ast.add(NodeKind::Opcode, &info.mnemonic, location);
        self.advance();

        let mut operands = vec![];
        for (idx, kind) in info.operands.iter().enumerate() {
            if idx > 0 {
                self.expect(TokenKind::Comma)?;
            }
            let parsed = match kind {
                OperandKind::Register8 | OperandKind::Register16 => self.parse_register(*kind)?,
                _ => self.parse_value(*kind)?,
            };
            self.ast.append_child(node, parsed.node);
            operands.push(parsed);
        }
        self.expect_end()?;

        // Bad operands still take the room of the instruction.
        if operands.iter().any(|o| !o.valid) {
            self.emit(&vec![0; info.size], location);
            return Ok(node);
        }

        let values: Vec<Operand> = operands.iter().map(|o| o.operand.clone()).collect();
        match self.isa.encode(&info.mnemonic, &values) {
            Ok(bytes) => {
                let start = self.segment_size();
                self.emit(&bytes, location);

                // The value of an instruction always comes right after the
                // opcode.
                let pending = operands
                    .into_iter()
                    .filter_map(|o| o.pending)
                    .map(|mut p| {
                        p.offset = 1;
                        p
                    })
                    .collect();
                self.add_fixups(start, pending);
            }
            Err(err) => {
                let at = err.operand.and_then(|idx| operands.get(idx));
                if let Some(operand) = at {
                    let tagged = self.ast.node_mut(operand.node);
                    tagged.kind = match tagged.kind {
                        NodeKind::Register8(_) => NodeKind::Register8(None),
                        NodeKind::Register16(_) => NodeKind::Register16(None),
                        NodeKind::RstCode(_) => NodeKind::RstCode(None),
                        ref other => other.clone(),
                    };
                }
                let error_location = at.map(|o| o.location).unwrap_or(location);
                self.diagnostics.error(error_location, err.to_string());

                // MOV M,M is not an instruction at all.
                if !matches!(err.kind, EncodingErrorKind::IncorrectOpcode(_)) {
                    self.emit(&vec![0; info.size], location);
                }
            }
        }

        Ok(node)
    }

    fn parse_register(&mut self, kind: OperandKind) -> Result<ParsedOperand> {
        if !self.token.is(TokenKind::Identifier) {
            return Err(self.syntax(kind));
        }

        let name = self.token.value.clone();
        let location = self.token.location;
        let node_kind = if kind == OperandKind::Register8 {
            NodeKind::Register8(register_code(&name))
        } else {
            let code = PAIRS_SP
                .iter()
                .chain(PAIRS_PSW.iter())
                .position(|p| p.eq_ignore_ascii_case(&name))
                .map(|p| (p % PAIRS_SP.len()) as u8);
            NodeKind::Register16(code)
        };
        let node = self.ast.add(node_kind, &name, location);
        self.advance();

        Ok(ParsedOperand {
            node,
            operand: Operand::Register(name),
            location,
            pending: None,
            valid: true,
        })
    }

    // Parses a value operand. Values that cannot be computed yet are given as 0
    // and returned as pending. Values out of range are reported and given as 0
    // too.
    fn parse_value(&mut self, kind: OperandKind) -> Result<ParsedOperand> {
        let (expr, text, location) = self.parse_expr()?;

        let (value, valid) = match expr.eval(&self.symbols, self.line_address) {
            Ok(v) if kind == OperandKind::RstCode => (Some(v), true),
            Ok(v) => {
                let bits = if kind == OperandKind::Data8 { 8 } else { 16 };
                (Some(self.check_range(v, bits, location) as i64), true)
            }
            Err(name) if kind == OperandKind::RstCode => {
                self.diagnostics
                    .error(location, format!("Undefined label: {}", name));
                (None, false)
            }
            Err(_) => (None, true),
        };

        let node = if !valid {
            self.ast.add(NodeKind::UndefinedOperand, &text, location)
        } else if kind == OperandKind::RstCode {
            let code = value.filter(|v| (0..=7).contains(v)).map(|v| v as u8);
            self.ast.add(NodeKind::RstCode(code), &text, location)
        } else {
            self.value_node(&expr, &text, location, kind, value.map(|v| v as u16))
        };

        let pending = match value {
            None if valid => Some(PendingValue {
                expr,
                location,
                node,
                width: if kind == OperandKind::Data8 { 1 } else { 2 },
                offset: 0,
            }),
            _ => None,
        };

        Ok(ParsedOperand {
            node,
            operand: Operand::Value(value.unwrap_or_default()),
            location,
            pending,
            valid,
        })
    }

    // Evaluates an expression that cannot contain forward references. Returns
    // None if the value could not be computed, in which case the error has
    // already been reported.
    fn eval_now(&mut self, expr: &Expr, bits: usize, location: Location) -> Option<u16> {
        match expr.eval(&self.symbols, self.line_address) {
            Ok(v) => {
                if v < 0 || v >= (1 << bits) {
                    self.check_range(v, bits, location);
                    None
                } else {
                    Some(v as u16)
                }
            }
            Err(name) => {
                self.diagnostics
                    .error(location, format!("Undefined label: {}", name));
                None
            }
        }
    }

    // Returns the node that best describes the given expression.
    fn value_node(
        &mut self,
        expr: &Expr,
        text: &str,
        location: Location,
        kind: OperandKind,
        value: Option<u16>,
    ) -> NodeId {
        let node_kind = if expr.literal().is_some() {
            let value = value.unwrap_or_default();
            if kind == OperandKind::Data8 {
                NodeKind::Data8(value as u8)
            } else {
                NodeKind::Data16(value)
            }
        } else if expr.is_loc_counter() {
            NodeKind::LocCounter(self.line_address)
        } else if expr.symbol().is_some() {
            if kind == OperandKind::Address {
                NodeKind::RefAddress(value)
            } else {
                NodeKind::RefData(value)
            }
        } else {
            NodeKind::Expression(expr.clone())
        };

        self.ast.add(node_kind, text, location)
    }

    // expr := ['+'|'-'] term (('+'|'-') term)*
    // term := Number | Identifier | '$' | one-character String
    fn parse_expr(&mut self) -> Result<(Expr, String, Location)> {
        let location = self.token.location;
        let mut text = String::new();
        let mut expr = Expr::default();

        let mut negative = false;
        if matches!(self.token.kind, TokenKind::Plus | TokenKind::Minus) {
            negative = self.token.is(TokenKind::Minus);
            text.push_str(&self.token.value);
            self.advance();
        }

        loop {
            let term = match self.token.kind {
                TokenKind::Number => match self.token.number() {
                    Some(n) => Term::Number(n),
                    None => {
                        return Err(Failure::Semantic {
                            location: self.token.location,
                            message: format!("Invalid number: {}", self.token.value),
                        })
                    }
                },
                TokenKind::Identifier => Term::Symbol(self.token.value.clone()),
                TokenKind::Dollar => Term::LocCounter,
                TokenKind::String if self.token.value.chars().count() == 3 => {
                    match self.token.value.chars().nth(1) {
                        Some(c) => Term::Char(c),
                        None => return Err(self.syntax("Value")),
                    }
                }
                _ => return Err(self.syntax("Value")),
            };
            text.push_str(&self.token.value);
            expr.terms.push((negative, term));
            self.advance();

            match self.token.kind {
                TokenKind::Plus => negative = false,
                TokenKind::Minus => negative = true,
                _ => break,
            }
            text.push_str(&self.token.value);
            self.advance();
        }

        Ok((expr, text, location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Severity;

    fn parse(source: &str) -> (Program, ErrorHandler) {
        parse_with(source, Cpu::Intel8080)
    }

    fn parse_with(source: &str, cpu: Cpu) -> (Program, ErrorHandler) {
        let mut diagnostics = ErrorHandler::new();
        let mut parser = Parser::new(source, &mut diagnostics).with_cpu(cpu);
        parser.parse();
        let program = parser.finish();
        (program, diagnostics)
    }

    fn bytes(program: &Program) -> Vec<u8> {
        program
            .object
            .get_segment(SegmentId::Code)
            .unwrap()
            .bytes()
            .to_vec()
    }

    fn assert_instruction(source: &str, expected: &[u8]) {
        let (program, diagnostics) = parse(source);
        assert_eq!(
            diagnostics.num_errors(),
            0,
            "'{}': {:#?}",
            source,
            diagnostics.messages()
        );
        assert_eq!(bytes(&program), expected, "'{}'", source);
    }

    fn assert_error(source: &str, message: &str) -> Program {
        let (program, diagnostics) = parse(source);
        assert_eq!(diagnostics.num_errors(), 1, "'{}': {:#?}", source, diagnostics.messages());
        assert_eq!(diagnostics.messages()[0].text, message);
        assert_eq!(diagnostics.messages()[0].severity, Severity::Error);
        program
    }

    // Returns the kind and text of the statement of each line.
    fn statements(ast: &ASTree) -> Vec<(NodeKind, String)> {
        ast.lines()
            .filter_map(|line| ast.statement(line))
            .map(|id| (ast.node(id).kind.clone(), ast.node(id).text_value.clone()))
            .collect()
    }

    fn operands(ast: &ASTree, line: usize) -> Vec<NodeKind> {
        let line = ast.lines().nth(line).unwrap();
        let statement = ast.statement(line).unwrap();
        ast.children(statement)
            .map(|id| ast.node(id).kind.clone())
            .collect()
    }

    #[test]
    fn simple_program() {
        let (program, diagnostics) = parse("CPU Intel8080\nMOV A,A\nEND\n");

        assert_eq!(diagnostics.messages().len(), 0);
        assert_eq!(bytes(&program), vec![0x7F]);
        assert_eq!(
            statements(&program.ast),
            vec![
                (NodeKind::Cpu, String::from("Intel8080")),
                (NodeKind::Opcode, String::from("MOV")),
                (NodeKind::End, String::from("END")),
            ]
        );

        let line = program.ast.lines().nth(1).unwrap();
        let mov = program.ast.statement(line).unwrap();
        let texts: Vec<&str> = program
            .ast
            .children(mov)
            .map(|id| program.ast.node(id).text_value.as_str())
            .collect();
        assert_eq!(texts, vec!["A", "A"]);
    }

    #[test]
    fn mov_m_m() {
        let (program, diagnostics) = parse("MOV M,M\nNOP\n");

        assert_eq!(diagnostics.num_errors(), 1);
        assert_eq!(diagnostics.messages()[0].text, "Incorrect opcode: MOV M,M");
        assert_eq!(diagnostics.messages()[0].location, Location::new(1, 1, 0));

        // Nothing for the bad line, but parsing went on.
        assert_eq!(bytes(&program), vec![0x00]);
        assert_eq!(program.ast.lines().count(), 2);
    }

    #[test]
    fn lxi_out_of_range() {
        let program = assert_error("LXI D, 10000h", "Value out of range for 16 bit value: 65536");
        assert_eq!(bytes(&program), vec![0x11, 0x00, 0x00]);
    }

    #[test]
    fn mvi_out_of_range() {
        let program = assert_error("MVI A,256", "Value out of range for 8 bit value: 256");
        assert_eq!(bytes(&program), vec![0x3E, 0x00]);

        assert_error("MVI A,-1", "Value out of range for 8 bit value: -1");
        assert_error("ADI 1000", "Value out of range for 8 bit value: 1000");
    }

    #[test]
    fn instruction_families() {
        assert_instruction("NOP", &[0x00]);
        assert_instruction("hlt", &[0x76]);
        assert_instruction("MOV B,C", &[0x41]);
        assert_instruction("mov a,m", &[0x7E]);
        assert_instruction("MVI M,12h", &[0x36, 0x12]);
        assert_instruction("LXI SP,0FFFFh", &[0x31, 0xFF, 0xFF]);
        assert_instruction("INR C", &[0x0C]);
        assert_instruction("SUB E", &[0x93]);
        assert_instruction("POP PSW", &[0xF1]);
        assert_instruction("INX D", &[0x13]);
        assert_instruction("LDAX B", &[0x0A]);
        assert_instruction("CALL 1234h", &[0xCD, 0x34, 0x12]);
        assert_instruction("STA 8000h", &[0x32, 0x00, 0x80]);
        assert_instruction("IN 1", &[0xDB, 0x01]);
        assert_instruction("CPI 'A'", &[0xFE, 0x41]);
        assert_instruction("RST 1", &[0xCF]);
    }

    #[test]
    fn forward_and_backward_labels() {
        let (forward, d1) = parse("JMP START\nSTART: NOP\n");
        let (backward, d2) = parse("START: NOP\nJMP START\n");

        assert_eq!(d1.num_errors(), 0);
        assert_eq!(d2.num_errors(), 0);
        assert_eq!(bytes(&forward), vec![0xC3, 0x03, 0x00, 0x00]);
        assert_eq!(bytes(&backward), vec![0x00, 0xC3, 0x00, 0x00]);

        // Resolved references are also reflected on the tree.
        assert_eq!(operands(&forward.ast, 0), vec![NodeKind::RefAddress(Some(3))]);
        assert_eq!(operands(&backward.ast, 1), vec![NodeKind::RefAddress(Some(0))]);
    }

    #[test]
    fn labels_ignore_case() {
        assert_instruction("Loop: JMP LOOP", &[0xC3, 0x00, 0x00]);
        assert_instruction("JMP later\nLATER:", &[0xC3, 0x03, 0x00]);
    }

    #[test]
    fn undefined_label() {
        let (program, diagnostics) = parse("NOP\nJMP NOWHERE\n");

        assert_eq!(diagnostics.num_errors(), 1);
        assert_eq!(diagnostics.messages()[0].text, "Undefined label: NOWHERE");
        assert_eq!(diagnostics.messages()[0].location, Location::new(2, 5, 8));
        assert_eq!(bytes(&program), vec![0x00, 0xC3, 0x00, 0x00]);
        assert_eq!(operands(&program.ast, 1), vec![NodeKind::RefAddress(None)]);
    }

    #[test]
    fn duplicate_label() {
        let (program, diagnostics) = parse("A1: NOP\na1: NOP\n");

        assert_eq!(diagnostics.num_errors(), 1);
        assert_eq!(diagnostics.messages()[0].text, "Duplicate label: a1");
        assert_eq!(program.symbols.lookup("A1").unwrap(), 0);
    }

    #[test]
    fn mnemonic_of_another_cpu() {
        assert_error("RIM", "Expected Opcode: RIM");

        let (program, diagnostics) = parse("CPU Intel8085\nRIM\nSIM\n");
        assert_eq!(diagnostics.num_errors(), 0);
        assert_eq!(bytes(&program), vec![0x20, 0x30]);
        assert_eq!(program.cpu, Cpu::Intel8085);

        let (program, diagnostics) = parse_with("RIM", Cpu::Intel8085);
        assert_eq!(diagnostics.num_errors(), 0);
        assert_eq!(bytes(&program), vec![0x20]);
    }

    #[test]
    fn unknown_things() {
        assert_error("FOO A", "Unknown mnemonic: FOO");
        assert_error("CPU Z80", "Unknown CPU: Z80");
    }

    #[test]
    fn invalid_registers() {
        let program = assert_error("MOV X,A", "Invalid destination register: X");
        assert_eq!(bytes(&program), vec![0x00]);
        assert_eq!(
            operands(&program.ast, 0),
            vec![NodeKind::Register8(None), NodeKind::Register8(Some(7))]
        );

        assert_error("MOV A,SP", "Invalid source register: SP");
        assert_error("INR PSW", "Invalid register: PSW");

        let program = assert_error("LXI PSW,0", "Invalid register pair: PSW, expected one of B, D, H, SP");
        assert_eq!(operands(&program.ast, 0)[0], NodeKind::Register16(None));
        assert_error("PUSH SP", "Invalid register pair: SP, expected one of B, D, H, PSW");
    }

    #[test]
    fn rst_codes() {
        let program = assert_error("RST 8", "Invalid RST code: 8");
        assert_eq!(operands(&program.ast, 0), vec![NodeKind::RstCode(None)]);
        assert_eq!(bytes(&program), vec![0x00]);

        let (program, _) = parse("RST 7");
        assert_eq!(operands(&program.ast, 0), vec![NodeKind::RstCode(Some(7))]);

        let program = assert_error("RST LATER\nLATER:", "Undefined label: LATER");
        assert_eq!(operands(&program.ast, 0), vec![NodeKind::UndefinedOperand]);
    }

    #[test]
    fn operand_node_kinds() {
        let (program, diagnostics) = parse("HERE: MVI A,2\nJMP $\nLXI H,HERE+1\nJMP HERE\nMVI B,HERE\n");

        assert_eq!(diagnostics.num_errors(), 0);
        assert_eq!(operands(&program.ast, 0)[1], NodeKind::Data8(2));
        assert_eq!(operands(&program.ast, 1), vec![NodeKind::LocCounter(2)]);
        assert!(matches!(operands(&program.ast, 2)[1], NodeKind::Expression(_)));
        assert_eq!(operands(&program.ast, 3), vec![NodeKind::RefAddress(Some(0))]);
        assert_eq!(operands(&program.ast, 4)[1], NodeKind::RefData(Some(0)));
    }

    #[test]
    fn equ_and_set() {
        assert_instruction("COUNT EQU 10\nMVI B,COUNT", &[0x06, 0x0A]);
        assert_instruction("LF: EQU 0Ah\nMVI A,LF", &[0x3E, 0x0A]);
        assert_instruction("X SET 1\nMVI A,X\nX SET 2\nMVI A,X", &[0x3E, 0x01, 0x3E, 0x02]);

        assert_error("X EQU 1\nX EQU 2", "Duplicate label: X");
        assert_error("X EQU 1\nX SET 2", "Duplicate label: X");
        assert_error("EQU 5", "Missing label for EQU");
        assert_error("X EQU LATER\nLATER:", "Undefined label: LATER");
    }

    #[test]
    fn expressions() {
        assert_instruction("ORG 100h\nHERE: JMP $+3", &[0xC3, 0x03, 0x01]);
        assert_instruction("BASE EQU 10h\nMVI A,BASE-1+'0'", &[0x3E, 0x3F]);
        assert_instruction("LXI H,FIN-START\nSTART: NOP\nNOP\nFIN:", &[0x21, 0x02, 0x00, 0x00, 0x00]);
        assert_instruction("MVI A,-1+2", &[0x3E, 0x01]);
    }

    #[test]
    fn forward_reference_out_of_range() {
        let (program, diagnostics) = parse("MVI A,FAR\nFAR EQU 300h\n");

        assert_eq!(diagnostics.num_errors(), 1);
        assert_eq!(diagnostics.messages()[0].text, "Value out of range for 8 bit value: 768");
        assert_eq!(bytes(&program), vec![0x3E, 0x00]);
    }

    #[test]
    fn org() {
        let (program, diagnostics) = parse("ORG 100h\nSTART: JMP START\n");
        assert_eq!(diagnostics.num_errors(), 0);

        let segment = program.object.get_segment(SegmentId::Code).unwrap();
        assert_eq!(segment.offset(), 0x100);
        assert_eq!(segment.bytes(), &[0xC3, 0x00, 0x01]);

        // Moving forward pads with zeroes.
        assert_instruction("MVI A,1\nORG 4\nNOP", &[0x3E, 0x01, 0x00, 0x00, 0x00]);

        // Labels on ORG lines take the new address.
        let (program, _) = parse("NOP\nHERE: ORG 10h\n");
        assert_eq!(program.symbols.lookup("HERE").unwrap(), 0x10);

        assert_error("NOP\nNOP\nORG 1", "Cannot move the location counter backwards to 0001");
    }

    #[test]
    fn data_directives() {
        assert_instruction(
            "DB 'AB', 1, 2\nDW 1234h, LABEL\nLABEL: NOP",
            &[0x41, 0x42, 0x01, 0x02, 0x34, 0x12, 0x08, 0x00, 0x00],
        );
        assert_instruction("DB 'A'+1, \"x\"", &[0x42, 0x78]);
        assert_instruction("DB ''", &[]);
        assert_error("DB 1,300", "Value out of range for 8 bit value: 300");

        let (program, _) = parse("DB 'hi'");
        assert_eq!(operands(&program.ast, 0), vec![NodeKind::Data8(b'h'), NodeKind::Data8(b'i')]);
    }

    #[test]
    fn syntax_errors() {
        let (program, diagnostics) = parse("MOV A B\nNOP\n");
        assert_eq!(diagnostics.num_errors(), 1);
        assert_eq!(diagnostics.messages()[0].text, "Expected Comma: B");
        assert_eq!(bytes(&program), vec![0x00]);

        // The bad line is not in the tree.
        assert_eq!(program.ast.lines().count(), 1);

        assert_error("# what\nNOP", "Expected Opcode: #");
        assert_error("NOP A", "Expected EOL: A");
        assert_error("MVI A,\n", "Expected Value: EOL");
        assert_error("MVI A,", "Expected Value: EndOfFile");
        assert_error("MOV 1,A", "Expected Register: 1");
        assert_error("DB 'abc", "Expected Value: 'abc");
    }

    #[test]
    fn text_after_end() {
        let (program, diagnostics) = parse("NOP\nEND ; done\n\nNOP\n");

        assert_eq!(diagnostics.num_errors(), 0);
        assert_eq!(diagnostics.num_warnings(), 1);
        assert_eq!(diagnostics.messages()[0].text, "Text after END is ignored");
        assert_eq!(diagnostics.messages()[0].location.line, 4);
        assert_eq!(bytes(&program), vec![0x00]);

        let (_, diagnostics) = parse("END\n; the end\n");
        assert_eq!(diagnostics.messages().len(), 0);
    }

    #[test]
    fn statement_lines() {
        let (program, _) = parse("; header\nSTART: MVI A,1 ; load\n\nJMP START\n");
        let ast = &program.ast;

        let lines: Vec<NodeId> = ast.lines().collect();
        assert_eq!(lines.len(), 3);

        assert_eq!(ast.node(ast.statement(lines[0]).unwrap()).kind, NodeKind::Empty);
        assert_eq!(ast.comment(lines[0]).unwrap().text_value, " header");

        assert_eq!(ast.label(lines[1]).unwrap().text_value, "START");
        assert_eq!(ast.comment(lines[1]).unwrap().text_value, " load");
        assert_eq!(
            ast.node(lines[1]).kind,
            NodeKind::StatementLine {
                segment: SegmentId::Code,
                address: 0,
                start: 0,
                size: 2,
            }
        );
        assert_eq!(
            ast.node(lines[2]).kind,
            NodeKind::StatementLine {
                segment: SegmentId::Code,
                address: 2,
                start: 2,
                size: 3,
            }
        );
        assert_eq!(ast.node(lines[2]).location.line, 4);
    }

    #[test]
    fn no_root_without_statements() {
        let mut diagnostics = ErrorHandler::new();
        let mut parser = Parser::new("\n\n", &mut diagnostics);
        parser.parse();
        assert!(parser.ast().is_err());

        let mut diagnostics = ErrorHandler::new();
        let mut parser = Parser::new("@@@", &mut diagnostics);
        parser.parse();
        assert!(parser.ast().is_err());

        let mut diagnostics = ErrorHandler::new();
        let mut parser = Parser::new("; just a comment", &mut diagnostics);
        parser.parse();
        assert!(parser.ast().is_ok());
    }

    #[test]
    fn reparse_is_idempotent() {
        let source = "CPU Intel8085\nJMP FWD\nMOV M,M\nFWD: MVI A,300\nDB 'ok', $\nRIM\nEND\nNOP";

        let (p1, d1) = parse(source);
        let (p2, d2) = parse(source);

        assert_eq!(p1.ast, p2.ast);
        assert_eq!(p1.object, p2.object);
        assert_eq!(d1.messages(), d2.messages());
    }

    #[test]
    fn message_counts_add_up() {
        let (_, diagnostics) = parse("FOO\nMOV M,M\nJMP NOWHERE\nX: X:\nEND\nNOP");

        assert!(diagnostics.num_errors() > 0);
        assert_eq!(
            diagnostics.messages().len(),
            diagnostics.num_errors() + diagnostics.num_warnings() + diagnostics.num_exceptions()
        );
    }

    #[test]
    fn instruction_sizes_do_not_depend_on_values() {
        // Same shapes, different (and unresolved) values: same addresses.
        let (a, _) = parse("JMP 0\nMVI A,0\nHERE: NOP");
        let (b, _) = parse("JMP X\nMVI A,Y\nHERE: NOP\nX EQU 1234h\nY EQU 12h");

        assert_eq!(a.symbols.lookup("HERE").unwrap(), 5);
        assert_eq!(b.symbols.lookup("HERE").unwrap(), 5);
        assert_eq!(bytes(&b), vec![0xC3, 0x34, 0x12, 0x3E, 0x12, 0x00]);
    }

    #[test]
    fn bad_operands_keep_instruction_sizes() {
        let here = |source: &str| parse(source).0.symbols.lookup("HERE").unwrap();

        assert_eq!(here("RST 7\nHERE: NOP"), 1);
        assert_eq!(here("RST 8\nHERE: NOP"), 1);
        assert_eq!(here("RST LATER\nHERE: NOP\nLATER EQU 1"), 1);
        assert_eq!(here("MVI X,1\nHERE: NOP"), 2);
        assert_eq!(here("LXI PSW,0\nHERE: NOP"), 3);

        // Except for MOV M,M, which does not encode to anything.
        assert_eq!(here("MOV M,M\nHERE: NOP"), 0);

        let (program, _) = parse("MVI X,1\nJMP HERE\nHERE: NOP");
        assert_eq!(bytes(&program), vec![0x00, 0x00, 0xC3, 0x05, 0x00, 0x00]);
    }

    #[test]
    fn parse_twice_is_a_noop() {
        let mut diagnostics = ErrorHandler::new();
        let mut parser = Parser::new("NOP", &mut diagnostics).with_module("TEST");
        parser.parse();
        parser.parse();

        assert_eq!(parser.object_code().module_name(), "TEST");
        assert_eq!(parser.object_code().get_segment(SegmentId::Code).unwrap().size(), 1);
        assert!(parser.fixups().is_empty());
    }
}
