use crate::ast::{ASTree, NodeId, NodeKind};
use crate::errors::ErrorHandler;
use crate::parser::Program;
use std::collections::HashMap;
use std::io::{self, Write};

/// Amount of bytes shown on each row of the listing.
const BYTES_PER_ROW: usize = 4;

/// Columns where each field of the listing starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingColumns {
    pub address: usize,
    pub label: usize,
    pub mnemonic: usize,
    pub comment: usize,
}

impl Default for ListingColumns {
    fn default() -> Self {
        Self {
            address: 0,
            label: 20,
            mnemonic: 30,
            comment: 50,
        }
    }
}

/// Text writer that keeps track of the current column, so output can be
/// aligned into columns.
pub struct PrettyPrinter<W: Write> {
    out: W,
    column: usize,
}

impl<W: Write> PrettyPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out, column: 0 }
    }

    /// Returns the current column.
    pub fn current(&self) -> usize {
        self.column
    }

    /// Pads with spaces so the next write starts at column `n`. It does nothing
    /// if the current column is already past `n`: nothing is ever truncated.
    pub fn column(&mut self, n: usize) -> io::Result<()> {
        if self.column < n {
            write!(self.out, "{:width$}", "", width = n - self.column)?;
            self.column = n;
        }
        Ok(())
    }

    pub fn write(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes())?;
        match text.rfind('\n') {
            Some(idx) => self.column = text[idx + 1..].chars().count(),
            None => self.column += text.chars().count(),
        }
        Ok(())
    }

    pub fn newline(&mut self) -> io::Result<()> {
        self.out.write_all(b"\n")?;
        self.column = 0;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

// Splits the source into lines the same way the scanner does.
fn source_lines(source: &str) -> Vec<String> {
    let normalized = source.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = normalized.split('\n').map(String::from).collect();
    if normalized.ends_with('\n') {
        lines.pop();
    }
    lines
}

// Returns the value given to the symbol of an EQU or SET line.
fn assigned_value(program: &Program, statement: NodeId, address: u16) -> Option<u16> {
    let ast = &program.ast;
    let child = ast.children(statement).next()?;

    match &ast.node(child).kind {
        NodeKind::Data16(v) | NodeKind::LocCounter(v) => Some(*v),
        NodeKind::RefData(v) => *v,
        NodeKind::Expression(expr) => expr
            .eval(&program.symbols, address)
            .ok()
            .and_then(|v| u16::try_from(v).ok()),
        _ => None,
    }
}

struct Listing<'a, W: Write> {
    pp: PrettyPrinter<W>,
    program: &'a Program,
    columns: ListingColumns,
}

impl<W: Write> Listing<'_, W> {
    fn ast(&self) -> &ASTree {
        &self.program.ast
    }

    fn line(&mut self, line: NodeId) -> io::Result<()> {
        let NodeKind::StatementLine {
            segment,
            address,
            start,
            size,
        } = self.ast().node(line).kind
        else {
            return Ok(());
        };

        let label = self.ast().label(line).map(|n| n.text_value.clone());
        let comment = self.ast().comment(line).map(|n| n.text_value.clone());
        let statement = self.ast().statement(line);
        let text = self.ast().statement_text(line);
        let kind = statement.map(|id| self.ast().node(id).kind.clone());

        let bytes: Vec<u8> = self
            .program
            .object
            .get_segment(segment)
            .ok()
            .and_then(|s| s.bytes().get(start..start + size))
            .map(|b| b.to_vec())
            .unwrap_or_default();
        let mut rows = bytes.chunks(BYTES_PER_ROW);

        // Address (or assigned value) and the first row of bytes.
        let shown = match kind {
            Some(NodeKind::Equ) | Some(NodeKind::Set) => {
                statement.and_then(|id| assigned_value(self.program, id, address))
            }
            Some(NodeKind::Empty) if label.is_none() => None,
            _ => Some(address),
        };
        if let Some(value) = shown {
            self.pp.column(self.columns.address)?;
            self.pp.write(&format!("{:04X}", value))?;
            if let Some(row) = rows.next() {
                self.bytes(row)?;
            }
        }

        if let Some(label) = label {
            self.pp.column(self.columns.label)?;
            self.pp.write(&format!("{}:", label))?;
        }
        if !text.is_empty() {
            self.pp.column(self.columns.mnemonic)?;
            self.pp.write(&text)?;
        }
        if let Some(comment) = comment {
            self.pp.column(self.columns.comment)?;
            self.pp.write(&format!(";{}", comment))?;
        }

        // Remaining bytes go on their own rows.
        for (idx, row) in rows.enumerate() {
            self.pp.newline()?;
            self.pp.column(self.columns.address)?;
            let at = address.wrapping_add(((idx + 1) * BYTES_PER_ROW) as u16);
            self.pp.write(&format!("{:04X}", at))?;
            self.bytes(row)?;
        }

        Ok(())
    }

    fn bytes(&mut self, row: &[u8]) -> io::Result<()> {
        for byte in row {
            self.pp.write(&format!(" {:02X}", byte))?;
        }
        Ok(())
    }
}

/// Writes the listing for the given source and the program that was parsed
/// out of it. Every source line is followed by its messages, and the listing
/// ends with the table of symbols.
pub fn write_listing<W: Write>(
    out: W,
    source: &str,
    program: &Program,
    diagnostics: &ErrorHandler,
    columns: ListingColumns,
) -> io::Result<W> {
    let by_line: HashMap<usize, NodeId> = program
        .ast
        .lines()
        .map(|id| (program.ast.node(id).location.line, id))
        .collect();

    let mut listing = Listing {
        pp: PrettyPrinter::new(out),
        program,
        columns,
    };

    for (idx, text) in source_lines(source).iter().enumerate() {
        let number = idx + 1;

        match by_line.get(&number) {
            Some(&line) => listing.line(line)?,
            None => {
                // Lines which did not make it into the tree are shown as they
                // are.
                let text = text.trim();
                if !text.is_empty() {
                    listing.pp.column(columns.label)?;
                    listing.pp.write(text)?;
                }
            }
        }
        listing.pp.newline()?;

        for message in diagnostics.messages_for_line(number) {
            listing
                .pp
                .write(&format!("--> {}: {}", message.severity, message))?;
            listing.pp.newline()?;
        }
    }

    for message in diagnostics.messages().iter().filter(|m| m.is_global()) {
        listing
            .pp
            .write(&format!("--> {}: {}", message.severity, message))?;
        listing.pp.newline()?;
    }

    if !program.symbols.is_empty() {
        listing.pp.newline()?;
        listing.pp.write("Symbols:")?;
        listing.pp.newline()?;
        for symbol in program.symbols.sorted() {
            listing.pp.write(&symbol.name)?;
            listing.pp.column(columns.label)?;
            listing.pp.write(&format!("{:04X}", symbol.value))?;
            listing.pp.newline()?;
        }
    }

    Ok(listing.pp.into_inner())
}
