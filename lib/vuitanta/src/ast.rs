use crate::location::Location;
use crate::object::SegmentId;
use crate::symbols::SymbolMap;
use std::fmt;

/// Index of a node inside of its tree.
pub type NodeId = usize;

/// A term of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Number(i64),
    Symbol(String),
    /// The location counter ('$').
    LocCounter,
    /// A one-character string literal.
    Char(char),
}

/// A flat expression: a sum of terms, each of them possibly negated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expr {
    pub terms: Vec<(bool, Term)>,
}

impl Expr {
    /// Returns the value of the expression if it's just a positive literal.
    pub fn literal(&self) -> Option<i64> {
        match self.terms.as_slice() {
            [(false, Term::Number(n))] => Some(*n),
            [(false, Term::Char(c))] => Some(*c as i64),
            _ => None,
        }
    }

    /// Returns the name of the symbol if the expression is just that.
    pub fn symbol(&self) -> Option<&str> {
        match self.terms.as_slice() {
            [(false, Term::Symbol(name))] => Some(name),
            _ => None,
        }
    }

    /// Returns true if the expression is just the location counter.
    pub fn is_loc_counter(&self) -> bool {
        matches!(self.terms.as_slice(), [(false, Term::LocCounter)])
    }

    /// Iterates over the names of the symbols referenced by this expression.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().filter_map(|(_, term)| match term {
            Term::Symbol(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Evaluates the expression given the current symbols and the value of the
    /// location counter. On failure it returns the name of the first symbol
    /// that could not be found.
    pub fn eval(&self, symbols: &SymbolMap, loc_counter: u16) -> Result<i64, String> {
        let mut res: i64 = 0;

        for (negative, term) in &self.terms {
            let value = match term {
                Term::Number(n) => *n,
                Term::Char(c) => *c as i64,
                Term::LocCounter => loc_counter as i64,
                Term::Symbol(name) => match symbols.lookup(name) {
                    Ok(v) => v as i64,
                    Err(_) => return Err(name.clone()),
                },
            };
            res = if *negative {
                res.saturating_sub(value)
            } else {
                res.saturating_add(value)
            };
        }

        Ok(res)
    }
}

/// The closed set of node kinds, with the data that is relevant to each one of
/// them.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The root of the tree. Its children are statement lines.
    Tree,

    /// A physical source line. Its children are, in order: an optional label,
    /// the statement (`Empty` if there was none) and an optional comment. It
    /// also records where its bytes were placed.
    StatementLine {
        segment: SegmentId,
        address: u16,
        start: usize,
        size: usize,
    },

    Comment,
    Label,
    Empty,

    // Directives. `Cpu` stores the name of the CPU as its text value, the
    // rest have their operands as children.
    Cpu,
    Org,
    End,
    Equ,
    Set,
    Db,
    Dw,

    /// An instruction whose mnemonic is the text value. Operands are children.
    Opcode,

    /// Register operands. The code is None if the register is not valid for
    /// the instruction.
    Register8(Option<u8>),
    Register16(Option<u8>),

    /// A compound expression.
    Expression(Expr),

    /// A reference to '$', with the value it had on this line.
    LocCounter(u16),

    /// Reference to a symbol used as an address or as data. The value is None
    /// while the symbol is unresolved.
    RefAddress(Option<u16>),
    RefData(Option<u16>),

    /// Literal values.
    Data8(u8),
    Data16(u16),

    /// Operand of RST. None if out of range.
    RstCode(Option<u8>),

    /// An operand whose value cannot be known when it's needed.
    UndefinedOperand,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeKind::Tree => write!(f, "Tree"),
            NodeKind::StatementLine { .. } => write!(f, "StatementLine"),
            NodeKind::Comment => write!(f, "Comment"),
            NodeKind::Label => write!(f, "Label"),
            NodeKind::Empty => write!(f, "Empty"),
            NodeKind::Cpu => write!(f, "CPU"),
            NodeKind::Org => write!(f, "ORG"),
            NodeKind::End => write!(f, "END"),
            NodeKind::Equ => write!(f, "EQU"),
            NodeKind::Set => write!(f, "SET"),
            NodeKind::Db => write!(f, "DB"),
            NodeKind::Dw => write!(f, "DW"),
            NodeKind::Opcode => write!(f, "Opcode"),
            NodeKind::Register8(_) => write!(f, "Register8"),
            NodeKind::Register16(_) => write!(f, "Register16"),
            NodeKind::Expression(_) => write!(f, "Expression"),
            NodeKind::LocCounter(_) => write!(f, "LocCounter"),
            NodeKind::RefAddress(_) => write!(f, "RefAddress"),
            NodeKind::RefData(_) => write!(f, "RefData"),
            NodeKind::Data8(_) => write!(f, "Data8"),
            NodeKind::Data16(_) => write!(f, "Data16"),
            NodeKind::RstCode(_) => write!(f, "RSTCode"),
            NodeKind::UndefinedOperand => write!(f, "UndefinedOperand"),
        }
    }
}

impl NodeKind {
    /// Returns true for operand nodes that were tagged as invalid.
    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            NodeKind::Register8(None)
                | NodeKind::Register16(None)
                | NodeKind::RstCode(None)
                | NodeKind::UndefinedOperand
        )
    }
}

/// A node of the tree. Children are linked through `first_child` and then
/// `next_sibling`. The parent is not stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub text_value: String,
    pub location: Location,
    pub first_child: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
}

/// Arena holding all the nodes of a parsed unit.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ASTree {
    nodes: Vec<Node>,
    // Last child of each node, so appending is cheap.
    tails: Vec<Option<NodeId>>,
    root: Option<NodeId>,
}

impl ASTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the root of the tree, which only exists once a statement line
    /// has been added.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Creates a new detached node and returns its identifier.
    pub fn add(&mut self, kind: NodeKind, text_value: &str, location: Location) -> NodeId {
        self.nodes.push(Node {
            kind,
            text_value: text_value.to_string(),
            location,
            first_child: None,
            next_sibling: None,
        });
        self.tails.push(None);
        self.nodes.len() - 1
    }

    /// Appends `child` as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        match self.tails[parent] {
            Some(last) => self.nodes[last].next_sibling = Some(child),
            None => self.nodes[parent].first_child = Some(child),
        }
        self.tails[parent] = Some(child);
    }

    /// Appends the given statement line to the root, creating the root if
    /// needed.
    pub fn add_line(&mut self, line: NodeId) {
        let root = match self.root {
            Some(root) => root,
            None => {
                let root = self.add(NodeKind::Tree, "", Location::null());
                self.root = Some(root);
                root
            }
        };
        self.append_child(root, line);
    }

    /// Iterates over the children of the given node.
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.nodes[id].first_child,
        }
    }

    /// Iterates over the statement lines of the tree.
    pub fn lines(&self) -> Children<'_> {
        Children {
            tree: self,
            next: self.root.and_then(|root| self.nodes[root].first_child),
        }
    }

    /// Returns the label of the given statement line, if any.
    pub fn label(&self, line: NodeId) -> Option<&Node> {
        self.children(line)
            .map(|id| self.node(id))
            .find(|n| n.kind == NodeKind::Label)
    }

    /// Returns the comment of the given statement line, if any.
    pub fn comment(&self, line: NodeId) -> Option<&Node> {
        self.children(line)
            .map(|id| self.node(id))
            .find(|n| n.kind == NodeKind::Comment)
    }

    /// Returns the statement of the given statement line.
    pub fn statement(&self, line: NodeId) -> Option<NodeId> {
        self.children(line)
            .find(|id| !matches!(self.node(*id).kind, NodeKind::Label | NodeKind::Comment))
    }

    /// Returns the text of the statement of the given line as it would be
    /// written in the source (e.g. "MOV A,B").
    pub fn statement_text(&self, line: NodeId) -> String {
        let Some(id) = self.statement(line) else {
            return String::new();
        };
        let node = self.node(id);

        let name = match node.kind {
            NodeKind::Empty => return String::new(),
            NodeKind::Opcode => node.text_value.clone(),
            _ => node.kind.to_string(),
        };
        let operands: Vec<&str> = if node.kind == NodeKind::Cpu {
            vec![node.text_value.as_str()]
        } else {
            self.children(id)
                .map(|c| self.node(c).text_value.as_str())
                .filter(|text| !text.is_empty())
                .collect()
        };

        if operands.is_empty() {
            name
        } else {
            format!("{} {}", name, operands.join(","))
        }
    }
}

/// Iterator over sibling nodes.
pub struct Children<'a> {
    tree: &'a ASTree,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.nodes[current].next_sibling;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::SymbolKind;

    fn line(tree: &mut ASTree, statement: NodeKind, text: &str) -> NodeId {
        let line = tree.add(
            NodeKind::StatementLine {
                segment: SegmentId::Code,
                address: 0,
                start: 0,
                size: 0,
            },
            "",
            Location::start(),
        );
        let st = tree.add(statement, text, Location::start());
        tree.append_child(line, st);
        tree.add_line(line);
        line
    }

    #[test]
    fn root_is_lazy() {
        let mut tree = ASTree::new();
        assert!(tree.root().is_none());
        assert_eq!(tree.lines().count(), 0);

        line(&mut tree, NodeKind::End, "END");
        assert!(tree.root().is_some());
        assert_eq!(tree.lines().count(), 1);
    }

    #[test]
    fn children_order() {
        let mut tree = ASTree::new();
        let ln = line(&mut tree, NodeKind::Opcode, "MOV");
        let op = tree.statement(ln).unwrap();

        let a = tree.add(NodeKind::Register8(Some(7)), "A", Location::start());
        let b = tree.add(NodeKind::Register8(Some(0)), "B", Location::start());
        tree.append_child(op, a);
        tree.append_child(op, b);

        let comment = tree.add(NodeKind::Comment, " copy", Location::start());
        tree.append_child(ln, comment);

        assert_eq!(tree.children(op).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(tree.statement_text(ln), "MOV A,B");
        assert_eq!(tree.comment(ln).unwrap().text_value, " copy");
        assert!(tree.label(ln).is_none());
    }

    #[test]
    fn statement_text_for_directives() {
        let mut tree = ASTree::new();

        let cpu = line(&mut tree, NodeKind::Cpu, "Intel8080");
        assert_eq!(tree.statement_text(cpu), "CPU Intel8080");

        let end = line(&mut tree, NodeKind::End, "END");
        assert_eq!(tree.statement_text(end), "END");

        let empty = line(&mut tree, NodeKind::Empty, "");
        assert_eq!(tree.statement_text(empty), "");
    }

    #[test]
    fn invalid_operands() {
        assert!(NodeKind::Register8(None).is_invalid());
        assert!(NodeKind::RstCode(None).is_invalid());
        assert!(!NodeKind::RstCode(Some(7)).is_invalid());
        assert!(!NodeKind::Data8(0).is_invalid());
    }

    #[test]
    fn expression_eval() {
        let mut symbols = SymbolMap::new();
        symbols.add("BASE", 0x100, SymbolKind::Equ).unwrap();

        let expr = Expr {
            terms: vec![
                (false, Term::Symbol(String::from("base"))),
                (false, Term::Number(2)),
                (true, Term::LocCounter),
                (false, Term::Char('A')),
            ],
        };
        assert_eq!(expr.eval(&symbols, 0x10), Ok(0x100 + 2 - 0x10 + 65));
        assert_eq!(expr.symbols().collect::<Vec<_>>(), vec!["base"]);

        let missing = Expr {
            terms: vec![(false, Term::Symbol(String::from("NOPE")))],
        };
        assert_eq!(missing.eval(&symbols, 0), Err(String::from("NOPE")));
        assert_eq!(missing.symbol(), Some("NOPE"));
    }

    #[test]
    fn expression_shapes() {
        let literal = Expr {
            terms: vec![(false, Term::Number(3))],
        };
        assert_eq!(literal.literal(), Some(3));

        let negative = Expr {
            terms: vec![(true, Term::Number(3))],
        };
        assert_eq!(negative.literal(), None);

        let here = Expr {
            terms: vec![(false, Term::LocCounter)],
        };
        assert!(here.is_loc_counter());
    }
}
