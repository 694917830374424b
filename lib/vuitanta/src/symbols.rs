use crate::errors::AssemblerException;
use std::collections::HashMap;

/// How a symbol got its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Address of a statement line.
    Label,

    /// Constant set with EQU.
    Equ,

    /// Variable set with SET. It's the only kind that can be re-assigned.
    Set,
}

/// An entry on the symbol map.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    /// The name as it was first written in the source.
    pub name: String,
    pub value: u16,
    pub kind: SymbolKind,
}

/// Case-insensitive table of symbols. Labels, EQU constants and SET variables
/// all share the same namespace.
#[derive(Debug, Default, Clone)]
pub struct SymbolMap {
    entries: HashMap<String, Symbol>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new symbol. Returns an error if a symbol with the same name
    /// (regardless of case) already exists.
    pub fn add(&mut self, name: &str, value: u16, kind: SymbolKind) -> Result<(), AssemblerException> {
        let key = name.to_uppercase();
        if self.entries.contains_key(&key) {
            return Err(AssemblerException::new(format!("Duplicate label: {}", name)));
        }

        self.entries.insert(
            key,
            Symbol {
                name: name.to_string(),
                value,
                kind,
            },
        );
        Ok(())
    }

    /// Assigns a value to a SET variable, creating it if needed. Returns an
    /// error if the name is taken by a symbol of any other kind.
    pub fn assign(&mut self, name: &str, value: u16) -> Result<(), AssemblerException> {
        match self.entries.get_mut(&name.to_uppercase()) {
            Some(symbol) if symbol.kind == SymbolKind::Set => {
                symbol.value = value;
                Ok(())
            }
            Some(_) => Err(AssemblerException::new(format!("Duplicate label: {}", name))),
            None => self.add(name, value, SymbolKind::Set),
        }
    }

    /// Returns the value of the given symbol, or an error if it does not exist.
    pub fn lookup(&self, name: &str) -> Result<u16, AssemblerException> {
        match self.entries.get(&name.to_uppercase()) {
            Some(symbol) => Ok(symbol.value),
            None => Err(AssemblerException::new(format!("Undefined label: {}", name))),
        }
    }

    /// Returns true if the given symbol exists.
    pub fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_uppercase())
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.entries.get(&name.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns all symbols sorted by name.
    pub fn sorted(&self) -> Vec<&Symbol> {
        let mut all: Vec<&Symbol> = self.entries.values().collect();
        all.sort_by(|a, b| a.name.to_uppercase().cmp(&b.name.to_uppercase()));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_lookup_ignore_case() {
        let mut map = SymbolMap::new();

        map.add("Start", 0x100, SymbolKind::Label).unwrap();
        assert!(map.exists("START"));
        assert!(map.exists("start"));
        assert_eq!(map.lookup("sTaRt").unwrap(), 0x100);

        // The original spelling is kept.
        assert_eq!(map.get("START").unwrap().name, "Start");
    }

    #[test]
    fn duplicate_add() {
        let mut map = SymbolMap::new();

        map.add("LOOP", 1, SymbolKind::Label).unwrap();
        let err = map.add("loop", 2, SymbolKind::Label).unwrap_err();
        assert_eq!(err.message, "Duplicate label: loop");
        assert_eq!(map.lookup("LOOP").unwrap(), 1);
    }

    #[test]
    fn lookup_missing() {
        let map = SymbolMap::new();

        assert!(!map.exists("X"));
        assert_eq!(map.lookup("X").unwrap_err().message, "Undefined label: X");
    }

    #[test]
    fn assign_set_variables() {
        let mut map = SymbolMap::new();

        map.assign("COUNT", 1).unwrap();
        map.assign("count", 2).unwrap();
        assert_eq!(map.lookup("COUNT").unwrap(), 2);

        map.add("CONST", 3, SymbolKind::Equ).unwrap();
        assert!(map.assign("CONST", 4).is_err());
        assert_eq!(map.lookup("CONST").unwrap(), 3);
    }

    #[test]
    fn sorted_by_name() {
        let mut map = SymbolMap::new();

        map.add("b", 2, SymbolKind::Label).unwrap();
        map.add("A", 1, SymbolKind::Label).unwrap();
        map.add("C", 3, SymbolKind::Equ).unwrap();

        let names: Vec<&str> = map.sorted().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["A", "b", "C"]);
        assert_eq!(map.len(), 3);
    }
}
