use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// The shape of the operands taken by an instruction. All instructions on the
/// same family are encoded the same way and have the same size.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Family {
    /// No operands (e.g. "NOP").
    Implied,

    /// Two 8-bit registers (e.g. "MOV A,B").
    Register8Register8,

    /// 8-bit register and 8-bit immediate (e.g. "MVI A,12h").
    Register8Data8,

    /// Register pair and 16-bit immediate (e.g. "LXI H,1234h").
    Register16Data16,

    /// A single 8-bit register (e.g. "INR A", "ADD B").
    Register8,

    /// A single register pair (e.g. "PUSH PSW").
    Register16,

    /// 16-bit address (e.g. "JMP START").
    Address,

    /// 8-bit immediate (e.g. "ADI 1", "OUT 10h").
    Data8,

    /// Restart code in the [0, 7] range.
    Rst,
}

impl Family {
    /// Size in bytes of the encoded instruction.
    pub fn size(&self) -> usize {
        match self {
            Family::Implied
            | Family::Register8Register8
            | Family::Register8
            | Family::Register16
            | Family::Rst => 1,
            Family::Register8Data8 | Family::Data8 => 2,
            Family::Register16Data16 | Family::Address => 3,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Family::Implied => write!(f, "no operands"),
            Family::Register8Register8 => write!(f, "two registers"),
            Family::Register8Data8 => write!(f, "register and 8-bit value"),
            Family::Register16Data16 => write!(f, "register pair and 16-bit value"),
            Family::Register8 => write!(f, "register"),
            Family::Register16 => write!(f, "register pair"),
            Family::Address => write!(f, "address"),
            Family::Data8 => write!(f, "8-bit value"),
            Family::Rst => write!(f, "restart code"),
        }
    }
}

/// The names of 8-bit registers, indexed by their code.
pub const REGISTERS: [&str; 8] = ["B", "C", "D", "E", "H", "L", "M", "A"];

/// Register pairs accepted by most 16-bit instructions, indexed by their code.
pub const PAIRS_SP: &[&str] = &["B", "D", "H", "SP"];

/// Register pairs accepted by PUSH and POP.
pub const PAIRS_PSW: &[&str] = &["B", "D", "H", "PSW"];

/// Register pairs accepted by LDAX and STAX.
pub const PAIRS_BD: &[&str] = &["B", "D"];

#[derive(Debug)]
pub struct Entry {
    /// Base opcode. Register codes are OR'ed into it.
    pub opcode: u8,

    pub family: Family,

    /// Bit position of the register code for single register families.
    pub shift: u8,

    /// Register pairs allowed for this instruction, indexed by their code.
    pub pairs: &'static [&'static str],
}

impl Entry {
    fn new(opcode: u8, family: Family) -> Self {
        Self {
            opcode,
            family,
            shift: 0,
            pairs: &[],
        }
    }

    fn register(opcode: u8, shift: u8) -> Self {
        Self {
            opcode,
            family: Family::Register8,
            shift,
            pairs: &[],
        }
    }

    fn pair(opcode: u8, family: Family, pairs: &'static [&'static str]) -> Self {
        Self {
            opcode,
            family,
            shift: 4,
            pairs,
        }
    }
}

/// Returns the code for the given 8-bit register name, ignoring case.
pub fn register_code(name: &str) -> Option<u8> {
    REGISTERS
        .iter()
        .position(|r| r.eq_ignore_ascii_case(name))
        .map(|p| p as u8)
}

/// Returns the code for the given register pair if it's in `pairs`.
pub fn pair_code(pairs: &[&str], name: &str) -> Option<u8> {
    pairs
        .iter()
        .position(|r| r.eq_ignore_ascii_case(name))
        .map(|p| p as u8)
}

/// Instructions known by the Intel 8080, indexed by their (uppercase)
/// mnemonic.
pub static INTEL8080: LazyLock<HashMap<&'static str, Entry>> = LazyLock::new(|| {
    let mut instrs = HashMap::new();

    instrs.insert("MOV", Entry::new(0x40, Family::Register8Register8));
    instrs.insert("MVI", Entry::new(0x06, Family::Register8Data8));
    instrs.insert("LXI", Entry::pair(0x01, Family::Register16Data16, PAIRS_SP));

    // Single register, encoded on bits 3-5.
    instrs.insert("INR", Entry::register(0x04, 3));
    instrs.insert("DCR", Entry::register(0x05, 3));

    // Accumulator operations with a register, encoded on bits 0-2.
    for (mnemonic, opcode) in [
        ("ADD", 0x80),
        ("ADC", 0x88),
        ("SUB", 0x90),
        ("SBB", 0x98),
        ("ANA", 0xA0),
        ("XRA", 0xA8),
        ("ORA", 0xB0),
        ("CMP", 0xB8),
    ] {
        instrs.insert(mnemonic, Entry::register(opcode, 0));
    }

    // Register pairs.
    instrs.insert("PUSH", Entry::pair(0xC5, Family::Register16, PAIRS_PSW));
    instrs.insert("POP", Entry::pair(0xC1, Family::Register16, PAIRS_PSW));
    instrs.insert("DAD", Entry::pair(0x09, Family::Register16, PAIRS_SP));
    instrs.insert("INX", Entry::pair(0x03, Family::Register16, PAIRS_SP));
    instrs.insert("DCX", Entry::pair(0x0B, Family::Register16, PAIRS_SP));
    instrs.insert("LDAX", Entry::pair(0x0A, Family::Register16, PAIRS_BD));
    instrs.insert("STAX", Entry::pair(0x02, Family::Register16, PAIRS_BD));

    // Jumps, calls and direct memory access.
    for (mnemonic, opcode) in [
        ("JMP", 0xC3),
        ("JNZ", 0xC2),
        ("JZ", 0xCA),
        ("JNC", 0xD2),
        ("JC", 0xDA),
        ("JPO", 0xE2),
        ("JPE", 0xEA),
        ("JP", 0xF2),
        ("JM", 0xFA),
        ("CALL", 0xCD),
        ("CNZ", 0xC4),
        ("CZ", 0xCC),
        ("CNC", 0xD4),
        ("CC", 0xDC),
        ("CPO", 0xE4),
        ("CPE", 0xEC),
        ("CP", 0xF4),
        ("CM", 0xFC),
        ("STA", 0x32),
        ("LDA", 0x3A),
        ("SHLD", 0x22),
        ("LHLD", 0x2A),
    ] {
        instrs.insert(mnemonic, Entry::new(opcode, Family::Address));
    }

    // Immediate operations and I/O ports.
    for (mnemonic, opcode) in [
        ("ADI", 0xC6),
        ("ACI", 0xCE),
        ("SUI", 0xD6),
        ("SBI", 0xDE),
        ("ANI", 0xE6),
        ("XRI", 0xEE),
        ("ORI", 0xF6),
        ("CPI", 0xFE),
        ("IN", 0xDB),
        ("OUT", 0xD3),
    ] {
        instrs.insert(mnemonic, Entry::new(opcode, Family::Data8));
    }

    instrs.insert("RST", Entry::new(0xC7, Family::Rst));

    for (mnemonic, opcode) in [
        ("NOP", 0x00),
        ("HLT", 0x76),
        ("RLC", 0x07),
        ("RRC", 0x0F),
        ("RAL", 0x17),
        ("RAR", 0x1F),
        ("DAA", 0x27),
        ("CMA", 0x2F),
        ("STC", 0x37),
        ("CMC", 0x3F),
        ("RET", 0xC9),
        ("RNZ", 0xC0),
        ("RZ", 0xC8),
        ("RNC", 0xD0),
        ("RC", 0xD8),
        ("RPO", 0xE0),
        ("RPE", 0xE8),
        ("RP", 0xF0),
        ("RM", 0xF8),
        ("PCHL", 0xE9),
        ("SPHL", 0xF9),
        ("XCHG", 0xEB),
        ("XTHL", 0xE3),
        ("DI", 0xF3),
        ("EI", 0xFB),
    ] {
        instrs.insert(mnemonic, Entry::new(opcode, Family::Implied));
    }

    instrs
});

/// Instructions that only the Intel 8085 has on top of the 8080 ones.
pub static INTEL8085: LazyLock<HashMap<&'static str, Entry>> = LazyLock::new(|| {
    HashMap::from([
        ("RIM", Entry::new(0x20, Family::Implied)),
        ("SIM", Entry::new(0x30, Family::Implied)),
    ])
});

/// An entry on the reverse table: what an opcode byte stands for.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeEntry {
    pub mnemonic: &'static str,

    /// Register operands already resolved from the opcode (e.g. "A,B").
    pub registers: String,

    /// Family of the instruction, which determines how many bytes follow.
    pub family: Family,
}

/// Fills the reverse table for the given instructions.
fn reverse(table: &HashMap<&'static str, Entry>, res: &mut HashMap<u8, DecodeEntry>) {
    for (&mnemonic, entry) in table.iter() {
        let mut add = |opcode: u8, registers: String| {
            res.insert(
                opcode,
                DecodeEntry {
                    mnemonic,
                    registers,
                    family: entry.family,
                },
            );
        };

        match entry.family {
            Family::Implied | Family::Address | Family::Data8 => add(entry.opcode, String::new()),
            Family::Register8Register8 => {
                for (dst, d) in REGISTERS.iter().enumerate() {
                    for (src, s) in REGISTERS.iter().enumerate() {
                        // MOV M,M is HLT.
                        if dst != 6 || src != 6 {
                            add(entry.opcode | (dst << 3 | src) as u8, format!("{},{}", d, s));
                        }
                    }
                }
            }
            Family::Register8Data8 => {
                for (code, r) in REGISTERS.iter().enumerate() {
                    add(entry.opcode | (code << 3) as u8, r.to_string());
                }
            }
            Family::Register8 => {
                for (code, r) in REGISTERS.iter().enumerate() {
                    add(entry.opcode | (code << entry.shift) as u8, r.to_string());
                }
            }
            Family::Register16 | Family::Register16Data16 => {
                for (code, r) in entry.pairs.iter().enumerate() {
                    add(entry.opcode | (code << 4) as u8, r.to_string());
                }
            }
            Family::Rst => {
                for code in 0..8u8 {
                    add(entry.opcode | (code << 3), code.to_string());
                }
            }
        }
    }
}

/// Reverse table for the Intel 8080.
pub static DECODE8080: LazyLock<HashMap<u8, DecodeEntry>> = LazyLock::new(|| {
    let mut res = HashMap::new();
    reverse(&INTEL8080, &mut res);
    res
});

/// Reverse table for the Intel 8085.
pub static DECODE8085: LazyLock<HashMap<u8, DecodeEntry>> = LazyLock::new(|| {
    let mut res = HashMap::new();
    reverse(&INTEL8080, &mut res);
    reverse(&INTEL8085, &mut res);
    res
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_codes() {
        assert_eq!(register_code("B"), Some(0));
        assert_eq!(register_code("m"), Some(6));
        assert_eq!(register_code("A"), Some(7));
        assert_eq!(register_code("X"), None);

        assert_eq!(pair_code(PAIRS_SP, "sp"), Some(3));
        assert_eq!(pair_code(PAIRS_PSW, "PSW"), Some(3));
        assert_eq!(pair_code(PAIRS_BD, "H"), None);
    }

    #[test]
    fn no_overlapping_opcodes() {
        // All byte values but the twelve undocumented ones are taken by the
        // 8080 exactly once.
        let decoded = DECODE8080.len();
        assert_eq!(decoded, 256 - 12);

        // And the 8085 takes two of them.
        assert_eq!(DECODE8085.len(), decoded + 2);
    }

    #[test]
    fn decode_entries() {
        let mov = DECODE8080.get(&0x78).unwrap();
        assert_eq!(mov.mnemonic, "MOV");
        assert_eq!(mov.registers, "A,B");

        assert_eq!(DECODE8080.get(&0x76).unwrap().mnemonic, "HLT");
        assert_eq!(DECODE8080.get(&0xF5).unwrap().registers, "PSW");
        assert_eq!(DECODE8080.get(&0xFF).unwrap().registers, "7");
        assert!(DECODE8080.get(&0x20).is_none());
        assert_eq!(DECODE8085.get(&0x20).unwrap().mnemonic, "RIM");
    }

    #[test]
    fn family_sizes() {
        assert_eq!(INTEL8080.get("NOP").unwrap().family.size(), 1);
        assert_eq!(INTEL8080.get("MVI").unwrap().family.size(), 2);
        assert_eq!(INTEL8080.get("LXI").unwrap().family.size(), 3);
        assert_eq!(INTEL8080.get("CALL").unwrap().family.size(), 3);
    }
}
