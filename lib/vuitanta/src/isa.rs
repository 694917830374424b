use crate::opcodes::{
    pair_code, register_code, DecodeEntry, Entry, Family, DECODE8080, DECODE8085, INTEL8080,
    INTEL8085,
};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The CPUs supported by this assembler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cpu {
    #[default]
    Intel8080,
    Intel8085,
}

impl Cpu {
    /// Returns the canonical name as accepted by the CPU directive.
    pub fn name(&self) -> &'static str {
        match self {
            Cpu::Intel8080 => "Intel8080",
            Cpu::Intel8085 => "Intel8085",
        }
    }
}

impl FromStr for Cpu {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "intel8080" | "i8080" | "8080" => Ok(Cpu::Intel8080),
            "intel8085" | "i8085" | "8085" => Ok(Cpu::Intel8085),
            _ => Err(format!("Unknown CPU: {}", s)),
        }
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The kind of an operand as expected by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Register8,
    Register16,
    Data8,
    Data16,
    Address,
    RstCode,
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OperandKind::Register8 => write!(f, "Register"),
            OperandKind::Register16 => write!(f, "Register pair"),
            OperandKind::Data8 | OperandKind::Data16 => write!(f, "Value"),
            OperandKind::Address => write!(f, "Address"),
            OperandKind::RstCode => write!(f, "RST code"),
        }
    }
}

/// What the parser needs to know about an instruction before parsing its
/// operands.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionInfo {
    pub mnemonic: String,
    pub family: Family,
    pub operands: &'static [OperandKind],
    pub size: usize,
}

impl InstructionInfo {
    fn new(mnemonic: &str, entry: &Entry) -> Self {
        let operands: &'static [OperandKind] = match entry.family {
            Family::Implied => &[],
            Family::Register8Register8 => &[OperandKind::Register8, OperandKind::Register8],
            Family::Register8Data8 => &[OperandKind::Register8, OperandKind::Data8],
            Family::Register16Data16 => &[OperandKind::Register16, OperandKind::Data16],
            Family::Register8 => &[OperandKind::Register8],
            Family::Register16 => &[OperandKind::Register16],
            Family::Address => &[OperandKind::Address],
            Family::Data8 => &[OperandKind::Data8],
            Family::Rst => &[OperandKind::RstCode],
        };

        Self {
            mnemonic: mnemonic.to_string(),
            family: entry.family,
            operands,
            size: entry.family.size(),
        }
    }
}

/// Result of looking up a mnemonic.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// The mnemonic is available on this CPU.
    Supported(InstructionInfo),

    /// The mnemonic exists, but only on the given CPU.
    OtherCpu(Cpu),

    /// Nobody knows this mnemonic.
    Unknown,
}

/// An operand as handed over to the encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Register(String),
    Value(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncodingErrorKind {
    InvalidDestination(String),
    InvalidSource(String),
    InvalidRegister(String),
    InvalidPair {
        name: String,
        expected: &'static [&'static str],
    },
    IncorrectOpcode(String),
    InvalidRstCode(i64),
    OutOfRange {
        bits: u8,
        value: i64,
    },
    Mismatch(Family),
    UnknownMnemonic(String),
}

/// Error returned by the encoder. `operand` is the index of the offending
/// operand, if it can be blamed on a single one.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingError {
    pub kind: EncodingErrorKind,
    pub operand: Option<usize>,
}

impl EncodingError {
    fn at(kind: EncodingErrorKind, operand: usize) -> Self {
        Self {
            kind,
            operand: Some(operand),
        }
    }
}

impl std::error::Error for EncodingError {}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            EncodingErrorKind::InvalidDestination(r) => {
                write!(f, "Invalid destination register: {}", r)
            }
            EncodingErrorKind::InvalidSource(r) => write!(f, "Invalid source register: {}", r),
            EncodingErrorKind::InvalidRegister(r) => write!(f, "Invalid register: {}", r),
            EncodingErrorKind::InvalidPair { name, expected } => write!(
                f,
                "Invalid register pair: {}, expected one of {}",
                name,
                expected.join(", ")
            ),
            EncodingErrorKind::IncorrectOpcode(text) => write!(f, "Incorrect opcode: {}", text),
            EncodingErrorKind::InvalidRstCode(n) => write!(f, "Invalid RST code: {}", n),
            EncodingErrorKind::OutOfRange { bits, value } => {
                write!(f, "Value out of range for {} bit value: {}", bits, value)
            }
            EncodingErrorKind::Mismatch(family) => write!(f, "Expected {}", family),
            EncodingErrorKind::UnknownMnemonic(m) => write!(f, "Unknown mnemonic: {}", m),
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub mnemonic: &'static str,

    /// Full text of the instruction (e.g. "MVI A,0FFh").
    pub text: String,

    /// Amount of bytes taken by the instruction.
    pub size: usize,
}

/// An instruction set plugin. The parser only knows about CPUs through this
/// trait.
pub trait InstructionSet {
    /// The CPU implemented by this instruction set.
    fn cpu(&self) -> Cpu;

    /// Returns the information for the given mnemonic, ignoring case.
    fn lookup(&self, mnemonic: &str) -> Lookup;

    /// Encodes the given instruction.
    fn encode(&self, mnemonic: &str, operands: &[Operand]) -> Result<Vec<u8>, EncodingError>;

    /// Decodes the instruction at the beginning of `bytes`. Returns None if the
    /// opcode is not known or if there are not enough bytes for it.
    fn decode(&self, bytes: &[u8]) -> Option<Decoded>;
}

/// Returns the instruction set for the given CPU.
pub fn instruction_set(cpu: Cpu) -> Box<dyn InstructionSet> {
    match cpu {
        Cpu::Intel8080 => Box::new(Intel8080),
        Cpu::Intel8085 => Box::new(Intel8085),
    }
}

/// The Intel 8080 instruction set.
#[derive(Debug, Default, Clone, Copy)]
pub struct Intel8080;

impl InstructionSet for Intel8080 {
    fn cpu(&self) -> Cpu {
        Cpu::Intel8080
    }

    fn lookup(&self, mnemonic: &str) -> Lookup {
        let upper = mnemonic.to_uppercase();

        match INTEL8080.get(upper.as_str()) {
            Some(entry) => Lookup::Supported(InstructionInfo::new(&upper, entry)),
            None if INTEL8085.contains_key(upper.as_str()) => Lookup::OtherCpu(Cpu::Intel8085),
            None => Lookup::Unknown,
        }
    }

    fn encode(&self, mnemonic: &str, operands: &[Operand]) -> Result<Vec<u8>, EncodingError> {
        let upper = mnemonic.to_uppercase();

        match INTEL8080.get(upper.as_str()) {
            Some(entry) => encode_entry(&upper, entry, operands),
            None => Err(EncodingError {
                kind: EncodingErrorKind::UnknownMnemonic(mnemonic.to_string()),
                operand: None,
            }),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Option<Decoded> {
        decode_with(&DECODE8080, bytes)
    }
}

/// The Intel 8085 instruction set: the 8080 one plus RIM and SIM.
#[derive(Debug, Default, Clone, Copy)]
pub struct Intel8085;

impl Intel8085 {
    fn entry(&self, mnemonic: &str) -> Option<&'static Entry> {
        INTEL8085.get(mnemonic).or_else(|| INTEL8080.get(mnemonic))
    }
}

impl InstructionSet for Intel8085 {
    fn cpu(&self) -> Cpu {
        Cpu::Intel8085
    }

    fn lookup(&self, mnemonic: &str) -> Lookup {
        let upper = mnemonic.to_uppercase();

        match self.entry(&upper) {
            Some(entry) => Lookup::Supported(InstructionInfo::new(&upper, entry)),
            None => Lookup::Unknown,
        }
    }

    fn encode(&self, mnemonic: &str, operands: &[Operand]) -> Result<Vec<u8>, EncodingError> {
        let upper = mnemonic.to_uppercase();

        match self.entry(&upper) {
            Some(entry) => encode_entry(&upper, entry, operands),
            None => Err(EncodingError {
                kind: EncodingErrorKind::UnknownMnemonic(mnemonic.to_string()),
                operand: None,
            }),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Option<Decoded> {
        decode_with(&DECODE8085, bytes)
    }
}

// Returns the register code for the operand at `idx`, or the error built by
// `err` if it's not a valid register.
fn register(
    operands: &[Operand],
    idx: usize,
    family: Family,
    err: impl Fn(String) -> EncodingErrorKind,
) -> Result<u8, EncodingError> {
    match operands.get(idx) {
        Some(Operand::Register(name)) => match register_code(name) {
            Some(code) => Ok(code),
            None => Err(EncodingError::at(err(name.to_uppercase()), idx)),
        },
        _ => Err(EncodingError::at(EncodingErrorKind::Mismatch(family), idx)),
    }
}

fn pair(operands: &[Operand], idx: usize, entry: &Entry) -> Result<u8, EncodingError> {
    match operands.get(idx) {
        Some(Operand::Register(name)) => match pair_code(entry.pairs, name) {
            Some(code) => Ok(code),
            None => Err(EncodingError::at(
                EncodingErrorKind::InvalidPair {
                    name: name.to_uppercase(),
                    expected: entry.pairs,
                },
                idx,
            )),
        },
        _ => Err(EncodingError::at(EncodingErrorKind::Mismatch(entry.family), idx)),
    }
}

fn value(operands: &[Operand], idx: usize, family: Family, bits: u8) -> Result<i64, EncodingError> {
    match operands.get(idx) {
        Some(Operand::Value(v)) => {
            if *v < 0 || *v >= (1 << bits) {
                Err(EncodingError::at(
                    EncodingErrorKind::OutOfRange { bits, value: *v },
                    idx,
                ))
            } else {
                Ok(*v)
            }
        }
        _ => Err(EncodingError::at(EncodingErrorKind::Mismatch(family), idx)),
    }
}

// Encodes the instruction described by `entry` with the given operands.
fn encode_entry(mnemonic: &str, entry: &Entry, operands: &[Operand]) -> Result<Vec<u8>, EncodingError> {
    let expected = InstructionInfo::new(mnemonic, entry).operands.len();
    if operands.len() != expected {
        return Err(EncodingError {
            kind: EncodingErrorKind::Mismatch(entry.family),
            operand: None,
        });
    }

    let family = entry.family;
    let bytes = match family {
        Family::Implied => vec![entry.opcode],
        Family::Register8Register8 => {
            let dst = register(operands, 0, family, EncodingErrorKind::InvalidDestination)?;
            let src = register(operands, 1, family, EncodingErrorKind::InvalidSource)?;

            // MOV M,M would take the place of HLT.
            if dst == 6 && src == 6 {
                return Err(EncodingError {
                    kind: EncodingErrorKind::IncorrectOpcode(format!("{} M,M", mnemonic)),
                    operand: None,
                });
            }
            vec![entry.opcode | dst << 3 | src]
        }
        Family::Register8Data8 => {
            let reg = register(operands, 0, family, EncodingErrorKind::InvalidRegister)?;
            let v = value(operands, 1, family, 8)?;
            vec![entry.opcode | reg << 3, v as u8]
        }
        Family::Register16Data16 => {
            let rp = pair(operands, 0, entry)?;
            let v = value(operands, 1, family, 16)? as u16;
            let [lo, hi] = v.to_le_bytes();
            vec![entry.opcode | rp << 4, lo, hi]
        }
        Family::Register8 => {
            let reg = register(operands, 0, family, EncodingErrorKind::InvalidRegister)?;
            vec![entry.opcode | reg << entry.shift]
        }
        Family::Register16 => {
            let rp = pair(operands, 0, entry)?;
            vec![entry.opcode | rp << 4]
        }
        Family::Address => {
            let v = value(operands, 0, family, 16)? as u16;
            let [lo, hi] = v.to_le_bytes();
            vec![entry.opcode, lo, hi]
        }
        Family::Data8 => {
            let v = value(operands, 0, family, 8)?;
            vec![entry.opcode, v as u8]
        }
        Family::Rst => match operands.first() {
            Some(Operand::Value(n)) if (0..=7).contains(n) => vec![entry.opcode | (*n as u8) << 3],
            Some(Operand::Value(n)) => {
                return Err(EncodingError::at(EncodingErrorKind::InvalidRstCode(*n), 0))
            }
            _ => return Err(EncodingError::at(EncodingErrorKind::Mismatch(family), 0)),
        },
    };

    Ok(bytes)
}

/// Returns the given value as a hexadecimal literal with the 'h' suffix (e.g.
/// "0FFh"), with a leading zero if it would start with a letter.
pub fn hex_literal(value: u16, digits: usize) -> String {
    let res = format!("{:0digits$X}h", value, digits = digits);
    if res.starts_with(|c: char| c.is_ascii_alphabetic()) {
        format!("0{}", res)
    } else {
        res
    }
}

fn decode_with(table: &HashMap<u8, DecodeEntry>, bytes: &[u8]) -> Option<Decoded> {
    let entry = table.get(bytes.first()?)?;
    let size = entry.family.size();
    if bytes.len() < size {
        return None;
    }

    let immediate = match size {
        2 => Some(hex_literal(bytes[1] as u16, 2)),
        3 => Some(hex_literal(u16::from_le_bytes([bytes[1], bytes[2]]), 4)),
        _ => None,
    };
    let operands: Vec<String> = [Some(entry.registers.clone()), immediate]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect();

    let text = if operands.is_empty() {
        entry.mnemonic.to_string()
    } else {
        format!("{} {}", entry.mnemonic, operands.join(","))
    };

    Some(Decoded {
        mnemonic: entry.mnemonic,
        text,
        size,
    })
}
