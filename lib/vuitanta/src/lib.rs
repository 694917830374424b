pub mod assembler;
pub mod ast;
pub mod config;
pub mod errors;
pub mod isa;
pub mod listing;
pub mod location;
pub mod object;
pub mod objfile;
pub mod opcodes;
pub mod parser;
pub mod scanner;
pub mod symbols;
