//! Loads an x86/x86-64 ELF executable, disassembles its machine code and
//! incrementally reconstructs a control flow graph of functions, basic
//! blocks and instructions.
//!
//! The entry point is [`BinFile`]: open a target with [`BinFile::load`],
//! then grow the graph from the entry point ([`BinFile::disasm_entry`]),
//! from a single symbol ([`BinFile::disasm_from_symbol`]), or from every
//! function symbol at once ([`BinFile::disasm_all_function_symbols`]).
//! Functions, basic blocks and instructions are kept in address-keyed
//! stores reachable through [`BinFile::get_function`], [`BinFile::get_block`]
//! and [`BinFile::get_instruction`] and their existence/iteration
//! counterparts.

mod binfile;
mod block;
mod builder;
mod classify;
mod disasm;
pub mod error;
mod function;
mod instruction;
mod memory;
pub mod pretty;
mod store;
mod symbol;

/// A virtual memory address: the load-time address of a byte of code or
/// data. Used unmodified for both 32- and 64-bit targets and as the
/// primary key of every store in this crate.
pub type Vma = u64;

pub use binfile::BinFile;
pub use block::BasicBlock;
pub use classify::Classification;
pub use error::Error;
pub use function::Function;
pub use instruction::{InsnPart, Instruction, PartKind};
pub use symbol::Symbol;
