//! Cross-references HotSpot compilation logs with `javap` listings and explains, per
//! bytecode offset, what the JIT optimizer did.

pub mod annotations;
pub mod bytecode;
pub mod compilations;
pub mod dictionary;
pub mod disassembly;
pub mod engine;
pub mod error;
pub mod ir;
pub mod member;
pub mod opcodes;
pub mod signature;
pub mod tag;
pub mod tag_processor;
