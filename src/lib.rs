//! A baseline (non-optimising) code generator: lowers a typed, SSA-form
//! intermediate representation to a linkable ELF object file.
//!
//! The engine itself never looks at an instruction opcode directly — it asks
//! an [`adaptor::IrAdaptor`] for the shape of the IR and a
//! [`backend::TargetBackend`] for how to turn one instruction into bytes.
//! Everything else (block layout, liveness, register allocation, the
//! calling-convention ABI, and the ELF object itself) lives in this crate.
#![allow(clippy::too_many_arguments)]

pub mod adaptor;
pub mod analyser;
pub mod backend;
pub mod cc;
pub mod compiler;
pub mod config;
pub mod elf;
pub mod error;
pub mod regfile;
pub mod value;

pub use adaptor::IrAdaptor;
pub use compiler::Compiler;
pub use config::{Options, TargetConfig};
pub use error::CompileError;
