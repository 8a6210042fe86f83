//! Gantry code generation library.
//!
//! A caller assembles a program in a typed, architecture-neutral intermediate
//! representation, and this crate lowers it through a pipeline of
//! transformations to x86-64 machine code: simplification, control-flow
//! structurization, calling-convention legalization, register-class lowering,
//! register allocation and binary emission. The executable-memory wrapper and
//! the callable handle live in the companion `gantry-jit` crate; the textual
//! IR parser lives in `gantry-reader`.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use crate::context::Context;
pub use crate::simplify::simplify;
pub use crate::structurize::{structurize, unstructurize};
pub use crate::write::write_code;

pub mod binemit;
pub mod interpret;
pub mod ir;
pub mod isa;
pub mod regalloc;
pub mod write;

mod abi;
mod buffer;
mod context;
mod lower;
mod remap;
mod result;
mod simplify;
mod structurize;

pub use crate::buffer::{Pos, Word, WordBuf};
pub use crate::remap::Remap;
pub use crate::result::{CodegenError, CodegenResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
