//! Target descriptions.
//!
//! A `TargetIsa` describes one architecture to the rest of the pipeline: its
//! register file, its calling convention registers, how IR types map to
//! register classes, and the final instruction encoder. One pipeline
//! instance drives exactly one target.

pub mod registers;
pub mod x86;

pub use self::registers::{RegBank, RegClass, RegClassData, RegFile, RegInfo};

use crate::binemit::CodeBlob;
use crate::buffer::Word;
use crate::ir::Code;
use crate::result::{CodegenError, CodegenResult};

/// Methods that describe a target to the register allocator, the lowering
/// passes and the emitter.
pub trait TargetIsa {
    /// Name of this ISA.
    fn name(&self) -> &'static str;

    /// Static register description.
    fn reg_info(&self) -> &'static RegInfo;

    /// A fresh register file over this target's registers.
    fn new_reg_file(&self) -> RegFile {
        RegFile::new(self.reg_info())
    }

    /// The register group holding values of the given bit width. Pointer
    /// and function values use the full word group.
    fn class_for_width(&self, bits: u32) -> Word;

    /// The register group for word-sized (pointer) values.
    fn word_class(&self) -> Word {
        self.class_for_width(64)
    }

    /// Argument registers of the native calling convention, in order.
    fn arg_regs(&self) -> &'static [Word];

    /// Return-value register of the native calling convention.
    fn ret_reg(&self) -> Word;

    /// Can `v` be encoded as an inline immediate operand?
    fn imm_fits(&self, v: Word) -> bool;

    /// Emit machine code for a post-allocation code object.
    fn emit(&self, code: &Code) -> CodegenResult<CodeBlob>;
}

/// Look up a target by name.
pub fn lookup(name: &str) -> CodegenResult<&'static dyn TargetIsa> {
    match name {
        "x86_64" => Ok(&x86::ISA),
        _ => Err(CodegenError::Unsupported(format!("target {}", name))),
    }
}

/// The ISA of the machine running this process.
pub fn host() -> CodegenResult<&'static dyn TargetIsa> {
    #[cfg(target_arch = "x86_64")]
    {
        Ok(&x86::ISA)
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        Err(CodegenError::Unsupported(
            "host architecture".to_string(),
        ))
    }
}
