//! x86-64 target support.

pub mod asm;
pub mod emit;
pub mod enc;
pub mod registers;

use crate::binemit::CodeBlob;
use crate::buffer::Word;
use crate::ir::Code;
use crate::isa::{RegInfo, TargetIsa};
use crate::result::CodegenResult;

/// The x86-64 target.
pub struct X64;

/// The one x86-64 ISA instance.
pub static ISA: X64 = X64;

impl TargetIsa for X64 {
    fn name(&self) -> &'static str {
        "x86_64"
    }

    fn reg_info(&self) -> &'static RegInfo {
        &registers::INFO
    }

    fn class_for_width(&self, bits: u32) -> Word {
        if bits <= 32 {
            registers::GROUP_DWORD
        } else {
            registers::GROUP_QWORD
        }
    }

    fn arg_regs(&self) -> &'static [Word] {
        // System V AMD64 integer argument order.
        &[
            registers::RU_RDI,
            registers::RU_RSI,
            registers::RU_RDX,
            registers::RU_RCX,
            registers::RU_R8,
            registers::RU_R9,
        ]
    }

    fn ret_reg(&self) -> Word {
        registers::RU_RAX
    }

    fn imm_fits(&self, v: Word) -> bool {
        i32::try_from(v).is_ok()
    }

    fn emit(&self, code: &Code) -> CodegenResult<CodeBlob> {
        emit::emit_function(code)
    }
}
