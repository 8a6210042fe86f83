//! x86-64 register descriptions.
//!
//! Units are numbered from 1 so that 0 can mean "no register"; the hardware
//! encoding of a unit is `unit - 1`. `rsp` and `rbp` are reserved for the
//! frame, and `r11` is reserved as the encoder's scratch register.

use crate::buffer::Word;
use crate::isa::registers::{RegBank, RegClassData, RegInfo};

/// `rax`, unit 1.
pub const RU_RAX: Word = 1;
/// `rcx`, unit 2.
pub const RU_RCX: Word = 2;
/// `rdx`, unit 3.
pub const RU_RDX: Word = 3;
/// `rbx`, unit 4.
pub const RU_RBX: Word = 4;
/// `rsp`, unit 5 (reserved).
pub const RU_RSP: Word = 5;
/// `rbp`, unit 6 (reserved).
pub const RU_RBP: Word = 6;
/// `rsi`, unit 7.
pub const RU_RSI: Word = 7;
/// `rdi`, unit 8.
pub const RU_RDI: Word = 8;
/// `r8`, unit 9.
pub const RU_R8: Word = 9;
/// `r9`, unit 10.
pub const RU_R9: Word = 10;
/// `r10`, unit 11.
pub const RU_R10: Word = 11;
/// `r11`, unit 12 (reserved scratch).
pub const RU_R11: Word = 12;
/// `r12`, unit 13.
pub const RU_R12: Word = 13;
/// `r13`, unit 14.
pub const RU_R13: Word = 14;
/// `r14`, unit 15.
pub const RU_R14: Word = 15;
/// `r15`, unit 16.
pub const RU_R15: Word = 16;

/// Identifier of the 64-bit general-purpose register group.
pub const GROUP_QWORD: Word = -1;
/// Identifier of the 32-bit general-purpose register group.
pub const GROUP_DWORD: Word = -2;

const fn unit_bit(unit: Word) -> u32 {
    1 << unit
}

const GPR_MASK: u32 = {
    let mut mask = 0;
    let mut unit = RU_RAX;
    while unit <= RU_R15 {
        mask |= unit_bit(unit);
        unit += 1;
    }
    mask
};

/// 64-bit general purpose registers.
pub static GPR_Q: RegClassData = RegClassData {
    name: "q",
    ident: GROUP_QWORD,
    width: 8,
    mask: GPR_MASK,
};

/// The same registers viewed at dword width.
pub static GPR_D: RegClassData = RegClassData {
    name: "d",
    ident: GROUP_DWORD,
    width: 4,
    mask: GPR_MASK,
};

static GPR_BANK: RegBank = RegBank {
    name: "gpr",
    first_unit: RU_RAX,
    units: 16,
    names: &[
        "%rax", "%rcx", "%rdx", "%rbx", "%rsp", "%rbp", "%rsi", "%rdi", "%r8", "%r9", "%r10",
        "%r11", "%r12", "%r13", "%r14", "%r15",
    ],
};

/// Static register description for x86-64.
pub static INFO: RegInfo = RegInfo {
    banks: &[GPR_BANK],
    classes: &[GPR_Q, GPR_D],
    reserved: unit_bit(RU_RSP) | unit_bit(RU_RBP) | unit_bit(RU_R11),
};

/// Hardware encoding of a unit, for ModR/M and REX fields.
pub fn hw_enc(unit: Word) -> u8 {
    debug_assert!((RU_RAX..=RU_R15).contains(&unit), "bad unit {}", unit);
    (unit - 1) as u8
}
