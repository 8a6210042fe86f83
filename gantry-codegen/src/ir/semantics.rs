//! Semantic queries over a code object.
//!
//! These are read-only projections over a position: the type of a value, its
//! signedness, its compile-time constant value, and a few category
//! predicates. Queries walk backward through value-forwarding nodes and
//! short-circuit on the first answer; none of them visits the whole program.

use crate::buffer::{Pos, Word};
use crate::ir::{Code, Opcode};

/// Signedness of an integer-typed value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sign {
    /// Two's-complement signed.
    Signed,
    /// Unsigned.
    Unsigned,
}

impl Code {
    /// The position of the type node describing the value at `pos`, walking
    /// through `Reg`, `Arg`, `RVal`, `Temp`, `Cast`, `Conv`, `Move` and
    /// arithmetic to the root type node.
    ///
    /// Returns `None` for values with no declared type, such as a bare
    /// immediate or a load result; those take their type from context.
    pub fn type_of(&self, pos: Pos) -> Option<Pos> {
        let mut at = pos;
        loop {
            let node = self.node_at(at);
            match node.op {
                Opcode::Int | Opcode::Ptr | Opcode::Fun => return Some(at),
                Opcode::Temp | Opcode::Cast | Opcode::Conv => at = node.arg(0),
                Opcode::Reg | Opcode::Move => at = node.arg(0),
                Opcode::Arg => {
                    let enter = self.node_at(node.arg(0));
                    debug_assert_eq!(enter.op, Opcode::Enter);
                    let funty = self.node_at(enter.arg(0));
                    debug_assert_eq!(funty.op, Opcode::Fun);
                    let k = node.arg(1) as usize;
                    at = funty.arg(2 + k);
                }
                Opcode::RVal => {
                    let enter = self.node_at(node.arg(0));
                    debug_assert_eq!(enter.op, Opcode::Enter);
                    let funty = self.node_at(enter.arg(0));
                    at = funty.arg(1);
                }
                op if op.is_arith() || op.is_compare() => at = node.arg(0),
                Opcode::Neg | Opcode::Not => at = node.arg(0),
                _ => return None,
            }
        }
    }

    /// Is the type node at `ty` a signed integer type?
    ///
    /// `Ptr` and `Fun` count as unsigned.
    pub fn type_sign(&self, ty: Pos) -> Sign {
        let node = self.node_at(ty);
        match node.op {
            Opcode::Int if node.arg(0) < 0 => Sign::Signed,
            _ => Sign::Unsigned,
        }
    }

    /// Bit width of the type node at `ty`; pointers and functions are
    /// word-sized.
    pub fn type_width(&self, ty: Pos) -> u32 {
        let node = self.node_at(ty);
        match node.op {
            Opcode::Int => node.arg(0).unsigned_abs() as u32,
            _ => 64,
        }
    }

    /// Signedness of the value at `pos`. Untyped values default to signed,
    /// matching the arithmetic the simplifier applies to them.
    pub fn value_sign(&self, pos: Pos) -> Sign {
        match self.type_of(pos) {
            Some(ty) => self.type_sign(ty),
            None => Sign::Signed,
        }
    }

    /// The compile-time constant at `pos`, for `Imm` nodes.
    pub fn const_value(&self, pos: Pos) -> Option<Word> {
        let node = self.node_at(pos);
        match node.op {
            Opcode::Imm => Some(node.arg(0)),
            _ => None,
        }
    }

    /// Does `pos` name a storage location with a memory home?
    ///
    /// `Temp` and `Arg` values have homes the allocator can spill to and
    /// fill from; everything else lives only in registers or in the
    /// instruction stream.
    pub fn is_storage(&self, pos: Pos) -> bool {
        matches!(self.node_at(pos).op, Opcode::Temp | Opcode::Arg)
    }

    /// Resolve the storage root a `Move` destination names: a `Reg` wrapper
    /// is unwrapped to its variable.
    pub fn storage_root(&self, dst: Pos) -> Pos {
        let node = self.node_at(dst);
        match node.op {
            Opcode::Reg => node.arg(0),
            _ => dst,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_walks() {
        let mut code = Code::new();
        let i32t = code.int(-32);
        let u64t = code.int(64);
        let ft = code.fun(0, i32t, &[u64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let rv = code.rval(f);
        let t = code.temp(i32t);
        let sum = code.add(t, a0);

        assert_eq!(code.type_of(i32t), Some(i32t));
        assert_eq!(code.type_of(a0), Some(u64t));
        assert_eq!(code.type_of(rv), Some(i32t));
        assert_eq!(code.type_of(t), Some(i32t));
        assert_eq!(code.type_of(sum), Some(i32t));
        assert_eq!(code.type_sign(i32t), Sign::Signed);
        assert_eq!(code.type_sign(u64t), Sign::Unsigned);
        assert_eq!(code.type_width(i32t), 32);
    }

    #[test]
    fn constants_and_storage() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let c = code.imm(7);
        let t = code.temp(i64t);
        assert_eq!(code.const_value(c), Some(7));
        assert_eq!(code.const_value(t), None);
        assert_eq!(code.type_of(c), None);
        assert!(code.is_storage(t));
        assert!(!code.is_storage(c));
    }
}
