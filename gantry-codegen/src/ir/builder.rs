//! Typed append helpers, one per opcode.
//!
//! These are thin wrappers over `Code::append` that make building IR by hand
//! read like the programs they describe. Every helper returns the position
//! of the appended node.

use crate::buffer::{Pos, Word};
use crate::ir::{Code, Opcode};
use smallvec::SmallVec;

impl Code {
    /// `Int(width)` type; a negative width means signed.
    pub fn int(&mut self, width: Word) -> Pos {
        self.append(Opcode::Int, &[width])
    }

    /// `Ptr` type.
    pub fn ptr(&mut self) -> Pos {
        self.append(Opcode::Ptr, &[])
    }

    /// `Fun(cc, rty, argtys...)` type.
    pub fn fun(&mut self, cc: Word, rty: Pos, argtys: &[Pos]) -> Pos {
        let mut args: SmallVec<[Word; 8]> = SmallVec::new();
        args.push(cc);
        args.push(rty);
        args.extend_from_slice(argtys);
        self.append(Opcode::Fun, &args)
    }

    /// Immediate value.
    pub fn imm(&mut self, v: Word) -> Pos {
        self.append(Opcode::Imm, &[v])
    }

    /// The `k`-th argument of the function framed by `enter`.
    pub fn arg(&mut self, enter: Pos, k: Word) -> Pos {
        self.append(Opcode::Arg, &[enter, k])
    }

    /// The return-value slot of the function framed by `enter`.
    pub fn rval(&mut self, enter: Pos) -> Pos {
        self.append(Opcode::RVal, &[enter])
    }

    /// A typed temporary.
    pub fn temp(&mut self, ty: Pos) -> Pos {
        self.append(Opcode::Temp, &[ty])
    }

    /// A value constrained to the register or register group `id`.
    pub fn reg(&mut self, var: Pos, id: Word) -> Pos {
        self.append(Opcode::Reg, &[var, id])
    }

    /// Addition.
    pub fn add(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::Add, &[a, b])
    }

    /// Subtraction.
    pub fn sub(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::Sub, &[a, b])
    }

    /// Multiplication.
    pub fn mul(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::Mul, &[a, b])
    }

    /// Division.
    pub fn div(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::Div, &[a, b])
    }

    /// Bitwise and.
    pub fn and(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::And, &[a, b])
    }

    /// Bitwise or.
    pub fn or(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::Or, &[a, b])
    }

    /// Bitwise exclusive or.
    pub fn xor(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::Xor, &[a, b])
    }

    /// Arithmetic negation.
    pub fn neg(&mut self, a: Pos) -> Pos {
        self.append(Opcode::Neg, &[a])
    }

    /// Boolean negation.
    pub fn not(&mut self, a: Pos) -> Pos {
        self.append(Opcode::Not, &[a])
    }

    /// Equality.
    pub fn eq(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::Eq, &[a, b])
    }

    /// Inequality.
    pub fn neq(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::Neq, &[a, b])
    }

    /// Less-than.
    pub fn lt(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::Lt, &[a, b])
    }

    /// Less-than-or-equal.
    pub fn lte(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::Lte, &[a, b])
    }

    /// Greater-than.
    pub fn gt(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::Gt, &[a, b])
    }

    /// Greater-than-or-equal.
    pub fn gte(&mut self, a: Pos, b: Pos) -> Pos {
        self.append(Opcode::Gte, &[a, b])
    }

    /// Reinterpret `val` as `ty`.
    pub fn cast(&mut self, ty: Pos, val: Pos) -> Pos {
        self.append(Opcode::Cast, &[ty, val])
    }

    /// Convert `val` to `ty`.
    pub fn conv(&mut self, ty: Pos, val: Pos) -> Pos {
        self.append(Opcode::Conv, &[ty, val])
    }

    /// Assign `src` to the storage named by `dst`.
    pub fn mov(&mut self, dst: Pos, src: Pos) -> Pos {
        self.append(Opcode::Move, &[dst, src])
    }

    /// Load from `addr`.
    pub fn ld(&mut self, addr: Pos) -> Pos {
        self.append(Opcode::Ld, &[addr])
    }

    /// Store `val` to `addr`.
    pub fn st(&mut self, addr: Pos, val: Pos) -> Pos {
        self.append(Opcode::St, &[addr, val])
    }

    /// Call the function value `fun` with `args`.
    pub fn invoke(&mut self, fun: Pos, args: &[Pos]) -> Pos {
        let mut all: SmallVec<[Word; 8]> = SmallVec::new();
        all.push(fun);
        all.extend_from_slice(args);
        self.append(Opcode::Invoke, &all)
    }

    /// Declare a label.
    pub fn label(&mut self) -> Pos {
        self.append(Opcode::Label, &[])
    }

    /// Bind `label` to this location.
    pub fn mark(&mut self, label: Pos) -> Pos {
        self.append(Opcode::Mark, &[label])
    }

    /// Jump to `label`.
    pub fn jump(&mut self, label: Pos) -> Pos {
        self.append(Opcode::Jump, &[label])
    }

    /// Jump to `label` when `cond` is nonzero.
    pub fn branch(&mut self, label: Pos, cond: Pos) -> Pos {
        self.append(Opcode::Branch, &[label, cond])
    }

    /// Open a structured loop.
    pub fn forever(&mut self) -> Pos {
        self.append(Opcode::Forever, &[])
    }

    /// Loop back to `forever`.
    pub fn repeat(&mut self, forever: Pos) -> Pos {
        self.append(Opcode::Repeat, &[forever])
    }

    /// Exit forward to the matching `Here`.
    pub fn skip(&mut self) -> Pos {
        self.append(Opcode::Skip, &[])
    }

    /// Exit forward when `cond` is nonzero.
    pub fn skip_if(&mut self, cond: Pos) -> Pos {
        self.append(Opcode::SkipIf, &[cond])
    }

    /// Forward-join target for `skip`.
    pub fn here(&mut self, skip: Pos) -> Pos {
        self.append(Opcode::Here, &[skip])
    }

    /// Open a function frame of type `funty`.
    pub fn enter(&mut self, funty: Pos) -> Pos {
        self.append(Opcode::Enter, &[funty])
    }

    /// Close the function frame opened by `enter`.
    pub fn exit(&mut self, enter: Pos) -> Pos {
        self.append(Opcode::Exit, &[enter])
    }

    /// Register-to-register move (allocator emission).
    pub fn rmove(&mut self, dst: Word, src: Word) -> Pos {
        self.append(Opcode::RMove, &[dst, src])
    }

    /// Register-register exchange (allocator emission).
    pub fn rswap(&mut self, a: Word, b: Word) -> Pos {
        self.append(Opcode::RSwap, &[a, b])
    }
}
