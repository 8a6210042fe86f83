//! Register-transfer lowering.
//!
//! Prepares a code object for the register allocator by wrapping every
//! operand that must live in a register in a `Reg(value, class)` node, with
//! the class chosen from the operand's IR type and the target's word width.
//! Interior results of expression trees are wrapped too, since a
//! two-operand machine computes them in registers of their own. Immediates
//! stay inline where the target can encode them and are otherwise wrapped;
//! an immediate on the left of a commutative operation is swapped to the
//! right first. A comparison feeding a conditional skip stays unwrapped so
//! the branch can fuse with it.

use crate::buffer::{Pos, Word};
use crate::ir::{Code, Node, Opcode};
use crate::isa::TargetIsa;
use crate::remap::Remap;
use crate::result::CodegenResult;
use smallvec::SmallVec;

/// Lower `code` into register-transfer form.
pub fn lower(code: &Code, isa: &dyn TargetIsa) -> CodegenResult<Code> {
    let mut pass = Lower {
        src: code,
        isa,
        dst: Code::new(),
        remap: Remap::new(),
    };
    pass.run()?;
    Ok(pass.dst)
}

struct Lower<'a> {
    src: &'a Code,
    isa: &'a dyn TargetIsa,
    dst: Code,
    remap: Remap,
}

impl<'a> Lower<'a> {
    fn run(&mut self) -> CodegenResult<()> {
        for node in self.src.nodes() {
            match node.op {
                op if op.is_arith() => self.lower_binary(&node),
                op if op.is_compare() => self.lower_binary(&node),
                Opcode::Neg => {
                    let a = self.wrap(node.arg(0), false);
                    self.emit(&node, &[a]);
                }
                Opcode::Not => {
                    let a = self.wrap(node.arg(0), true);
                    self.emit(&node, &[a]);
                }
                Opcode::Cast | Opcode::Conv => {
                    let ty = self.remap.get(node.arg(0));
                    let v = self.wrap(node.arg(1), false);
                    self.emit(&node, &[ty, v]);
                }
                Opcode::Ld => {
                    let addr = self.wrap(node.arg(0), true);
                    self.emit(&node, &[addr]);
                }
                Opcode::St => {
                    let addr = self.wrap(node.arg(0), true);
                    let v = self.wrap(node.arg(1), false);
                    self.emit(&node, &[addr, v]);
                }
                Opcode::Move => self.lower_move(&node),
                Opcode::SkipIf => {
                    let cond = node.arg(0);
                    let arg = if self.src.node_at(cond).op.is_compare() {
                        self.remap.get(cond)
                    } else {
                        self.wrap(cond, false)
                    };
                    self.emit(&node, &[arg]);
                }
                Opcode::Invoke => {
                    let callee = self.wrap(node.arg(0), true);
                    let mut args: SmallVec<[Word; 4]> = SmallVec::new();
                    args.push(callee);
                    for &a in &node.args[1..] {
                        args.push(self.wrap(a, true));
                    }
                    self.emit(&node, &args);
                }
                _ => {
                    self.remap.copy(&node, &mut self.dst);
                }
            }
        }
        Ok(())
    }

    fn lower_binary(&mut self, node: &Node) {
        let (mut lhs, mut rhs) = (node.arg(0), node.arg(1));
        // Keep immediates on the right where the operation allows it.
        if node.op.is_commutative()
            && self.src.node_at(lhs).op == Opcode::Imm
            && self.src.node_at(rhs).op != Opcode::Imm
        {
            std::mem::swap(&mut lhs, &mut rhs);
        }
        let force_rhs = node.op == Opcode::Div;
        let a = self.wrap(lhs, true);
        let b = self.wrap(rhs, force_rhs);
        self.emit(node, &[a, b]);
    }

    fn lower_move(&mut self, node: &Node) {
        let dst_pos = node.arg(0);
        let dst_node = self.src.node_at(dst_pos);
        let dst = match dst_node.op {
            Opcode::Reg => self.remap.get(dst_pos),
            Opcode::Temp | Opcode::Arg => {
                let class = self.class_of(dst_pos);
                let home = self.remap.get(dst_pos);
                self.dst.reg(home, class)
            }
            // A return slot that bypassed the calling-convention pass still
            // lands in the return register.
            Opcode::RVal => {
                let home = self.remap.get(dst_pos);
                self.dst.reg(home, self.isa.ret_reg())
            }
            _ => self.remap.get(dst_pos),
        };
        // The source computes straight into the destination register, so
        // only its interior needs wrapping, which happened at its own
        // position; an Invoke result is the exception, living in the
        // return register.
        let src_pos = node.arg(1);
        let src = match self.src.node_at(src_pos).op {
            Opcode::Invoke => {
                let v = self.remap.get(src_pos);
                self.dst.reg(v, self.isa.ret_reg())
            }
            _ => self.remap.get(src_pos),
        };
        let new = self.dst.append(Opcode::Move, &[dst, src]);
        self.remap.set(node.pos, new);
    }

    /// Translate one operand, wrapping it in a register request when the
    /// allocator must place it.
    fn wrap(&mut self, pos: Pos, force_reg: bool) -> Pos {
        let node = self.src.node_at(pos);
        let new = self.remap.get(pos);
        match node.op {
            Opcode::Reg => new,
            Opcode::Imm => {
                if !force_reg && self.isa.imm_fits(node.arg(0)) {
                    new
                } else {
                    let class = self.class_of(pos);
                    self.dst.reg(new, class)
                }
            }
            Opcode::Temp | Opcode::Arg | Opcode::RVal => {
                let class = self.class_of(pos);
                self.dst.reg(new, class)
            }
            Opcode::Invoke => self.dst.reg(new, self.isa.ret_reg()),
            op if op.is_pure() || op == Opcode::Ld => {
                let class = self.class_of(pos);
                self.dst.reg(new, class)
            }
            _ => new,
        }
    }

    fn class_of(&self, pos: Pos) -> Word {
        let bits = self
            .src
            .type_of(pos)
            .map(|ty| self.src.type_width(ty))
            .unwrap_or(64);
        self.isa.class_for_width(bits)
    }

    fn emit(&mut self, node: &Node, args: &[Word]) {
        let new = self.dst.append(node.op, args);
        self.remap.set(node.pos, new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa;
    use crate::isa::x86::registers::{GROUP_DWORD, GROUP_QWORD};

    #[test]
    fn operands_get_class_requests() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let i32t = code.int(-32);
        let ft = code.fun(0, i64t, &[i64t, i32t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let a1 = code.arg(f, 1);
        let sum = code.add(a0, a1);
        let t = code.temp(i64t);
        code.mov(t, sum);
        code.exit(f);

        let isa = isa::lookup("x86_64").unwrap();
        let out = lower(&code, isa).unwrap();

        let add = out.nodes().find(|n| n.op == Opcode::Add).unwrap();
        let lhs = out.node_at(add.arg(0));
        let rhs = out.node_at(add.arg(1));
        assert_eq!(lhs.op, Opcode::Reg);
        assert_eq!(lhs.arg(1), GROUP_QWORD);
        assert_eq!(rhs.op, Opcode::Reg);
        assert_eq!(rhs.arg(1), GROUP_DWORD);

        // The move destination is wrapped as well.
        let mv = out.nodes().find(|n| n.op == Opcode::Move).unwrap();
        assert_eq!(out.node_at(mv.arg(0)).op, Opcode::Reg);
        // But the source expression computes into it unwrapped.
        assert_eq!(out.node_at(mv.arg(1)).op, Opcode::Add);
    }

    #[test]
    fn interior_results_are_wrapped() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[i64t, i64t, i64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let a1 = code.arg(f, 1);
        let a2 = code.arg(f, 2);
        let prod = code.mul(a0, a1);
        let sum = code.add(prod, a2);
        let t = code.temp(i64t);
        code.mov(t, sum);
        code.exit(f);

        let isa = isa::lookup("x86_64").unwrap();
        let out = lower(&code, isa).unwrap();
        let add = out.nodes().find(|n| n.op == Opcode::Add).unwrap();
        let lhs = out.node_at(add.arg(0));
        assert_eq!(lhs.op, Opcode::Reg);
        assert_eq!(out.node_at(lhs.arg(0)).op, Opcode::Mul);
    }

    #[test]
    fn immediates_canonicalize_to_the_right() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[i64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let two = code.imm(2);
        let prod = code.mul(two, a0);
        let t = code.temp(i64t);
        code.mov(t, prod);
        code.exit(f);

        let isa = isa::lookup("x86_64").unwrap();
        let out = lower(&code, isa).unwrap();
        let mul = out.nodes().find(|n| n.op == Opcode::Mul).unwrap();
        assert_eq!(out.node_at(mul.arg(0)).op, Opcode::Reg);
        assert_eq!(out.node_at(mul.arg(1)).op, Opcode::Imm);
    }

    #[test]
    fn wide_immediates_and_divisors_need_registers() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[i64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let big = code.imm(0x1_0000_0000);
        let small = code.imm(3);
        let sum = code.add(a0, big);
        let quot = code.div(sum, small);
        let t = code.temp(i64t);
        code.mov(t, quot);
        code.exit(f);

        let isa = isa::lookup("x86_64").unwrap();
        let out = lower(&code, isa).unwrap();
        let add = out.nodes().find(|n| n.op == Opcode::Add).unwrap();
        assert_eq!(out.node_at(add.arg(1)).op, Opcode::Reg);
        let div = out.nodes().find(|n| n.op == Opcode::Div).unwrap();
        assert_eq!(out.node_at(div.arg(1)).op, Opcode::Reg);
    }

    #[test]
    fn branch_comparisons_stay_fused() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[i64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let zero = code.imm(0);
        let c = code.lt(a0, zero);
        let s = code.skip_if(c);
        code.here(s);
        code.exit(f);

        let isa = isa::lookup("x86_64").unwrap();
        let out = lower(&code, isa).unwrap();
        let skip = out.nodes().find(|n| n.op == Opcode::SkipIf).unwrap();
        assert_eq!(out.node_at(skip.arg(0)).op, Opcode::Lt);
    }
}
