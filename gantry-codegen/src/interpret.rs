//! A straightforward IR interpreter.
//!
//! The interpreter executes a code object at any pipeline stage: client
//! form, structured or goto form, and register-allocated form (where it
//! models physical registers as named cells). It exists as the oracle for
//! testing that transformations preserve a program's value, not as part of
//! the compilation pipeline. Loads and stores act on an abstract memory
//! keyed by address value; `Invoke` is outside its model.

use crate::buffer::{Pos, Word};
use crate::ir::{Code, Node, Opcode};
use crate::result::{CodegenError, CodegenResult};
use crate::simplify::eval_binary;
use rustc_hash::FxHashMap;

const FUEL: u64 = 10_000_000;

/// Execute `code` with the given argument values and return the value the
/// program assigned to its return slot.
pub fn run(code: &Code, args: &[Word]) -> CodegenResult<Word> {
    Interp::new(code, args)?.exec()
}

struct Interp<'a> {
    code: &'a Code,
    args: &'a [Word],
    nodes: Vec<Node>,
    index_of: FxHashMap<Pos, usize>,
    /// Forward-join index per skip position.
    here_of: FxHashMap<Pos, usize>,
    /// Bound location per label position.
    mark_of: FxHashMap<Pos, usize>,
    mem: FxHashMap<Pos, Word>,
    regs: FxHashMap<Word, Word>,
    heap: FxHashMap<Word, Word>,
    ret: Option<Word>,
}

impl<'a> Interp<'a> {
    fn new(code: &'a Code, args: &'a [Word]) -> CodegenResult<Self> {
        let nodes: Vec<Node> = code.nodes().collect();
        let mut index_of = FxHashMap::default();
        let mut here_of = FxHashMap::default();
        let mut mark_of = FxHashMap::default();
        for (i, node) in nodes.iter().enumerate() {
            index_of.insert(node.pos, i);
            match node.op {
                Opcode::Here => {
                    here_of.insert(node.arg(0), i);
                }
                Opcode::Mark => {
                    mark_of.insert(node.arg(0), i);
                }
                _ => {}
            }
        }
        Ok(Self {
            code,
            args,
            nodes,
            index_of,
            here_of,
            mark_of,
            mem: FxHashMap::default(),
            regs: FxHashMap::default(),
            heap: FxHashMap::default(),
            ret: None,
        })
    }

    fn exec(&mut self) -> CodegenResult<Word> {
        let mut at = 0;
        let mut fuel = FUEL;
        while at < self.nodes.len() {
            fuel -= 1;
            if fuel == 0 {
                return Err(CodegenError::ImplLimitExceeded);
            }
            let node = self.nodes[at].clone();
            match node.op {
                Opcode::Move => {
                    let value = self.eval(node.arg(1))?;
                    self.write(node.arg(0), value)?;
                }
                Opcode::St => {
                    let addr = self.eval(node.arg(0))?;
                    let value = self.eval(node.arg(1))?;
                    self.heap.insert(addr, value);
                }
                Opcode::RMove => {
                    let v = self.regs.get(&node.arg(1)).copied().unwrap_or(0);
                    self.regs.insert(node.arg(0), v);
                }
                Opcode::RSwap => {
                    let a = self.regs.get(&node.arg(0)).copied().unwrap_or(0);
                    let b = self.regs.get(&node.arg(1)).copied().unwrap_or(0);
                    self.regs.insert(node.arg(0), b);
                    self.regs.insert(node.arg(1), a);
                }
                Opcode::Skip => {
                    at = self.join_of(node.pos)?;
                    continue;
                }
                Opcode::SkipIf => {
                    if self.eval(node.arg(0))? != 0 {
                        at = self.join_of(node.pos)?;
                        continue;
                    }
                }
                Opcode::Repeat => {
                    at = self.target_of(&self.index_of, node.arg(0))?;
                    continue;
                }
                Opcode::Jump => {
                    at = self.target_of(&self.mark_of, node.arg(0))?;
                    continue;
                }
                Opcode::Branch => {
                    if self.eval(node.arg(1))? != 0 {
                        at = self.target_of(&self.mark_of, node.arg(0))?;
                        continue;
                    }
                }
                Opcode::Exit => return Ok(self.ret.unwrap_or(0)),
                Opcode::Invoke => {
                    return Err(CodegenError::Unsupported("Invoke".to_string()));
                }
                _ => {}
            }
            at += 1;
        }
        Ok(self.ret.unwrap_or(0))
    }

    fn join_of(&self, skip: Pos) -> CodegenResult<usize> {
        self.here_of.get(&skip).copied().ok_or_else(|| {
            CodegenError::MalformedIr(format!("skip at {} has no join", skip))
        })
    }

    fn target_of(&self, table: &FxHashMap<Pos, usize>, key: Pos) -> CodegenResult<usize> {
        table.get(&key).copied().ok_or_else(|| {
            CodegenError::MalformedIr(format!("jump to unbound location {}", key))
        })
    }

    fn write(&mut self, dst: Pos, value: Word) -> CodegenResult<()> {
        let node = self.code.node_at(dst);
        let root = match node.op {
            Opcode::Reg => {
                self.regs.insert(node.arg(1), value);
                node.arg(0)
            }
            _ => {
                self.mem.insert(dst, value);
                dst
            }
        };
        if self.code.node_at(root).op == Opcode::RVal {
            self.ret = Some(value);
        }
        Ok(())
    }

    fn eval(&mut self, pos: Pos) -> CodegenResult<Word> {
        let node = self.code.node_at(pos);
        match node.op {
            Opcode::Imm => Ok(node.arg(0)),
            Opcode::Arg => {
                if let Some(&v) = self.mem.get(&pos) {
                    return Ok(v);
                }
                let k = node.arg(1) as usize;
                self.args.get(k).copied().ok_or_else(|| {
                    CodegenError::MalformedIr(format!("no value for argument {}", k))
                })
            }
            Opcode::Temp | Opcode::RVal => Ok(self.mem.get(&pos).copied().unwrap_or(0)),
            Opcode::Reg => {
                let unit = node.arg(1);
                let var = node.arg(0);
                if self.code.node_at(var).op.is_pure()
                    && !matches!(
                        self.code.node_at(var).op,
                        Opcode::Temp | Opcode::Arg | Opcode::RVal
                    )
                {
                    // An expression computed in place at its consumer.
                    let v = self.eval(var)?;
                    self.regs.insert(unit, v);
                    return Ok(v);
                }
                match self.regs.get(&unit) {
                    Some(&v) => Ok(v),
                    // The location-assertion case: the value arrived in the
                    // register before this program started, as with an
                    // incoming argument.
                    None => self.eval(var),
                }
            }
            op if op.is_arith() || op.is_compare() => {
                let x = self.eval(node.arg(0))?;
                let y = self.eval(node.arg(1))?;
                let sign = self.code.value_sign(node.arg(0));
                eval_binary(op, x, y, sign).ok_or_else(|| {
                    CodegenError::MalformedIr("division by zero".to_string())
                })
            }
            Opcode::Neg => Ok(self.eval(node.arg(0))?.wrapping_neg()),
            Opcode::Not => Ok((self.eval(node.arg(0))? == 0) as Word),
            Opcode::Cast => self.eval(node.arg(1)),
            Opcode::Conv => {
                let v = self.eval(node.arg(1))?;
                let dw = self.code.type_width(node.arg(0));
                let dsign = self.code.type_sign(node.arg(0));
                let (sw, ssign) = match self.code.type_of(node.arg(1)) {
                    Some(ty) => (self.code.type_width(ty), self.code.type_sign(ty)),
                    None => (64, crate::ir::Sign::Signed),
                };
                let width = sw.min(dw);
                let sign = if dw < sw { dsign } else { ssign };
                if width >= 64 {
                    return Ok(v);
                }
                let shift = 64 - width;
                Ok(match sign {
                    crate::ir::Sign::Signed => (v << shift) >> shift,
                    crate::ir::Sign::Unsigned => (((v as u64) << shift) >> shift) as Word,
                })
            }
            Opcode::Ld => {
                let addr = self.eval(node.arg(0))?;
                Ok(self.heap.get(&addr).copied().unwrap_or(0))
            }
            op => Err(CodegenError::Unsupported(op.name().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_argument_sums() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[i64t, i64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let a1 = code.arg(f, 1);
        let sum = code.add(a0, a1);
        let rv = code.rval(f);
        code.mov(rv, sum);
        code.exit(f);
        assert_eq!(run(&code, &[19, 23]).unwrap(), 42);
    }

    #[test]
    fn executes_structured_loops() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[]);
        let f = code.enter(ft);
        let acc = code.temp(i64t);
        let one = code.imm(1);
        code.mov(acc, one);
        let i = code.temp(i64t);
        let zero = code.imm(0);
        code.mov(i, zero);
        let lp = code.forever();
        let eight = code.imm(8);
        let done = code.gte(i, eight);
        let s = code.skip_if(done);
        let two = code.imm(2);
        let doubled = code.mul(acc, two);
        code.mov(acc, doubled);
        let next = code.add(i, one);
        code.mov(i, next);
        code.repeat(lp);
        code.here(s);
        let rv = code.rval(f);
        code.mov(rv, acc);
        code.exit(f);
        assert_eq!(run(&code, &[]).unwrap(), 256);
    }

    #[test]
    fn executes_goto_form() {
        let structured = {
            let mut code = Code::new();
            let i64t = code.int(-64);
            let ft = code.fun(0, i64t, &[i64t]);
            let f = code.enter(ft);
            let a0 = code.arg(f, 0);
            let t = code.temp(i64t);
            let zero = code.imm(0);
            code.mov(t, zero);
            let c = code.lt(a0, zero);
            let s = code.skip_if(c);
            let one = code.imm(1);
            code.mov(t, one);
            code.here(s);
            let rv = code.rval(f);
            code.mov(rv, t);
            code.exit(f);
            code
        };
        let goto = crate::structurize::unstructurize(&structured);
        assert_eq!(run(&goto, &[5]).unwrap(), 1);
        assert_eq!(run(&goto, &[-5]).unwrap(), 0);
    }

    #[test]
    fn abstract_memory_round_trips() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[i64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let addr = code.imm(0x100);
        code.st(addr, a0);
        let back = code.ld(addr);
        let rv = code.rval(f);
        code.mov(rv, back);
        code.exit(f);
        assert_eq!(run(&code, &[7]).unwrap(), 7);
    }

    #[test]
    fn signed_and_unsigned_compare_disagree() {
        // Lt over a signed type, then over an unsigned type.
        for (width, expected) in [(-64i64, 0), (64, 1)] {
            let mut code = Code::new();
            let ty = code.int(width);
            let ft = code.fun(0, ty, &[ty, ty]);
            let f = code.enter(ft);
            let a0 = code.arg(f, 0);
            let a1 = code.arg(f, 1);
            let c = code.lt(a0, a1);
            let rv = code.rval(f);
            code.mov(rv, c);
            code.exit(f);
            assert_eq!(run(&code, &[13, -1]).unwrap(), expected, "width {}", width);
        }
    }
}
