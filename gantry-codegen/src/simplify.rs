//! The simplifier: combined constant folding, dead-code elimination, common
//! subexpression elimination and branch elimination.
//!
//! Each round is two phases over the whole code object: a reverse liveness
//! phase and a forward fold-and-rewrite phase producing a fresh code object
//! through the remapper. Rounds repeat up to a caller-supplied bound; each
//! round can expose opportunities for the next, and stopping at an earlier
//! fixed point is valid.
//!
//! Liveness is positional, so two refinements keep it sound in the presence
//! of control flow: an assignment inside a loop stays live when its storage
//! is read anywhere in that loop (the read is reachable through the
//! back-edge even when it precedes the write), and an assignment whose
//! storage is read after any later assignment stays live as well (the read
//! may sit in a sibling branch arm).

use crate::buffer::{Pos, Word};
use crate::ir::{Code, Opcode, Sign};
use crate::remap::{copy_code, Remap};
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

/// Simplify `code`, iterating the two-phase rewrite at most `iterations`
/// times. Returns a fresh code object; the input is left untouched.
pub fn simplify(code: &Code, iterations: usize) -> Code {
    let mut current: Option<Code> = None;
    for round in 0..iterations {
        let input = current.as_ref().unwrap_or(code);
        let info = Liveness::compute(input);
        let mut rw = Rewrite::new(input, &info);
        rw.run();
        debug!(
            "simplify: round {} rewrote {} sites",
            round, rw.actions
        );
        let done = rw.actions == 0;
        current = Some(rw.dst);
        if done {
            break;
        }
    }
    current.unwrap_or_else(|| copy_code(code))
}

/// A loop region: the byte interval a back-edge spans, together with the
/// storage roots read anywhere inside it.
struct LoopRegion {
    start: Pos,
    end: Pos,
    reads: FxHashSet<Pos>,
}

struct Liveness {
    live: Vec<bool>,
    /// Number of assignments per temp storage root.
    assigns: FxHashMap<Pos, u32>,
    regions: Vec<LoopRegion>,
}

impl Liveness {
    fn compute(code: &Code) -> Self {
        let mut regions = Self::loop_regions(code);
        let mut assigns: FxHashMap<Pos, u32> = FxHashMap::default();

        // Record every syntactic read of a temp, and which loop regions
        // contain it. Reads by nodes that turn out to be dead only make the
        // analysis more conservative for one round.
        for node in code.nodes() {
            if node.op == Opcode::Move {
                let root = code.storage_root(node.arg(0));
                if code.node_at(root).op == Opcode::Temp {
                    *assigns.entry(root).or_insert(0) += 1;
                }
            }
            for (i, &a) in node.args.iter().enumerate() {
                if !node.op.arg_is_node(i) {
                    continue;
                }
                if node.op.writes_first_arg() && i == 0 {
                    continue;
                }
                if code.node_at(a).op != Opcode::Temp {
                    continue;
                }
                for region in regions.iter_mut() {
                    if region.start <= node.pos && node.pos <= region.end {
                        region.reads.insert(a);
                    }
                }
            }
        }

        // Reverse phase. `read_after` is never cleared by an assignment: a
        // read past a later assignment can still observe this one through a
        // sibling branch arm, so only storage with no later read at all is
        // eligible for dead-assignment elimination.
        let mut live = vec![false; code.byte_len()];
        let mut read_after: FxHashSet<Pos> = FxHashSet::default();
        for node in code.nodes().rev() {
            let alive = if node.op.is_effectful() {
                true
            } else if node.op == Opcode::Move {
                let root = code.storage_root(node.arg(0));
                if code.node_at(root).op == Opcode::Temp {
                    read_after.contains(&root)
                        || regions.iter().any(|r| {
                            r.start <= node.pos && node.pos <= r.end && r.reads.contains(&root)
                        })
                } else {
                    true
                }
            } else {
                live[node.pos as usize]
            };
            if !alive {
                continue;
            }
            live[node.pos as usize] = true;
            for (i, &a) in node.args.iter().enumerate() {
                if !node.op.arg_is_node(i) {
                    continue;
                }
                live[a as usize] = true;
                let is_write = node.op.writes_first_arg() && i == 0;
                if !is_write && code.node_at(a).op == Opcode::Temp {
                    read_after.insert(a);
                }
            }
        }

        Self {
            live,
            assigns,
            regions,
        }
    }

    /// Collect back-edge intervals: `Forever`..`Repeat` pairs in structured
    /// form, and `Mark`..backward-`Jump`/`Branch` pairs in goto form.
    fn loop_regions(code: &Code) -> Vec<LoopRegion> {
        let mut regions = Vec::new();
        let mut mark_at: FxHashMap<Pos, Pos> = FxHashMap::default();
        for node in code.nodes() {
            match node.op {
                Opcode::Repeat => regions.push(LoopRegion {
                    start: node.arg(0),
                    end: node.pos,
                    reads: FxHashSet::default(),
                }),
                Opcode::Mark => {
                    mark_at.insert(node.arg(0), node.pos);
                }
                Opcode::Jump | Opcode::Branch => {
                    if let Some(&m) = mark_at.get(&node.arg(0)) {
                        regions.push(LoopRegion {
                            start: m,
                            end: node.pos,
                            reads: FxHashSet::default(),
                        });
                    }
                }
                _ => {}
            }
        }
        regions
    }

    fn is_live(&self, pos: Pos) -> bool {
        self.live[pos as usize]
    }
}

struct Rewrite<'a> {
    src: &'a Code,
    info: &'a Liveness,
    dst: Code,
    remap: Remap,
    /// Known compile-time values, keyed by source position.
    consts: FxHashMap<Pos, Word>,
    /// Source positions whose value is recomputable anywhere: immediates
    /// and pure operations over them, with no storage or memory reads.
    rigid: FxHashSet<Pos>,
    /// Per-basic-block expression cache over new operand positions.
    cache: FxHashMap<(Opcode, Pos, Pos), Pos>,
    /// Set after an unconditional exit; cleared at the next join or loop
    /// entry, which is where control can land again.
    suppress: bool,
    actions: usize,
}

impl<'a> Rewrite<'a> {
    fn new(src: &'a Code, info: &'a Liveness) -> Self {
        Self {
            src,
            info,
            dst: Code::new(),
            remap: Remap::new(),
            consts: FxHashMap::default(),
            rigid: FxHashSet::default(),
            cache: FxHashMap::default(),
            suppress: false,
            actions: 0,
        }
    }

    fn run(&mut self) {
        for node in self.src.nodes() {
            if self.suppressed(&node) {
                continue;
            }
            if !self.info.is_live(node.pos) {
                continue;
            }
            self.rewrite_node(&node);
        }
    }

    /// Unreachable-code gate. Only executable nodes are swallowed; pure
    /// nodes and loads carry no control flow of their own and keep flowing
    /// so later references stay intact.
    fn suppressed(&mut self, node: &crate::ir::Node) -> bool {
        if !self.suppress {
            return false;
        }
        let reentry = matches!(
            node.op,
            Opcode::Here
                | Opcode::Forever
                | Opcode::Mark
                | Opcode::Label
                | Opcode::Enter
                | Opcode::Exit
        );
        if reentry {
            self.suppress = false;
            return false;
        }
        let executable = matches!(
            node.op,
            Opcode::Move
                | Opcode::St
                | Opcode::Invoke
                | Opcode::Skip
                | Opcode::SkipIf
                | Opcode::Repeat
                | Opcode::Jump
                | Opcode::Branch
                | Opcode::RMove
                | Opcode::RSwap
        );
        if executable {
            self.actions += 1;
            return true;
        }
        false
    }

    fn rewrite_node(&mut self, node: &crate::ir::Node) {
        match node.op {
            Opcode::Imm => {
                self.consts.insert(node.pos, node.arg(0));
                self.rigid.insert(node.pos);
                self.remap.copy(node, &mut self.dst);
            }
            op if op.is_type() => {
                self.rigid.insert(node.pos);
                self.remap.copy(node, &mut self.dst);
            }
            op if op.is_arith() || op.is_compare() => self.rewrite_binary(node),
            Opcode::Neg | Opcode::Not => self.rewrite_unary(node),
            Opcode::Cast | Opcode::Conv => {
                let value = node.arg(1);
                if let Some(&x) = self.consts.get(&value) {
                    let adjusted = self.truncate(node.arg(0), x);
                    self.consts.insert(node.pos, adjusted);
                }
                if self.rigid.contains(&value) {
                    self.rigid.insert(node.pos);
                }
                self.remap.copy(node, &mut self.dst);
            }
            Opcode::Move => self.rewrite_move(node),
            Opcode::Skip => {
                if self.skip_lands_next(node.pos) {
                    self.actions += 1;
                    return;
                }
                self.remap.copy(node, &mut self.dst);
                self.cache.clear();
                self.suppress = true;
            }
            Opcode::SkipIf => self.rewrite_skip_if(node),
            Opcode::Here => {
                // A `Here` whose skip vanished binds nothing.
                if self.remap.try_get(node.arg(0)).is_none() {
                    self.actions += 1;
                    return;
                }
                self.remap.copy(node, &mut self.dst);
                self.cache.clear();
            }
            Opcode::Repeat | Opcode::Jump => {
                self.remap.copy(node, &mut self.dst);
                self.cache.clear();
                self.suppress = true;
            }
            op => {
                self.remap.copy(node, &mut self.dst);
                if op.is_block_boundary() {
                    self.cache.clear();
                }
            }
        }
    }

    fn rewrite_binary(&mut self, node: &crate::ir::Node) {
        let (a, b) = (node.arg(0), node.arg(1));
        if let (Some(&x), Some(&y)) = (self.consts.get(&a), self.consts.get(&b)) {
            let sign = self.src.value_sign(a);
            if let Some(v) = eval_binary(node.op, x, y, sign) {
                let imm = self.dst.imm(v);
                self.remap.set(node.pos, imm);
                self.consts.insert(node.pos, v);
                self.rigid.insert(node.pos);
                self.actions += 1;
                return;
            }
        }
        let na = self.remap.get(a);
        let nb = self.remap.get(b);
        if let Some(&hit) = self.cache.get(&(node.op, na, nb)) {
            self.remap.set(node.pos, hit);
            self.actions += 1;
            return;
        }
        let new = self.remap.copy(node, &mut self.dst);
        self.cache.insert((node.op, na, nb), new);
        if self.rigid.contains(&a) && self.rigid.contains(&b) {
            self.rigid.insert(node.pos);
        }
    }

    fn rewrite_unary(&mut self, node: &crate::ir::Node) {
        let a = node.arg(0);
        if let Some(&x) = self.consts.get(&a) {
            let v = match node.op {
                Opcode::Neg => x.wrapping_neg(),
                _ => (x == 0) as Word,
            };
            let imm = self.dst.imm(v);
            self.remap.set(node.pos, imm);
            self.consts.insert(node.pos, v);
            self.rigid.insert(node.pos);
            self.actions += 1;
            return;
        }
        let inner = self.src.node_at(a);
        if inner.op == node.op {
            let grand = inner.arg(0);
            // Double negation always cancels; double boolean-not cancels
            // only over an operand already normalized to 0 or 1.
            let cancels = match node.op {
                Opcode::Neg => true,
                _ => {
                    let g = self.src.node_at(grand).op;
                    g.is_compare() || g == Opcode::Not
                }
            };
            if cancels {
                self.remap.set(node.pos, self.remap.get(grand));
                if let Some(&c) = self.consts.get(&grand) {
                    self.consts.insert(node.pos, c);
                }
                self.actions += 1;
                return;
            }
        }
        self.remap.copy(node, &mut self.dst);
        if self.rigid.contains(&a) {
            self.rigid.insert(node.pos);
        }
    }

    fn rewrite_move(&mut self, node: &crate::ir::Node) {
        let root = self.src.storage_root(node.arg(0));
        let value = node.arg(1);
        let single = self.info.assigns.get(&root).copied().unwrap_or(0) == 1;
        if self.src.node_at(root).op == Opcode::Temp && single && self.rigid.contains(&value) {
            // The temp is assigned exactly once from a recomputable value:
            // erase the move and let every use read the value directly.
            self.remap.alias(root, value);
            if let Some(&c) = self.consts.get(&value) {
                self.consts.insert(root, c);
            }
            self.rigid.insert(root);
            self.actions += 1;
            return;
        }
        self.remap.copy(node, &mut self.dst);
    }

    fn rewrite_skip_if(&mut self, node: &crate::ir::Node) {
        let cond = node.arg(0);
        if let Some(&c) = self.consts.get(&cond) {
            self.actions += 1;
            if c != 0 {
                let skip = self.dst.skip();
                self.remap.set(node.pos, skip);
                self.cache.clear();
                self.suppress = true;
            }
            return;
        }
        if self.skip_lands_next(node.pos) {
            self.actions += 1;
            return;
        }
        self.remap.copy(node, &mut self.dst);
        self.cache.clear();
    }

    /// Does this skip land on the very next executed instruction, with only
    /// dead or flow-free nodes in between?
    fn skip_lands_next(&self, skip: Pos) -> bool {
        let after = self.src.end_of(skip) as Pos;
        for node in self.src.nodes_from(after) {
            if node.op == Opcode::Here && node.arg(0) == skip {
                return true;
            }
            let transparent = node.op.is_pure()
                || node.op == Opcode::Ld
                || !self.info.is_live(node.pos);
            if !transparent {
                return false;
            }
        }
        false
    }

    /// Reduce a known value modulo the width of the given type node.
    fn truncate(&self, ty: Pos, x: Word) -> Word {
        let width = self.src.type_width(ty);
        if width >= 64 {
            return x;
        }
        let shift = 64 - width;
        match self.src.type_sign(ty) {
            Sign::Signed => (x << shift) >> shift,
            Sign::Unsigned => (((x as u64) << shift) >> shift) as Word,
        }
    }
}

/// Evaluate a binary operation over known values. Integer overflow wraps
/// modulo 2^64; division follows the signedness of the operand type and is
/// never folded when the divisor is zero.
pub(crate) fn eval_binary(op: Opcode, x: Word, y: Word, sign: Sign) -> Option<Word> {
    let b = |v: bool| v as Word;
    Some(match op {
        Opcode::Add => x.wrapping_add(y),
        Opcode::Sub => x.wrapping_sub(y),
        Opcode::Mul => x.wrapping_mul(y),
        Opcode::Div => {
            if y == 0 {
                return None;
            }
            match sign {
                Sign::Signed => x.wrapping_div(y),
                Sign::Unsigned => ((x as u64) / (y as u64)) as Word,
            }
        }
        Opcode::And => x & y,
        Opcode::Or => x | y,
        Opcode::Xor => x ^ y,
        Opcode::Eq => b(x == y),
        Opcode::Neq => b(x != y),
        Opcode::Lt => match sign {
            Sign::Signed => b(x < y),
            Sign::Unsigned => b((x as u64) < (y as u64)),
        },
        Opcode::Lte => match sign {
            Sign::Signed => b(x <= y),
            Sign::Unsigned => b((x as u64) <= (y as u64)),
        },
        Opcode::Gt => match sign {
            Sign::Signed => b(x > y),
            Sign::Unsigned => b((x as u64) > (y as u64)),
        },
        Opcode::Gte => match sign {
            Sign::Signed => b(x >= y),
            Sign::Unsigned => b((x as u64) >= (y as u64)),
        },
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_ops(code: &Code, op: Opcode) -> usize {
        code.nodes().filter(|n| n.op == op).count()
    }

    #[test]
    fn pure_expression_folds_to_one_immediate() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[]);
        let f = code.enter(ft);
        let two = code.imm(2);
        let three = code.imm(3);
        let six = code.mul(two, three);
        let seven = code.imm(7);
        let val = code.mul(six, seven);
        let rv = code.rval(f);
        code.mov(rv, val);
        code.exit(f);

        let out = simplify(&code, 4);
        assert_eq!(count_ops(&out, Opcode::Mul), 0);
        let imms: Vec<Word> = out
            .nodes()
            .filter(|n| n.op == Opcode::Imm)
            .map(|n| n.arg(0))
            .collect();
        assert_eq!(imms, vec![42]);
    }

    #[test]
    fn unread_temp_assignment_is_deleted() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[i64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let t = code.temp(i64t);
        let one = code.imm(1);
        let unused = code.add(a0, one);
        code.mov(t, unused);
        let rv = code.rval(f);
        code.mov(rv, a0);
        code.exit(f);

        let out = simplify(&code, 3);
        assert_eq!(count_ops(&out, Opcode::Temp), 0);
        assert_eq!(count_ops(&out, Opcode::Add), 0);
        assert_eq!(count_ops(&out, Opcode::Move), 1);
    }

    #[test]
    fn common_subexpressions_share_one_node() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[i64t, i64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let a1 = code.arg(f, 1);
        let s1 = code.add(a0, a1);
        let s2 = code.add(a0, a1);
        let both = code.mul(s1, s2);
        let rv = code.rval(f);
        code.mov(rv, both);
        code.exit(f);

        let out = simplify(&code, 2);
        assert_eq!(count_ops(&out, Opcode::Add), 1);
        let mul = out.nodes().find(|n| n.op == Opcode::Mul).unwrap();
        assert_eq!(mul.arg(0), mul.arg(1));
    }

    #[test]
    fn cache_does_not_cross_block_boundaries() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[i64t, i64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let a1 = code.arg(f, 1);
        let t = code.temp(i64t);
        let s1 = code.add(a0, a1);
        code.mov(t, s1);
        let s = code.skip_if(a0);
        let s2 = code.add(a0, a1);
        code.mov(t, s2);
        code.here(s);
        let rv = code.rval(f);
        code.mov(rv, t);
        code.exit(f);

        let out = simplify(&code, 1);
        assert_eq!(count_ops(&out, Opcode::Add), 2);
    }

    #[test]
    fn constant_branch_selects_one_arm() {
        // result := 6*7; t := (100 > result) ? result : result - 7
        let mut code = Code::new();
        let i32t = code.int(-32);
        let ft = code.fun(0, i32t, &[]);
        let f = code.enter(ft);
        let result = code.temp(i32t);
        let six = code.imm(6);
        let seven = code.imm(7);
        let fortytwo = code.mul(six, seven);
        code.mov(result, fortytwo);
        let t = code.temp(i32t);
        let hundred = code.imm(100);
        let cond = code.gt(hundred, result);
        let s1 = code.skip_if(cond);
        let less = code.sub(result, seven);
        code.mov(t, less);
        let s2 = code.skip();
        code.here(s1);
        code.mov(t, result);
        code.here(s2);
        let rv = code.rval(f);
        let out_val = code.cast(i32t, t);
        code.mov(rv, out_val);
        code.exit(f);

        let out = simplify(&code, 5);
        assert_eq!(count_ops(&out, Opcode::Temp), 0);
        assert_eq!(count_ops(&out, Opcode::Mul), 0);
        assert_eq!(count_ops(&out, Opcode::Sub), 0);
        assert_eq!(count_ops(&out, Opcode::Gt), 0);
        assert_eq!(count_ops(&out, Opcode::SkipIf), 0);
        assert_eq!(count_ops(&out, Opcode::Skip), 0);
        assert_eq!(count_ops(&out, Opcode::Move), 1);

        // The one remaining move carries Cast(Int(-32), Imm(42)).
        let mv = out.nodes().find(|n| n.op == Opcode::Move).unwrap();
        let cast = out.node_at(mv.arg(1));
        assert_eq!(cast.op, Opcode::Cast);
        assert_eq!(out.const_value(cast.arg(1)), Some(42));
    }

    #[test]
    fn loop_carried_assignment_survives() {
        // acc := 2; i := 0; loop { if i >= 8 break; acc := acc*2; i := i+1 }
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[]);
        let f = code.enter(ft);
        let acc = code.temp(i64t);
        let i = code.temp(i64t);
        let two = code.imm(2);
        let zero = code.imm(0);
        code.mov(acc, two);
        code.mov(i, zero);
        let lp = code.forever();
        let eight = code.imm(8);
        let done = code.gte(i, eight);
        let s = code.skip_if(done);
        let doubled = code.mul(acc, two);
        code.mov(acc, doubled);
        let one = code.imm(1);
        let next = code.add(i, one);
        code.mov(i, next);
        code.repeat(lp);
        code.here(s);
        let rv = code.rval(f);
        code.mov(rv, acc);
        code.exit(f);

        let out = simplify(&code, 4);
        // The increment of `i` is only read earlier in the loop body, via
        // the back-edge; it must not be treated as dead.
        assert_eq!(count_ops(&out, Opcode::Move), 5);
        assert_eq!(count_ops(&out, Opcode::Forever), 1);
        assert_eq!(count_ops(&out, Opcode::Repeat), 1);
    }

    #[test]
    fn signed_and_unsigned_division_fold_differently() {
        // Division only folds when the operand type is known; tie the
        // operands to a type through a cast.
        let mut code = Code::new();
        let s64 = code.int(-64);
        let u64t = code.int(64);
        let a = code.imm(-8);
        let sa = code.cast(s64, a);
        let two = code.imm(2);
        let sq = code.div(sa, two);
        let ua = code.cast(u64t, a);
        let uq = code.div(ua, two);
        let rv_ty = code.fun(0, s64, &[]);
        let f = code.enter(rv_ty);
        let rv = code.rval(f);
        let sum = code.add(sq, uq);
        code.mov(rv, sum);
        code.exit(f);

        let out = simplify(&code, 4);
        let imms: FxHashSet<Word> = out
            .nodes()
            .filter(|n| n.op == Opcode::Imm)
            .map(|n| n.arg(0))
            .collect();
        // -8/2 signed is -4; (-8 as u64)/2 is 2^63 - 4; their wrapped sum.
        let expected = (-4i64).wrapping_add(((-8i64 as u64) / 2) as i64);
        assert!(imms.contains(&expected), "{:?}", imms);
    }
}
