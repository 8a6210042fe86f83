//! Register allocation.
//!
//! The allocator is local and iterative: a reverse pass propagates register
//! demand from uses back toward definitions and seeds the loop-header edge
//! maps, a forward pass assigns units to every `Reg` request and refines
//! the edge maps, and a final generation pass runs the same forward logic
//! with emission enabled, producing the output code object. The forward
//! pass runs a caller-supplied number of iterations, feeding each round's
//! choices to the next as hints; one round converges for programs without
//! back-edges, loops want at least two.
//!
//! Spills are written through: every register write to a storage node is
//! followed by a store to its frame home, so register bindings are always
//! clean copies. Dropping a binding at a merge is therefore free, and edge
//! reconciliation reduces to a register permutation (`RMove`/`RSwap` via
//! the target's cycle decomposition) plus fills. Reconciliation consists
//! solely of moves and exchanges, which leave the flags untouched, so it is
//! safe to place immediately before a conditional skip whose compare is
//! fused at the branch site.

pub mod regmap;

pub use self::regmap::{CompactMap, EdgeChanges, RegMap, Slot};

use crate::buffer::{Pos, Word};
use crate::ir::{Code, Node, Opcode};
use crate::isa::{RegFile, TargetIsa};
use crate::remap::Remap;
use crate::result::{CodegenError, CodegenResult};
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

/// Allocate registers for `code`, iterating the analysis `iterations`
/// times, and return the rewritten code object.
pub fn run(code: &Code, isa: &dyn TargetIsa, iterations: usize) -> CodegenResult<Code> {
    let control = ControlInfo::compute(code)?;

    let mut hints: FxHashMap<Pos, Word> = FxHashMap::default();
    let mut edges: FxHashMap<Pos, CompactMap> = FxHashMap::default();

    let rev = RevPass::run(code, isa, &control);
    debug!("regalloc: reverse pass hinted {} sites", rev.hints.len());
    hints.extend(rev.hints);
    edges.extend(rev.seeds);

    for round in 0..iterations.max(1) {
        let mut fwd = FwdPass::new(code, isa, &hints, &mut edges, false);
        fwd.run()?;
        let FwdPass { reads, writes, .. } = fwd;
        debug!(
            "regalloc: round {} placed {} reads, {} writes",
            round,
            reads.len(),
            writes.len()
        );
        hints.extend(reads);
        hints.extend(writes);
    }

    let mut gen = FwdPass::new(code, isa, &hints, &mut edges, true);
    gen.run()?;
    let FwdPass { out, .. } = gen;
    Ok(out.expect("generation pass output").dst)
}

/// Loop bracketing facts gathered before allocation.
struct ControlInfo {
    /// Loop nesting depth at each control node.
    depth: FxHashMap<Pos, u32>,
}

impl ControlInfo {
    fn compute(code: &Code) -> CodegenResult<Self> {
        // A loop spans its header to its last back-edge. A loop may have
        // several back-edges, and a header may have none at all when the
        // simplifier removed an unreachable back-edge; both are tolerated.
        let mut seen: FxHashSet<Pos> = FxHashSet::default();
        let mut last_repeat: FxHashMap<Pos, Pos> = FxHashMap::default();
        let mut control: Vec<Pos> = Vec::new();
        for node in code.nodes() {
            match node.op {
                Opcode::Label | Opcode::Mark | Opcode::Jump | Opcode::Branch => {
                    return Err(CodegenError::MalformedIr(
                        "goto-form control reached the register allocator".to_string(),
                    ));
                }
                Opcode::Forever => {
                    seen.insert(node.pos);
                    control.push(node.pos);
                }
                Opcode::Repeat => {
                    let header = node.arg(0);
                    if !seen.contains(&header) {
                        return Err(CodegenError::MalformedIr(
                            "back-edge before its loop header".to_string(),
                        ));
                    }
                    last_repeat.insert(header, node.pos);
                    control.push(node.pos);
                }
                Opcode::Skip | Opcode::SkipIf | Opcode::Here => {
                    control.push(node.pos);
                }
                _ => {}
            }
        }
        let mut depth = FxHashMap::default();
        for pos in control {
            let d = last_repeat
                .iter()
                .filter(|(&start, &end)| start <= pos && pos <= end)
                .count() as u32;
            depth.insert(pos, d);
        }
        Ok(Self { depth })
    }

    fn depth_at(&self, pos: Pos) -> u32 {
        self.depth.get(&pos).copied().unwrap_or(0)
    }
}

/// Reverse demand pass: walks uses back to definitions, hinting a register
/// per `Reg` site and seeding the loop-header edge maps with the loop's
/// live-out demand.
struct RevPass {
    hints: FxHashMap<Pos, Word>,
    seeds: FxHashMap<Pos, CompactMap>,
}

impl RevPass {
    fn run(code: &Code, isa: &dyn TargetIsa, control: &ControlInfo) -> Self {
        let mut file = isa.new_reg_file();
        let mut map = RegMap::new(file.max_live());
        let mut hints = FxHashMap::default();
        let mut seeds = FxHashMap::default();
        let mut here_state: FxHashMap<Pos, CompactMap> = FxHashMap::default();
        let mut write_sites: FxHashSet<Pos> = FxHashSet::default();

        for node in code.nodes().rev() {
            match node.op {
                Opcode::Move => {
                    let dst = node.arg(0);
                    if code.node_at(dst).op == Opcode::Reg {
                        write_sites.insert(dst);
                    }
                }
                Opcode::Reg => {
                    let var = node.arg(0);
                    if !code.is_storage(var) {
                        continue;
                    }
                    let id = node.arg(1);
                    if write_sites.remove(&node.pos) {
                        // Definition point: the demand ends here.
                        if let Some(reg) = map.drop_var(var) {
                            hints.insert(node.pos, reg);
                            file.forget(reg);
                        } else {
                            let reg = file.find_free(id);
                            if reg != 0 {
                                hints.insert(node.pos, reg);
                            }
                        }
                    } else if let Some(reg) = Self::demand(&mut map, &mut file, var, id) {
                        hints.insert(node.pos, reg);
                    }
                }
                Opcode::Forever => {
                    // Walking in reverse, the header is reached after the
                    // whole body: the map now holds the loop's live-in
                    // demand, which seeds the header's edge map.
                    seeds.insert(node.pos, map.compact());
                }
                Opcode::Here => {
                    here_state.insert(node.arg(0), map.compact());
                }
                Opcode::Skip | Opcode::SkipIf => {
                    if let Some(state) = here_state.get(&node.pos) {
                        if control.depth_at(node.pos) > 0 {
                            map.combine(state);
                        } else {
                            map.restore(state);
                        }
                        map.assign(&mut file);
                    }
                }
                Opcode::Invoke => {
                    map.clear();
                    file.reset();
                }
                _ => {}
            }
        }
        Self { hints, seeds }
    }

    /// Bind `var` for a use seen in reverse, evicting the oldest binding
    /// when necessary. Hints are best-effort; exhaustion just skips one.
    fn demand(map: &mut RegMap, file: &mut RegFile, var: Pos, id: Word) -> Option<Word> {
        if let Some(reg) = map.lookup(var) {
            if file.is_perfect(id, reg) {
                return Some(reg);
            }
            let better = file.get_free(id);
            if better != 0 {
                map.relocate(var, better);
                file.forget(reg);
                return Some(better);
            }
            return Some(reg);
        }
        if map.is_full() {
            let victim = map.oldest_compatible(|_| true)?;
            map.drop_var(victim.var);
            file.forget(victim.reg);
        }
        let reg = file.get_free(id);
        if reg == 0 {
            let victim = map.oldest_compatible(|r| file.is_perfect(id, r))?;
            map.drop_var(victim.var);
            file.forget(victim.reg);
            let reg = file.get_free(id);
            if reg == 0 {
                return None;
            }
            map.add(var, reg, false);
            return Some(reg);
        }
        map.add(var, reg, false);
        Some(reg)
    }
}

/// Output state of the generation pass.
struct GenOut {
    dst: Code,
    remap: Remap,
}

/// The forward pass: assigns a unit to every `Reg` request in program
/// order and maintains the edge maps. With `emit` set it also produces the
/// rewritten code object, including fills, write-through spills and edge
/// reconciliation.
struct FwdPass<'a> {
    code: &'a Code,
    hints: &'a FxHashMap<Pos, Word>,
    edges: &'a mut FxHashMap<Pos, CompactMap>,
    file: RegFile,
    map: RegMap,
    reads: FxHashMap<Pos, Word>,
    writes: FxHashMap<Pos, Word>,
    transient: Vec<Pos>,
    /// Units holding operands of the root currently being walked; their
    /// fills precede the root, so eviction within the same root would
    /// clobber a value before its use.
    locked: FxHashSet<Word>,
    flow_dead: bool,
    out: Option<GenOut>,
}

impl<'a> FwdPass<'a> {
    fn new(
        code: &'a Code,
        isa: &dyn TargetIsa,
        hints: &'a FxHashMap<Pos, Word>,
        edges: &'a mut FxHashMap<Pos, CompactMap>,
        emit: bool,
    ) -> Self {
        let file = isa.new_reg_file();
        let limit = file.max_live();
        Self {
            code,
            hints,
            edges,
            file,
            map: RegMap::new(limit),
            reads: FxHashMap::default(),
            writes: FxHashMap::default(),
            transient: Vec::new(),
            locked: FxHashSet::default(),
            flow_dead: false,
            out: if emit {
                Some(GenOut {
                    dst: Code::new(),
                    remap: Remap::new(),
                })
            } else {
                None
            },
        }
    }

    fn run(&mut self) -> CodegenResult<()> {
        let nodes: Vec<Node> = self.code.nodes().collect();
        for node in &nodes {
            match node.op {
                Opcode::Move => self.root_move(node)?,
                Opcode::St | Opcode::Invoke => {
                    for a in node.node_args() {
                        self.walk_value(a)?;
                    }
                    self.copy_roots_tree(node)?;
                    self.copy_node(node);
                    self.release_transients();
                    if node.op == Opcode::Invoke {
                        // Calls clobber every allocatable register; the
                        // bindings are clean, so dropping them all is
                        // sound.
                        self.map.clear();
                        self.file.reset();
                    }
                }
                Opcode::SkipIf => {
                    self.walk_value(node.arg(0))?;
                    self.copy_roots_tree(node)?;
                    self.copy_node(node);
                    self.release_transients();
                    self.edges.insert(node.pos, self.map.compact());
                }
                Opcode::Skip => {
                    self.copy_node(node);
                    self.edges.insert(node.pos, self.map.compact());
                    self.flow_dead = true;
                }
                Opcode::Here => {
                    let incoming = self.edges.get(&node.arg(0)).cloned().unwrap_or_default();
                    if self.flow_dead {
                        self.map.restore(&incoming);
                        self.flow_dead = false;
                    } else {
                        self.map.meet(&incoming);
                    }
                    self.map.assign(&mut self.file);
                    self.copy_node(node);
                }
                Opcode::Forever => {
                    match self.edges.get(&node.pos).cloned() {
                        Some(target) => self.reconcile(&target)?,
                        None => {
                            let snapshot = self.map.compact();
                            self.edges.insert(node.pos, snapshot);
                        }
                    }
                    self.flow_dead = false;
                    self.copy_node(node);
                }
                Opcode::Repeat => {
                    let target = self.edges.get(&node.arg(0)).cloned().ok_or_else(|| {
                        CodegenError::MalformedIr("back-edge before its loop header".to_string())
                    })?;
                    self.reconcile(&target)?;
                    self.copy_node(node);
                    self.flow_dead = true;
                }
                Opcode::Enter | Opcode::Exit => self.copy_node(node),
                // Storage declarations and types are copied in place; value
                // nodes wait until a root pulls them in, so their `Reg`
                // wrappers carry decided units by the time they are copied.
                Opcode::Int | Opcode::Ptr | Opcode::Fun | Opcode::Temp | Opcode::Arg
                | Opcode::RVal => self.copy_node(node),
                _ => {}
            }
        }
        Ok(())
    }

    fn root_move(&mut self, node: &Node) -> CodegenResult<()> {
        let dst_pos = node.arg(0);
        let dst = self.code.node_at(dst_pos);
        self.walk_value(node.arg(1))?;

        let mut spill = None;
        if dst.op == Opcode::Reg {
            let var = dst.arg(0);
            let unit = self.write_alloc(dst_pos, var, dst.arg(1))?;
            if self.code.is_storage(var) {
                spill = Some((var, unit));
            }
        }

        self.copy_roots_tree(node)?;
        self.copy_node(node);
        if let (Some((var, unit)), Some(out)) = (spill, self.out.as_mut()) {
            // Write through to the home so the register stays a clean copy.
            let var_new = out.remap.get(var);
            let wrapper = out.dst.reg(var_new, unit);
            out.dst.mov(var_new, wrapper);
        }
        self.release_transients();
        Ok(())
    }

    /// Allocate registers for every `Reg` request reachable from a value
    /// operand, in evaluation order.
    fn walk_value(&mut self, pos: Pos) -> CodegenResult<()> {
        let node = self.code.node_at(pos);
        match node.op {
            Opcode::Reg => {
                let var = node.arg(0);
                let id = node.arg(1);
                if self.code.node_at(var).op.is_pure() {
                    self.walk_children(var)?;
                    self.read_alloc_expr(pos, var, id)?;
                } else {
                    self.read_alloc(pos, var, id)?;
                }
                Ok(())
            }
            op if op.is_pure() || op == Opcode::Ld => self.walk_children(pos),
            _ => Ok(()),
        }
    }

    fn walk_children(&mut self, pos: Pos) -> CodegenResult<()> {
        let node = self.code.node_at(pos);
        for (i, &a) in node.args.iter().enumerate() {
            if !node.op.arg_is_node(i) {
                continue;
            }
            if matches!(node.op, Opcode::Cast | Opcode::Conv) && i == 0 {
                continue;
            }
            self.walk_value(a)?;
        }
        Ok(())
    }

    /// A register for a read of `var`.
    ///
    /// Selection policy: keep a perfect existing binding; otherwise prefer
    /// the hinted unit, then any free unit of the class, then the unit
    /// under the oldest compatible binding. Storage reads that were not in
    /// a register get a fill from their home; a read requesting a specific
    /// unit is a location assertion (the calling convention put the value
    /// there) and never fills.
    fn read_alloc(&mut self, wrapper: Pos, var: Pos, id: Word) -> CodegenResult<Word> {
        let storage = self.code.is_storage(var);
        if let Some(current) = self.map.lookup(var) {
            if self.file.is_perfect(id, current) {
                self.locked.insert(current);
                self.reads.insert(wrapper, current);
                return Ok(current);
            }
            let target = self.pick_unit(wrapper, id)?;
            self.free_unit(target)?;
            if let Some(out) = self.out.as_mut() {
                out.dst.rmove(target, current);
            }
            self.map.relocate(var, target);
            self.file.forget(current);
            self.file.take(target);
            self.locked.insert(target);
            self.reads.insert(wrapper, target);
            return Ok(target);
        }
        if !storage && id < 0 {
            return Err(CodegenError::MalformedIr(format!(
                "value at {} is in no register and has no home",
                var
            )));
        }
        let target = self.pick_unit(wrapper, id)?;
        self.free_unit(target)?;
        self.ensure_capacity()?;
        self.file.take(target);
        self.locked.insert(target);
        self.map.add(var, target, !storage);
        if storage && id < 0 {
            if let Some(out) = self.out.as_mut() {
                let var_new = out.remap.get(var);
                let w = out.dst.reg(var_new, target);
                out.dst.mov(w, var_new);
            }
        }
        self.reads.insert(wrapper, target);
        Ok(target)
    }

    /// A register for an expression computed in place at its consumer. The
    /// binding is transient: it lives until the enclosing root completes.
    fn read_alloc_expr(&mut self, wrapper: Pos, var: Pos, id: Word) -> CodegenResult<Word> {
        let target = self.pick_unit(wrapper, id)?;
        self.free_unit(target)?;
        self.ensure_capacity()?;
        self.file.take(target);
        self.locked.insert(target);
        self.map.add(var, target, true);
        self.transient.push(var);
        self.reads.insert(wrapper, target);
        Ok(target)
    }

    /// A register for a definition.
    fn write_alloc(&mut self, wrapper: Pos, var: Pos, id: Word) -> CodegenResult<Word> {
        if let Some(current) = self.map.lookup(var) {
            if self.file.is_perfect(id, current) {
                self.writes.insert(wrapper, current);
                return Ok(current);
            }
            self.map.drop_var(var);
            self.file.forget(current);
        }
        let target = self.pick_unit(wrapper, id)?;
        self.free_unit(target)?;
        self.ensure_capacity()?;
        self.file.take(target);
        let pinned = id > 0 || !self.code.is_storage(var);
        self.map.add(var, target, pinned);
        self.writes.insert(wrapper, target);
        Ok(target)
    }

    fn pick_unit(&self, wrapper: Pos, id: Word) -> CodegenResult<Word> {
        if let Some(&hint) = self.hints.get(&wrapper) {
            if self.file.is_perfect(id, hint) && self.file.is_free(hint) {
                return Ok(hint);
            }
        }
        if id > 0 {
            if self.file.is_reserved(id) {
                return Err(CodegenError::Unsupported(format!(
                    "request for reserved register {}",
                    self.file.info().display_unit(id)
                )));
            }
            return Ok(id);
        }
        let free = self.file.find_free(id);
        if free != 0 {
            return Ok(free);
        }
        let file = &self.file;
        let locked = &self.locked;
        match self
            .map
            .oldest_compatible(|reg| file.is_perfect(id, reg) && !locked.contains(&reg))
        {
            Some(victim) => Ok(victim.reg),
            None => Err(CodegenError::ImplLimitExceeded),
        }
    }

    /// Make `unit` free, dropping whatever clean binding holds it.
    fn free_unit(&mut self, unit: Word) -> CodegenResult<()> {
        if self.file.is_free(unit) {
            return Ok(());
        }
        match self.map.var_at(unit) {
            Some(holder) => {
                self.map.drop_var(holder);
                self.file.forget(unit);
                Ok(())
            }
            None => Err(CodegenError::ImplLimitExceeded),
        }
    }

    fn ensure_capacity(&mut self) -> CodegenResult<()> {
        if !self.map.is_full() {
            return Ok(());
        }
        let locked = &self.locked;
        match self.map.oldest_compatible(|reg| !locked.contains(&reg)) {
            Some(victim) => {
                self.map.drop_var(victim.var);
                self.file.forget(victim.reg);
                Ok(())
            }
            None => Err(CodegenError::ImplLimitExceeded),
        }
    }

    fn release_transients(&mut self) {
        while let Some(var) = self.transient.pop() {
            if let Some(reg) = self.map.drop_var(var) {
                self.file.forget(reg);
            }
        }
        self.locked.clear();
    }

    /// Transform the current register state into `target`, emitting the
    /// permutation and fills in generation mode. Entries that can neither
    /// be filled from a home nor are already in place are dropped from the
    /// target.
    fn reconcile(&mut self, target: &CompactMap) -> CodegenResult<()> {
        let target: CompactMap = target
            .iter()
            .filter(|slot| {
                self.code.is_storage(slot.var) || self.map.lookup(slot.var) == Some(slot.reg)
            })
            .copied()
            .collect();
        if self.flow_dead {
            self.map.restore(&target);
            self.map.assign(&mut self.file);
            return Ok(());
        }
        let changes = self.map.change_from(&target);
        if let Some(out) = self.out.as_mut() {
            self.file.remap(&mut out.dst, &changes.moves);
            for fill in &changes.fills {
                let var_new = out.remap.get(fill.var);
                let w = out.dst.reg(var_new, fill.reg);
                out.dst.mov(w, var_new);
            }
        }
        self.map.restore(&target);
        self.map.assign(&mut self.file);
        Ok(())
    }

    /// Copy one node through the remapper (generation mode only).
    fn copy_node(&mut self, node: &Node) {
        if let Some(out) = self.out.as_mut() {
            out.remap.copy(node, &mut out.dst);
        }
    }

    /// Copy the operand trees of a root, rewriting each `Reg` wrapper with
    /// its decided unit.
    fn copy_roots_tree(&mut self, node: &Node) -> CodegenResult<()> {
        if self.out.is_none() {
            return Ok(());
        }
        for a in node.node_args().collect::<Vec<_>>() {
            self.copy_value(a)?;
        }
        Ok(())
    }

    fn copy_value(&mut self, pos: Pos) -> CodegenResult<()> {
        let already = self
            .out
            .as_ref()
            .map(|out| out.remap.try_get(pos).is_some())
            .unwrap_or(true);
        if already {
            return Ok(());
        }
        let node = self.code.node_at(pos);
        for (i, &a) in node.args.iter().enumerate() {
            if node.op.arg_is_node(i) {
                self.copy_value(a)?;
            }
        }
        let out = self.out.as_mut().expect("generation output");
        if node.op == Opcode::Reg {
            let unit = self
                .reads
                .get(&pos)
                .or_else(|| self.writes.get(&pos))
                .copied()
                .ok_or_else(|| {
                    CodegenError::MalformedIr(format!(
                        "register request at {} was never visited",
                        pos
                    ))
                })?;
            let var_new = out.remap.get(node.arg(0));
            let new = out.dst.reg(var_new, unit);
            out.remap.set(pos, new);
        } else {
            out.remap.copy(&node, &mut out.dst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi;
    use crate::isa;
    use crate::lower;

    fn pipeline(code: &Code, iterations: usize) -> Code {
        let isa = isa::lookup("x86_64").unwrap();
        let shimmed = abi::legalize_calls(code, isa).unwrap();
        let lowered = lower::lower(&shimmed, isa).unwrap();
        run(&lowered, isa, iterations).unwrap()
    }

    fn return_sum() -> Code {
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
        code
    }

    fn loop_doubler() -> Code {
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
        code
    }

    #[test]
    fn every_register_request_gets_a_physical_unit() {
        let out = pipeline(&return_sum(), 1);
        let mut wrappers = 0;
        for node in out.nodes() {
            if node.op == Opcode::Reg {
                wrappers += 1;
                let unit = node.arg(1);
                assert!(unit > 0, "unallocated request at {}", node.pos);
                let file = isa::lookup("x86_64").unwrap().new_reg_file();
                assert!(!file.is_reserved(unit), "reserved unit {} granted", unit);
            }
        }
        assert!(wrappers > 0);
    }

    #[test]
    fn straight_line_allocation_computes_the_sum() {
        let out = pipeline(&return_sum(), 1);
        assert_eq!(crate::interpret::run(&out, &[19, 23]).unwrap(), 42);
    }

    #[test]
    fn loops_converge_with_two_iterations() {
        let out = pipeline(&loop_doubler(), 2);
        assert_eq!(crate::interpret::run(&out, &[]).unwrap(), 512);
    }

    #[test]
    fn defs_write_through_to_their_homes() {
        let out = pipeline(&loop_doubler(), 2);
        // Every move into a register-wrapped storage destination is
        // followed by a spill of that register to the home slot: two
        // initializations plus two loop-body updates.
        let nodes: Vec<Node> = out.nodes().collect();
        let mut spills = 0;
        for node in &nodes {
            if node.op == Opcode::Move
                && matches!(out.node_at(node.arg(0)).op, Opcode::Temp | Opcode::Arg)
                && out.node_at(node.arg(1)).op == Opcode::Reg
            {
                spills += 1;
            }
        }
        assert!(spills >= 4, "expected write-through spills, saw {}", spills);
    }

    #[test]
    fn goto_form_is_rejected() {
        let mut code = Code::new();
        let l = code.label();
        code.mark(l);
        code.jump(l);
        let isa = isa::lookup("x86_64").unwrap();
        assert!(matches!(
            run(&code, isa, 1),
            Err(CodegenError::MalformedIr(_))
        ));
    }
}
