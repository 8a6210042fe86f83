//! The variable-to-register map the allocator carries through a pass.
//!
//! A `RegMap` holds a bounded number of bindings in insertion order, so the
//! oldest binding is the first spill candidate. Compacted snapshots of the
//! map are attached to control-flow edges; reconciling two maps produces
//! the move/fill/drop set needed to transform one into the other.

use crate::buffer::{Pos, Word};
use crate::isa::RegFile;
use smallvec::SmallVec;

/// One binding: a variable held in a register.
///
/// Pinned bindings are never chosen as eviction victims: values requested
/// in a specific register by the calling convention, and values with no
/// memory home to refill from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    /// The storage or expression node whose value is held.
    pub var: Pos,
    /// The unit holding it.
    pub reg: Word,
    /// Exempt from eviction.
    pub pinned: bool,
}

/// A compacted, fixed-size snapshot of a regmap, stored at control-flow
/// edges.
pub type CompactMap = SmallVec<[Slot; 8]>;

/// The changes that transform one register state into another.
#[derive(Default, Debug)]
pub struct EdgeChanges {
    /// Register permutation: each `(from, to)` pair relocates a value.
    pub moves: Vec<(Word, Word)>,
    /// Bindings to load from their homes.
    pub fills: Vec<Slot>,
    /// Bindings present only in the source state; dropping them is free
    /// since homes are kept current.
    pub drops: Vec<Slot>,
}

/// Insertion-ordered bounded map from variables to register units.
#[derive(Clone, Default)]
pub struct RegMap {
    slots: Vec<Slot>,
    limit: usize,
}

impl RegMap {
    /// An empty map holding at most `limit` bindings.
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Is the map empty?
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Is the map at capacity?
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.limit
    }

    /// The register holding `var`, if any.
    pub fn lookup(&self, var: Pos) -> Option<Word> {
        self.slots.iter().find(|s| s.var == var).map(|s| s.reg)
    }

    /// The variable held in `reg`, if any.
    pub fn var_at(&self, reg: Word) -> Option<Pos> {
        self.slots.iter().find(|s| s.reg == reg).map(|s| s.var)
    }

    /// Bind `var` to `reg` as the newest entry.
    pub fn add(&mut self, var: Pos, reg: Word, pinned: bool) {
        debug_assert!(!self.is_full(), "regmap over capacity");
        debug_assert!(self.lookup(var).is_none(), "{} already bound", var);
        debug_assert!(self.var_at(reg).is_none(), "unit {} already bound", reg);
        self.slots.push(Slot { var, reg, pinned });
    }

    /// Remove the binding for `var`, returning its register.
    pub fn drop_var(&mut self, var: Pos) -> Option<Word> {
        let at = self.slots.iter().position(|s| s.var == var)?;
        Some(self.slots.remove(at).reg)
    }

    /// Change the register of an existing binding, keeping its age.
    pub fn relocate(&mut self, var: Pos, reg: Word) {
        debug_assert!(self.var_at(reg).is_none(), "unit {} already bound", reg);
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.var == var)
            .expect("relocating an unbound variable");
        slot.reg = reg;
    }

    /// The oldest unpinned binding whose register satisfies `compatible`.
    pub fn oldest_compatible<F: Fn(Word) -> bool>(&self, compatible: F) -> Option<Slot> {
        self.slots
            .iter()
            .find(|s| !s.pinned && compatible(s.reg))
            .copied()
    }

    /// Iterate over the bindings, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Drop every binding.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Serialise to a fixed-size record.
    pub fn compact(&self) -> CompactMap {
        self.slots.iter().copied().collect()
    }

    /// Replace the contents with a snapshot.
    pub fn restore(&mut self, snapshot: &CompactMap) {
        self.slots.clear();
        self.slots.extend_from_slice(snapshot);
    }

    /// Keep only bindings that `other` agrees with: same variable in the
    /// same register. This is the join of two incoming paths; everything
    /// else must come from its home.
    pub fn meet(&mut self, other: &CompactMap) {
        self.slots
            .retain(|s| other.iter().any(|o| o.var == s.var && o.reg == s.reg));
    }

    /// Merge `other` into this map, keeping existing entries and appending
    /// the newcomers oldest-first, capacity and conflicts permitting.
    pub fn combine(&mut self, other: &CompactMap) {
        for slot in other {
            if self.is_full() {
                break;
            }
            if self.lookup(slot.var).is_none() && self.var_at(slot.reg).is_none() {
                self.slots.push(*slot);
            }
        }
    }

    /// The move/fill/drop set that turns this map's state into `target`.
    pub fn change_from(&self, target: &CompactMap) -> EdgeChanges {
        let mut changes = EdgeChanges::default();
        for slot in &self.slots {
            match target.iter().find(|t| t.var == slot.var) {
                None => changes.drops.push(*slot),
                Some(t) if t.reg != slot.reg => changes.moves.push((slot.reg, t.reg)),
                Some(_) => {}
            }
        }
        for t in target {
            if self.lookup(t.var).is_none() {
                changes.fills.push(*t);
            }
        }
        changes
    }

    /// Imprint this map onto a register file: exactly the held units are
    /// busy.
    pub fn assign(&self, file: &mut RegFile) {
        file.reset();
        for slot in &self.slots {
            file.take(slot.reg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x86::registers as x86;
    use crate::isa::RegFile;

    #[test]
    fn insertion_order_drives_eviction() {
        let mut map = RegMap::new(4);
        map.add(100, x86::RU_RAX, false);
        map.add(200, x86::RU_RCX, true);
        map.add(300, x86::RU_RDX, false);
        // The oldest unpinned binding wins.
        let victim = map.oldest_compatible(|_| true).unwrap();
        assert_eq!(victim.var, 100);
        map.drop_var(100);
        let victim = map.oldest_compatible(|_| true).unwrap();
        assert_eq!(victim.var, 300, "pinned slots are skipped");
    }

    #[test]
    fn relocate_keeps_age() {
        let mut map = RegMap::new(4);
        map.add(100, x86::RU_RAX, false);
        map.add(200, x86::RU_RCX, false);
        map.relocate(100, x86::RU_RDX);
        assert_eq!(map.lookup(100), Some(x86::RU_RDX));
        assert_eq!(map.oldest_compatible(|_| true).unwrap().var, 100);
    }

    #[test]
    fn meet_keeps_agreements_only() {
        let mut map = RegMap::new(4);
        map.add(100, x86::RU_RAX, false);
        map.add(200, x86::RU_RCX, false);
        let mut other = RegMap::new(4);
        other.add(100, x86::RU_RAX, false);
        other.add(200, x86::RU_RDX, false);
        map.meet(&other.compact());
        assert_eq!(map.lookup(100), Some(x86::RU_RAX));
        assert_eq!(map.lookup(200), None);
    }

    #[test]
    fn change_from_classifies_deltas() {
        let mut current = RegMap::new(4);
        current.add(100, x86::RU_RAX, false);
        current.add(200, x86::RU_RCX, false);
        current.add(300, x86::RU_RDX, false);
        let mut target = RegMap::new(4);
        target.add(100, x86::RU_RAX, false);
        target.add(200, x86::RU_RSI, false);
        target.add(400, x86::RU_RDI, false);
        let changes = current.change_from(&target.compact());
        assert_eq!(changes.moves, vec![(x86::RU_RCX, x86::RU_RSI)]);
        assert_eq!(changes.fills.len(), 1);
        assert_eq!(changes.fills[0].var, 400);
        assert_eq!(changes.drops.len(), 1);
        assert_eq!(changes.drops[0].var, 300);
    }

    #[test]
    fn assign_imprints_exactly_the_held_units() {
        let mut map = RegMap::new(4);
        map.add(100, x86::RU_RAX, false);
        map.add(200, x86::RU_R9, false);
        let mut file = RegFile::new(&x86::INFO);
        map.assign(&mut file);
        assert!(!file.is_free(x86::RU_RAX));
        assert!(!file.is_free(x86::RU_R9));
        assert!(file.is_free(x86::RU_RCX));
    }
}
