//! Data structures describing the registers of a target, and the dynamic
//! register file the allocator draws from.
//!
//! Register identifiers are IR words: physical register units are positive,
//! register groups (classes) are negative, and 0 means "no register". This
//! lets a `Reg` node carry either a concrete unit or a class request in the
//! same argument slot.

use crate::buffer::Word;
use crate::ir::Code;

/// A contiguous range of register units with their names.
#[derive(Clone, Copy)]
pub struct RegBank {
    /// Name of the bank.
    pub name: &'static str,
    /// First unit in the bank. Units start at 1; 0 is the null register.
    pub first_unit: Word,
    /// Number of units in the bank.
    pub units: Word,
    /// Unit names, indexed by offset from `first_unit`.
    pub names: &'static [&'static str],
}

impl RegBank {
    fn contains(&self, unit: Word) -> bool {
        unit >= self.first_unit && unit - self.first_unit < self.units
    }
}

/// Data about one register class.
///
/// A class is a named set of register units the allocator treats as
/// interchangeable for a request, identified in the IR by a negative word.
#[derive(Clone, Copy)]
pub struct RegClassData {
    /// Name of the class.
    pub name: &'static str,
    /// The negative identifier `Reg` nodes use to request this class.
    pub ident: Word,
    /// Value width in bytes for members of this class.
    pub width: u8,
    /// Bit mask of member units; bit `u` covers unit `u`.
    pub mask: u32,
}

/// A register class reference. Classes are statically defined per target.
pub type RegClass = &'static RegClassData;

impl RegClassData {
    /// Does this class contain `unit`?
    pub fn contains(&self, unit: Word) -> bool {
        (1..32).contains(&unit) && self.mask & (1 << unit) != 0
    }
}

/// Static description of one target's register file.
pub struct RegInfo {
    /// All register banks.
    pub banks: &'static [RegBank],
    /// All register classes, the widest first.
    pub classes: &'static [RegClassData],
    /// Units the allocator must never hand out: the stack and frame
    /// pointers, and the encoder's scratch register.
    pub reserved: u32,
}

impl RegInfo {
    /// Look a class up by its identifier word.
    pub fn class_by_ident(&self, ident: Word) -> Option<RegClass> {
        self.classes.iter().find(|rc| rc.ident == ident)
    }

    /// The class containing `unit`, widest first.
    pub fn class_of_unit(&self, unit: Word) -> Option<RegClass> {
        self.classes.iter().find(|rc| rc.contains(unit))
    }

    /// Display name of a unit.
    pub fn display_unit(&self, unit: Word) -> &'static str {
        for bank in self.banks {
            if bank.contains(unit) {
                let offset = (unit - bank.first_unit) as usize;
                if let Some(&name) = bank.names.get(offset) {
                    return name;
                }
            }
        }
        "%invalid"
    }

    fn allocatable(&self) -> u32 {
        let mut mask = 0;
        for rc in self.classes {
            mask |= rc.mask;
        }
        mask & !self.reserved
    }
}

/// The dynamic register file: which units are free right now.
///
/// The allocator asks it for registers by identifier (a specific unit or a
/// class), releases them with [`forget`](RegFile::forget), and has it emit
/// the move/swap sequence realising a register permutation at control-flow
/// reconciliation points.
pub struct RegFile {
    info: &'static RegInfo,
    avail: u32,
}

impl RegFile {
    /// A register file with every non-reserved unit free.
    pub fn new(info: &'static RegInfo) -> Self {
        Self {
            info,
            avail: info.allocatable(),
        }
    }

    /// The static description this file draws from.
    pub fn info(&self) -> &'static RegInfo {
        self.info
    }

    /// Maximum number of values the allocator can keep in registers at
    /// once.
    pub fn max_live(&self) -> usize {
        self.info.allocatable().count_ones() as usize
    }

    /// Mark all non-reserved units free.
    pub fn reset(&mut self) {
        self.avail = self.info.allocatable();
    }

    /// Is `unit` reserved?
    pub fn is_reserved(&self, unit: Word) -> bool {
        (1..32).contains(&unit) && self.info.reserved & (1 << unit) != 0
    }

    /// Is `unit` currently free?
    pub fn is_free(&self, unit: Word) -> bool {
        (1..32).contains(&unit) && self.avail & (1 << unit) != 0
    }

    /// Mark `unit` busy.
    pub fn take(&mut self, unit: Word) {
        debug_assert!(
            self.is_free(unit),
            "{} is not free",
            self.info.display_unit(unit)
        );
        self.avail &= !(1 << unit);
    }

    /// Release `unit`.
    pub fn forget(&mut self, unit: Word) {
        debug_assert!(
            !self.is_free(unit) && !self.is_reserved(unit),
            "{} is not allocated",
            self.info.display_unit(unit)
        );
        self.avail |= 1 << unit;
    }

    /// A free unit satisfying `ident`, without taking it; 0 if none.
    pub fn find_free(&self, ident: Word) -> Word {
        if ident > 0 {
            if self.is_free(ident) {
                ident
            } else {
                0
            }
        } else if let Some(rc) = self.info.class_by_ident(ident) {
            let masked = self.avail & rc.mask;
            if masked == 0 {
                0
            } else {
                Word::from(masked.trailing_zeros() as u16)
            }
        } else {
            0
        }
    }

    /// Allocate a specific unit or any unit of a group; 0 means none is
    /// available. Reserved units are never granted.
    pub fn get_free(&mut self, ident: Word) -> Word {
        let unit = self.find_free(ident);
        if unit != 0 {
            self.take(unit);
        }
        unit
    }

    /// As [`get_free`](RegFile::get_free), but when a specific unit is busy
    /// fall back to any free unit of the same class.
    pub fn get_compatible(&mut self, ident: Word) -> Word {
        let unit = self.get_free(ident);
        if unit != 0 || ident < 0 {
            return unit;
        }
        match self.info.class_of_unit(ident) {
            Some(rc) => self.get_free(rc.ident),
            None => 0,
        }
    }

    /// Does `unit` exactly satisfy `ident`: the same unit, or a member of
    /// the requested class with the matching width?
    pub fn is_perfect(&self, ident: Word, unit: Word) -> bool {
        if ident > 0 {
            ident == unit
        } else {
            self.info
                .class_by_ident(ident)
                .map_or(false, |rc| rc.contains(unit))
        }
    }

    /// Can `unit` hold a value requested as `ident` at all?
    pub fn is_compatible(&self, ident: Word, unit: Word) -> bool {
        if unit <= 0 {
            return false;
        }
        let requested = if ident > 0 {
            self.info.class_of_unit(ident)
        } else {
            self.info.class_by_ident(ident)
        };
        let holding = self.info.class_of_unit(unit);
        match (requested, holding) {
            // One bank per class family here, so sharing any class member
            // set makes the units interchangeable.
            (Some(a), Some(b)) => a.mask & b.mask != 0,
            _ => false,
        }
    }

    /// Emit into `gen` a minimal `RMove`/`RSwap` sequence realising the
    /// requested permutation, where each `(from, to)` pair moves the value
    /// currently in `from` into `to`.
    ///
    /// Moves whose destination is not the source of another pending pair
    /// resolve first; each remaining cycle is broken with a single swap.
    pub fn remap(&self, gen: &mut Code, mapping: &[(Word, Word)]) {
        let mut pending: Vec<(Word, Word)> =
            mapping.iter().copied().filter(|(f, t)| f != t).collect();
        while !pending.is_empty() {
            let free_dest = (0..pending.len())
                .find(|&i| !pending.iter().any(|&(f, _)| f == pending[i].1));
            match free_dest {
                Some(i) => {
                    let (from, to) = pending.remove(i);
                    gen.rmove(to, from);
                }
                None => {
                    let (from, to) = pending.remove(0);
                    gen.rswap(from, to);
                    // The swap also moved `to`'s old value into `from`;
                    // pairs that became identities are done.
                    for p in pending.iter_mut() {
                        if p.0 == to {
                            p.0 = from;
                        }
                    }
                    pending.retain(|(f, t)| f != t);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Opcode;
    use crate::isa::x86::registers as x86;

    #[test]
    fn reserved_units_are_never_granted() {
        let mut file = RegFile::new(&x86::INFO);
        assert_eq!(file.get_free(x86::RU_RSP), 0);
        assert_eq!(file.get_free(x86::RU_RBP), 0);
        assert!(file.is_reserved(x86::RU_RSP));
        // Draining the whole class never produces a reserved unit.
        loop {
            let unit = file.get_free(x86::GROUP_QWORD);
            if unit == 0 {
                break;
            }
            assert!(!file.is_reserved(unit));
        }
    }

    #[test]
    fn take_and_forget_round_trip() {
        let mut file = RegFile::new(&x86::INFO);
        let n = file.max_live();
        let unit = file.get_free(x86::GROUP_QWORD);
        assert_ne!(unit, 0);
        assert!(!file.is_free(unit));
        file.forget(unit);
        assert!(file.is_free(unit));
        assert_eq!(file.max_live(), n);
    }

    #[test]
    fn compatible_fallback_for_busy_unit() {
        let mut file = RegFile::new(&x86::INFO);
        assert_eq!(file.get_free(x86::RU_RCX), x86::RU_RCX);
        let other = file.get_compatible(x86::RU_RCX);
        assert_ne!(other, 0);
        assert_ne!(other, x86::RU_RCX);
        assert!(file.is_compatible(x86::RU_RCX, other));
        assert!(!file.is_perfect(x86::RU_RCX, other));
        assert!(file.is_perfect(x86::GROUP_QWORD, other));
    }

    #[test]
    fn remap_moves_then_breaks_cycles() {
        let file = RegFile::new(&x86::INFO);
        let mut gen = Code::new();
        // rax -> rcx is a straight move; rbx <-> rsi is a 2-cycle.
        file.remap(
            &mut gen,
            &[
                (x86::RU_RAX, x86::RU_RCX),
                (x86::RU_RBX, x86::RU_RSI),
                (x86::RU_RSI, x86::RU_RBX),
            ],
        );
        let ops: Vec<Opcode> = gen.nodes().map(|n| n.op).collect();
        assert_eq!(ops, vec![Opcode::RMove, Opcode::RSwap]);
        let mv = gen.nodes().next().unwrap();
        assert_eq!(mv.arg(0), x86::RU_RCX);
        assert_eq!(mv.arg(1), x86::RU_RAX);
    }

    #[test]
    fn remap_three_cycle_uses_two_swaps() {
        let file = RegFile::new(&x86::INFO);
        let mut gen = Code::new();
        file.remap(
            &mut gen,
            &[
                (x86::RU_RAX, x86::RU_RCX),
                (x86::RU_RCX, x86::RU_RDX),
                (x86::RU_RDX, x86::RU_RAX),
            ],
        );
        let swaps = gen.nodes().filter(|n| n.op == Opcode::RSwap).count();
        let moves = gen.nodes().filter(|n| n.op == Opcode::RMove).count();
        assert_eq!(swaps + moves, 2);
        assert!(swaps >= 1);
    }
}
