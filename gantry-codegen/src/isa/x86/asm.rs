//! The x86-64 assembler: sections, labels and the fixed-point layout loop.
//!
//! Branch displacement widths depend on label offsets, and label offsets
//! depend on instruction lengths, so the encoder re-runs over the function
//! until the layout stops changing. Width decisions only ever widen
//! (rel8 to rel32), which bounds the number of rounds. The assembler holds
//! the per-round state: label offsets from the previous round serve as
//! estimates for forward references, and the set of widened branch sites
//! persists across rounds.

use crate::binemit::{CodeBlob, CodeOffset, CodeSink, Reloc, RelocEntry, RelocSection};
use crate::buffer::Pos;
use crate::result::{CodegenError, CodegenResult};
use rustc_hash::{FxHashMap, FxHashSet};

/// Layout state carried between rounds.
#[derive(Default)]
pub struct RoundState {
    prev_labels: FxHashMap<Pos, CodeOffset>,
    wide: FxHashSet<Pos>,
}

struct Fixup {
    patch_at: usize,
    insn_end: usize,
    wide: bool,
    site: Pos,
    target: Pos,
}

/// One assembly round over a function.
pub struct Assembler {
    text: Vec<u8>,
    data: Vec<u8>,
    bss: usize,
    relocs: Vec<RelocEntry>,
    labels: FxHashMap<Pos, CodeOffset>,
    fixups: Vec<Fixup>,
    state: RoundState,
    widened: bool,
}

impl CodeSink for Assembler {
    fn offset(&self) -> CodeOffset {
        self.text.len() as CodeOffset
    }

    fn put1(&mut self, b: u8) {
        self.text.push(b);
    }

    fn put2(&mut self, v: u16) {
        self.text.extend_from_slice(&v.to_le_bytes());
    }

    fn put4(&mut self, v: u32) {
        self.text.extend_from_slice(&v.to_le_bytes());
    }

    fn put8(&mut self, v: u64) {
        self.text.extend_from_slice(&v.to_le_bytes());
    }
}

impl Assembler {
    /// Start the first round.
    pub fn new() -> Self {
        Self::resume(RoundState::default())
    }

    /// Start a round with the layout state of the previous one.
    pub fn resume(state: RoundState) -> Self {
        Self {
            text: Vec::new(),
            data: Vec::new(),
            bss: 0,
            relocs: Vec::new(),
            labels: FxHashMap::default(),
            fixups: Vec::new(),
            state,
            widened: false,
        }
    }

    /// Bind the label `key` to the current text offset.
    pub fn bind(&mut self, key: Pos) {
        let offset = self.offset();
        self.labels.insert(key, offset);
    }

    /// Best known offset for `key`: this round if bound already, otherwise
    /// the previous round's estimate.
    fn estimate(&self, key: Pos) -> Option<CodeOffset> {
        self.labels
            .get(&key)
            .or_else(|| self.state.prev_labels.get(&key))
            .copied()
    }

    fn pick_wide(&self, site: Pos, target: Pos, short_end: usize) -> bool {
        if self.state.wide.contains(&site) {
            return true;
        }
        match self.estimate(target) {
            Some(t) => {
                let disp = i64::from(t) - short_end as i64;
                !(-128..=127).contains(&disp)
            }
            // Nothing known yet; start short and let resolution widen it.
            None => false,
        }
    }

    fn branch(&mut self, site: Pos, target: Pos, short_op: &[u8], wide_op: &[u8]) {
        let wide = self.pick_wide(site, target, self.text.len() + short_op.len() + 1);
        if wide {
            self.text.extend_from_slice(wide_op);
            let patch_at = self.text.len();
            self.put4(0);
            self.fixups.push(Fixup {
                patch_at,
                insn_end: self.text.len(),
                wide: true,
                site,
                target,
            });
        } else {
            self.text.extend_from_slice(short_op);
            let patch_at = self.text.len();
            self.put1(0);
            self.fixups.push(Fixup {
                patch_at,
                insn_end: self.text.len(),
                wide: false,
                site,
                target,
            });
        }
    }

    /// Unconditional jump to `target`; `site` identifies the branch for
    /// width tracking.
    pub fn jmp(&mut self, site: Pos, target: Pos) {
        self.branch(site, target, &[0xeb], &[0xe9]);
    }

    /// Conditional jump on the condition nibble `cc`.
    pub fn jcc(&mut self, site: Pos, cc: u8, target: Pos) {
        self.branch(site, target, &[0x70 | cc], &[0x0f, 0x80 | cc]);
    }

    /// Append constant bytes to the data section, 8-byte aligned, and
    /// return their offset.
    pub fn data_const(&mut self, bytes: &[u8]) -> CodeOffset {
        while self.data.len() % 8 != 0 {
            self.data.push(0);
        }
        let offset = self.data.len() as CodeOffset;
        self.data.extend_from_slice(bytes);
        offset
    }

    /// Reserve `len` zero-initialized bytes and return their offset.
    pub fn reserve_bss(&mut self, len: usize) -> CodeOffset {
        let offset = self.bss as CodeOffset;
        self.bss += len;
        offset
    }

    /// Record an absolute 8-byte relocation at the current text offset; the
    /// caller emits the placeholder bytes right after.
    pub fn reloc_abs8(&mut self, section: RelocSection, addend: i64) {
        let offset = self.offset();
        self.relocs.push(RelocEntry {
            offset,
            reloc: Reloc::Abs8,
            section,
            addend,
        });
    }

    /// Resolve this round. Returns the blob and the state for the next
    /// round; `stable` is true when the layout has converged and the blob
    /// is final.
    pub fn finish(mut self) -> CodegenResult<(CodeBlob, RoundState, bool)> {
        for fixup in &self.fixups {
            let target = match self.labels.get(&fixup.target) {
                Some(&t) => t,
                None => {
                    return Err(CodegenError::MalformedIr(format!(
                        "branch to unbound location {}",
                        fixup.target
                    )))
                }
            };
            let disp = i64::from(target) - fixup.insn_end as i64;
            if fixup.wide {
                let bytes = (disp as i32).to_le_bytes();
                self.text[fixup.patch_at..fixup.patch_at + 4].copy_from_slice(&bytes);
            } else if (-128..=127).contains(&disp) {
                self.text[fixup.patch_at] = disp as i8 as u8;
            } else {
                self.state.wide.insert(fixup.site);
                self.widened = true;
            }
        }
        let stable = !self.widened && self.labels == self.state.prev_labels;
        let state = RoundState {
            prev_labels: self.labels,
            wide: self.state.wide,
        };
        let blob = CodeBlob {
            text: self.text,
            data: self.data,
            bss: self.bss,
            relocs: self.relocs,
        };
        Ok((blob, state, stable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Run `emit` through rounds until the layout settles.
    fn assemble(emit: impl Fn(&mut Assembler)) -> CodeBlob {
        let mut state = RoundState::default();
        for _ in 0..32 {
            let mut asm = Assembler::resume(state);
            emit(&mut asm);
            let (blob, next, stable) = asm.finish().unwrap();
            if stable {
                return blob;
            }
            state = next;
        }
        panic!("layout did not converge");
    }

    #[test]
    fn short_backward_jump() {
        let blob = assemble(|asm| {
            asm.bind(0);
            asm.put1(0x90);
            asm.jmp(1, 0);
        });
        // nop; jmp -3
        assert_eq!(blob.text, vec![0x90, 0xeb, 0xfd]);
    }

    #[test]
    fn short_forward_jump() {
        let blob = assemble(|asm| {
            asm.jmp(0, 1);
            asm.put1(0x90);
            asm.bind(1);
            asm.put1(0xc3);
        });
        assert_eq!(blob.text, vec![0xeb, 0x01, 0x90, 0xc3]);
    }

    #[test]
    fn long_forward_jump_widens() {
        let blob = assemble(|asm| {
            asm.jmp(0, 1);
            for _ in 0..200 {
                asm.put1(0x90);
            }
            asm.bind(1);
            asm.put1(0xc3);
        });
        assert_eq!(blob.text[0], 0xe9);
        assert_eq!(&blob.text[1..5], &200i32.to_le_bytes());
        assert_eq!(blob.text.len(), 5 + 200 + 1);
    }

    #[test]
    fn unbound_label_is_malformed() {
        let mut asm = Assembler::new();
        asm.jmp(0, 99);
        assert!(matches!(
            asm.finish(),
            Err(CodegenError::MalformedIr(_))
        ));
    }

    #[test]
    fn data_is_aligned_and_relocated() {
        let blob = assemble(|asm| {
            asm.put1(0x90);
            let off = asm.data_const(&[1, 2, 3]);
            let off2 = asm.data_const(&0x55u64.to_le_bytes());
            assert_eq!(off, 0);
            assert_eq!(off2, 8);
            asm.reloc_abs8(RelocSection::Data, off2 as i64);
            asm.put8(0);
        });
        assert_eq!(blob.relocs.len(), 1);
        assert_eq!(blob.relocs[0].offset, 1);
        let mut text = blob.text.clone();
        blob.apply_relocs(&mut text, 0x4000, 0);
        assert_eq!(&text[1..9], &0x4008u64.to_le_bytes());
    }
}
