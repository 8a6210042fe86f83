//! Binary machine code emission interfaces.
//!
//! The `CodeSink` trait is how encoders append bytes; the `CodeBlob` is the
//! finished product a back-end hands to the executable-memory wrapper:
//! text, optional read-only data, an optional zero-initialized region, and
//! the relocation records to patch once section base addresses are known.

use std::fmt;

/// Offset in bytes from the beginning of a section.
///
/// This library can emit for a target other than the host, so offsets use a
/// fixed-width type rather than `usize`.
pub type CodeOffset = u32;

/// Relocation kinds this back-end emits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reloc {
    /// Absolute 8-byte address.
    Abs8,
}

impl fmt::Display for Reloc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Abs8 => write!(f, "Abs8"),
        }
    }
}

/// The section a relocation resolves against.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RelocSection {
    /// The read-only data section.
    Data,
    /// The zero-initialized section.
    Bss,
}

/// One patch to apply to the text once section bases are known.
#[derive(Clone, Debug)]
pub struct RelocEntry {
    /// Where in the text the patch lands.
    pub offset: CodeOffset,
    /// Kind of patch.
    pub reloc: Reloc,
    /// Section whose base address resolves the reference.
    pub section: RelocSection,
    /// Offset from the section base.
    pub addend: i64,
}

/// Abstract interface for appending bytes to a code section.
pub trait CodeSink {
    /// Current position.
    fn offset(&self) -> CodeOffset;

    /// Add 1 byte.
    fn put1(&mut self, _: u8);

    /// Add 2 bytes.
    fn put2(&mut self, _: u16);

    /// Add 4 bytes.
    fn put4(&mut self, _: u32);

    /// Add 8 bytes.
    fn put8(&mut self, _: u64);
}

/// Sizes of the sections in a finished blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeInfo {
    /// Bytes of machine code.
    pub text_size: CodeOffset,
    /// Bytes of read-only data.
    pub data_size: CodeOffset,
    /// Bytes of zero-initialized memory.
    pub bss_size: CodeOffset,
}

impl CodeInfo {
    /// Total bytes the loaded image occupies before page rounding.
    pub fn total_size(&self) -> CodeOffset {
        self.text_size + self.data_size + self.bss_size
    }
}

/// A compiled function: sections plus relocations.
pub struct CodeBlob {
    /// Machine code, entry point at offset 0.
    pub text: Vec<u8>,
    /// Read-only data referenced by the text.
    pub data: Vec<u8>,
    /// Bytes of zero-initialized memory the code expects.
    pub bss: usize,
    /// Patches to apply before the text becomes executable.
    pub relocs: Vec<RelocEntry>,
}

impl CodeBlob {
    /// Section sizes.
    pub fn info(&self) -> CodeInfo {
        CodeInfo {
            text_size: self.text.len() as CodeOffset,
            data_size: self.data.len() as CodeOffset,
            bss_size: self.bss as CodeOffset,
        }
    }

    /// Patch every relocation in `text`, given the section base addresses
    /// chosen by the loader.
    ///
    /// # Safety-free contract
    ///
    /// `text` must be the blob's text copied to its final (writable)
    /// location; the bases are the addresses the sections will occupy when
    /// the code runs.
    pub fn apply_relocs(&self, text: &mut [u8], data_base: u64, bss_base: u64) {
        for entry in &self.relocs {
            let base = match entry.section {
                RelocSection::Data => data_base,
                RelocSection::Bss => bss_base,
            };
            let value = base.wrapping_add(entry.addend as u64);
            let at = entry.offset as usize;
            match entry.reloc {
                Reloc::Abs8 => {
                    text[at..at + 8].copy_from_slice(&value.to_le_bytes());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relocs_patch_absolute_addresses() {
        let blob = CodeBlob {
            text: vec![0; 12],
            data: vec![1, 2, 3, 4, 5, 6, 7, 8],
            bss: 16,
            relocs: vec![RelocEntry {
                offset: 2,
                reloc: Reloc::Abs8,
                section: RelocSection::Data,
                addend: 8,
            }],
        };
        let mut text = blob.text.clone();
        blob.apply_relocs(&mut text, 0x1000, 0x2000);
        assert_eq!(&text[2..10], &0x1008u64.to_le_bytes());
        assert_eq!(blob.info().total_size(), 12 + 8 + 16);
    }
}
