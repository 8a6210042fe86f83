//! Executable memory segments.
//!
//! An `ExecSeg` owns page-aligned memory holding a text section, an
//! optional data section and an optional zero-initialized region. The
//! segment is filled while writable, the caller's relocation callback runs
//! with the final section base addresses, and the text range is then
//! flipped to read+execute. After the flip the contents never change.
//!
//! Segments are reference-counted through `Rc`: the issuing library and
//! every callable handle share ownership, and the pages unmap when the last
//! holder drops. Handles are single-threaded by construction.

use crate::JitError;
use std::ptr;
use std::rc::Rc;

fn page_round(len: usize) -> usize {
    let page = region::page::size();
    (len + page - 1) & !(page - 1)
}

/// A mapped segment of generated code.
pub struct ExecSeg {
    base: *mut u8,
    len: usize,
    text_pages: usize,
    data_off: usize,
    bss_off: usize,
}

impl ExecSeg {
    /// Map a segment holding `text`, `data` and `bss` zero bytes, run the
    /// relocation callback over the still-writable memory with the
    /// (text, data, bss) base addresses, and flip the text range to
    /// read+execute.
    pub fn new(
        text: &[u8],
        data: &[u8],
        bss: usize,
        reloc: impl FnOnce(*mut u8, *mut u8, *mut u8),
    ) -> Result<Rc<Self>, JitError> {
        let text_pages = page_round(text.len().max(1));
        let data_pages = page_round(data.len());
        let bss_pages = page_round(bss);
        let len = text_pages + data_pages + bss_pages;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(JitError::Memory("mmap failed".to_string()));
        }
        let base = base as *mut u8;

        let seg = Self {
            base,
            len,
            text_pages,
            data_off: text_pages,
            bss_off: text_pages + data_pages,
        };
        unsafe {
            ptr::copy_nonoverlapping(text.as_ptr(), base, text.len());
            if !data.is_empty() {
                ptr::copy_nonoverlapping(data.as_ptr(), base.add(seg.data_off), data.len());
            }
        }
        reloc(base, unsafe { base.add(seg.data_off) }, unsafe {
            base.add(seg.bss_off)
        });
        unsafe {
            region::protect(base, seg.text_pages, region::Protection::READ_EXECUTE)
                .map_err(|e| JitError::Memory(e.to_string()))?;
        }
        Ok(Rc::new(seg))
    }

    /// Entry point of the text section.
    pub fn text_ptr(&self) -> *const u8 {
        self.base
    }

    /// Base of the data section.
    pub fn data_ptr(&self) -> *const u8 {
        unsafe { self.base.add(self.data_off) }
    }
}

impl Drop for ExecSeg {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}
