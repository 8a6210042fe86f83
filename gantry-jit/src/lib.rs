//! A JIT harness for gantry-generated code.
//!
//! This crate owns the two pieces the code generator treats as external
//! collaborators: the executable-memory wrapper ([`ExecSeg`]) and the
//! generic callable handle ([`Callable`]). The one-call entry point
//! [`compile_fn`] takes a code object from IR to a callable function
//! pointer: compile through `gantry-codegen`, install the blob into an
//! executable segment, patch relocations, and hand back a handle that
//! shares ownership of the pages.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]

mod memory;

pub use crate::memory::ExecSeg;
pub use gantry_codegen::{CodegenError, Context};

use gantry_codegen::ir::Code;
use gantry_codegen::isa;
use log::debug;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::rc::Rc;

/// Errors surfaced while turning IR into a callable.
#[derive(Debug)]
pub enum JitError {
    /// The code generator rejected the input.
    Codegen(CodegenError),
    /// Executable memory was unavailable: allocation or the protection
    /// flip failed.
    Memory(String),
}

impl fmt::Display for JitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Codegen(e) => write!(f, "compilation failed: {}", e),
            Self::Memory(msg) => write!(f, "executable memory unavailable: {}", msg),
        }
    }
}

impl std::error::Error for JitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codegen(e) => Some(e),
            Self::Memory(_) => None,
        }
    }
}

impl From<CodegenError> for JitError {
    fn from(e: CodegenError) -> Self {
        Self::Codegen(e)
    }
}

/// A callable handle over generated code.
///
/// The handle is parameterised by an `extern "C"` function-pointer type and
/// shares ownership of the executable segment; the pages stay mapped for as
/// long as any handle or the segment itself is held.
pub struct Callable<F> {
    func: F,
    _seg: Rc<ExecSeg>,
}

impl<F: Copy> Callable<F> {
    /// The raw function pointer. It is only valid while this handle (or
    /// another owner of the segment) is alive.
    pub fn raw(&self) -> F {
        self.func
    }
}

impl<F> Deref for Callable<F> {
    type Target = F;

    fn deref(&self) -> &F {
        &self.func
    }
}

/// Compile `code` for the host and return a callable handle.
///
/// # Safety
///
/// `F` must be an `extern "C"` function-pointer type whose signature
/// matches the function type the IR's `Enter` frame declares; calling
/// through a mismatched signature is undefined behaviour.
pub unsafe fn compile_fn<F: Copy>(code: &Code, ctx: &Context) -> Result<Callable<F>, JitError> {
    assert_eq!(
        mem::size_of::<F>(),
        mem::size_of::<*const u8>(),
        "Callable is parameterised by a function-pointer type"
    );
    let isa = isa::host()?;
    let blob = ctx.compile(code, isa)?;
    debug!(
        "installing {} text bytes, {} data bytes, {} relocs",
        blob.text.len(),
        blob.data.len(),
        blob.relocs.len()
    );
    let text_len = blob.text.len();
    let seg = ExecSeg::new(&blob.text, &blob.data, blob.bss, |text, data, bss| {
        let slice = unsafe { std::slice::from_raw_parts_mut(text, text_len) };
        blob.apply_relocs(slice, data as u64, bss as u64);
    })?;
    let ptr = seg.text_ptr();
    let func = mem::transmute_copy::<*const u8, F>(&ptr);
    Ok(Callable { func, _seg: seg })
}
