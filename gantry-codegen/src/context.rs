//! Compilation context and main entry point.
//!
//! The context carries the pipeline's two behavioural knobs, the iteration
//! bounds of the simplifier and the register allocator, and runs a code
//! object through the full lowering sequence: simplify, structurize when
//! the input is in goto form, legalize the calling convention, lower to
//! register-transfer form, allocate registers, and emit machine code.

use crate::abi;
use crate::binemit::CodeBlob;
use crate::ir::Code;
use crate::isa::TargetIsa;
use crate::lower;
use crate::regalloc;
use crate::result::CodegenResult;
use crate::simplify::simplify;
use crate::structurize::{is_goto_form, structurize};
use log::debug;

/// Pipeline driver.
///
/// A context is cheap and reusable; it holds no state between compilations
/// beyond its configuration.
pub struct Context {
    /// Upper bound on simplifier rounds.
    pub simplify_iterations: usize,
    /// Upper bound on register-allocator analysis rounds. One round
    /// suffices for straight-line code; loops want at least two.
    pub regalloc_iterations: usize,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A context with the default iteration bounds.
    pub fn new() -> Self {
        Self {
            simplify_iterations: 4,
            regalloc_iterations: 2,
        }
    }

    /// Compile `code` for `isa`, producing a machine-code blob.
    pub fn compile(&self, code: &Code, isa: &dyn TargetIsa) -> CodegenResult<CodeBlob> {
        debug!("compile: {} byte input", code.byte_len());
        let simplified = simplify(code, self.simplify_iterations);
        let structured = if is_goto_form(&simplified) {
            structurize(&simplified)?
        } else {
            simplified
        };
        let framed = abi::legalize_calls(&structured, isa)?;
        let lowered = lower::lower(&framed, isa)?;
        let allocated = regalloc::run(&lowered, isa, self.regalloc_iterations)?;
        let blob = isa.emit(&allocated)?;
        debug!(
            "compile: {} bytes of text, {} of data",
            blob.text.len(),
            blob.data.len()
        );
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa;

    #[test]
    fn full_pipeline_produces_machine_code() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[]);
        let f = code.enter(ft);
        let rv = code.rval(f);
        let v = code.imm(42);
        code.mov(rv, v);
        code.exit(f);

        let isa = isa::lookup("x86_64").unwrap();
        let blob = Context::new().compile(&code, isa).unwrap();
        // push rbp; mov rbp, rsp ... leave; ret
        assert_eq!(&blob.text[..4], &[0x55, 0x48, 0x89, 0xe5]);
        assert_eq!(&blob.text[blob.text.len() - 2..], &[0xc9, 0xc3]);
    }

    #[test]
    fn goto_form_is_structurized_on_the_way_through() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[i64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let t = code.temp(i64t);
        let zero = code.imm(0);
        code.mov(t, zero);
        let l = code.label();
        let c = code.lt(a0, zero);
        code.branch(l, c);
        let one = code.imm(1);
        code.mov(t, one);
        code.mark(l);
        let rv = code.rval(f);
        code.mov(rv, t);
        code.exit(f);

        let isa = isa::lookup("x86_64").unwrap();
        assert!(Context::new().compile(&code, isa).is_ok());
    }
}
