//! Result and error types representing the outcome of compiling a function.

use std::fmt;

/// A compilation error.
///
/// When a function can not be compiled, the pipeline stage that failed
/// reports one of these. No stage retries after an error and no stage
/// swallows one: a failure invalidates the in-progress code object and is
/// reported to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// The input is not a well-formed IR stream: an out-of-range argument,
    /// an unmatched structured-control bracket, or a control-flow shape a
    /// pass cannot accept.
    MalformedIr(String),

    /// The target does not implement a specific opcode/type combination.
    ///
    /// Carries the name of the offending opcode.
    Unsupported(String),

    /// The instruction encoder was handed arguments it cannot encode, such
    /// as mismatched operand widths or an illegal immediate size.
    Encoder(String),

    /// An implementation limit was exceeded, e.g. more values live at once
    /// than the register file can describe.
    ImplLimitExceeded,
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error
/// type.
pub type CodegenResult<T> = Result<T, CodegenError>;

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MalformedIr(msg) => write!(f, "malformed IR: {}", msg),
            Self::Unsupported(what) => write!(f, "unsupported IR node: {}", what),
            Self::Encoder(msg) => write!(f, "encoder argument mismatch: {}", msg),
            Self::ImplLimitExceeded => write!(f, "implementation limit exceeded"),
        }
    }
}

impl std::error::Error for CodegenError {}
