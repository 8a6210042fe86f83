//! Parse failures and where they happened.

use std::fmt;

/// Position of a token in the source text; lines and columns start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Line number.
    pub line: usize,
    /// Column within the line.
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The ways a parse can fail.
#[derive(Debug)]
pub enum ErrorKind {
    /// Malformed surface syntax: a stray character, an unterminated node,
    /// or a binding that does not introduce a node.
    Syntax(String),
    /// A node names an opcode the IR does not define.
    UnknownOpcode(String),
    /// An argument names a symbol with no binding in scope.
    UndefinedSymbol(String),
    /// A node carries the wrong number of arguments for its opcode.
    WrongArity {
        /// The opcode being parsed.
        opcode: &'static str,
        /// How many arguments it takes.
        expected: usize,
        /// How many the text supplied.
        found: usize,
    },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Syntax(msg) => f.write_str(msg),
            Self::UnknownOpcode(name) => write!(f, "unknown opcode '{}'", name),
            Self::UndefinedSymbol(name) => write!(f, "undefined symbol '{}'", name),
            Self::WrongArity {
                opcode,
                expected,
                found,
            } => write!(
                f,
                "{} takes {} arguments, found {}",
                opcode, expected, found
            ),
        }
    }
}

/// A parse error: what went wrong and where.
#[derive(Debug)]
pub struct ParseError {
    /// Where the offending token starts.
    pub location: Location,
    /// What went wrong.
    pub kind: ErrorKind,
}

impl ParseError {
    /// Build an error at `location`.
    pub fn new(location: Location, kind: ErrorKind) -> Self {
        Self { location, kind }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.kind)
    }
}

impl std::error::Error for ParseError {}

/// Result of a parser operation.
pub type ParseResult<T> = Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_with_their_position() {
        let err = ParseError::new(
            Location { line: 3, column: 7 },
            ErrorKind::UnknownOpcode("Frob".to_string()),
        );
        assert_eq!(err.to_string(), "3:7: unknown opcode 'Frob'");

        let err = ParseError::new(
            Location { line: 1, column: 2 },
            ErrorKind::WrongArity {
                opcode: "Add",
                expected: 2,
                found: 1,
            },
        );
        assert_eq!(err.to_string(), "1:2: Add takes 2 arguments, found 1");
    }
}
