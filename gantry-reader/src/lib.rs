//! Parser for the gantry textual intermediate representation.
//!
//! The syntax is bracketed: each node is `[Name arg arg ...]`, a bare
//! numeric literal in a node-argument position is shorthand for `[Imm n]`,
//! `name: [Node ...]` binds a symbol to the node's position, and a symbol
//! in argument position expands to its bound position. Comments start with
//! `#` and run to the end of the line. Scalar argument positions (type
//! widths, immediate values, argument indices, register identifiers) take
//! numbers directly.
//!
//! The text renderer in `gantry-codegen` emits this syntax; parsing its
//! output reproduces the original code object up to position renumbering.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]

mod error;

pub use crate::error::{ErrorKind, Location, ParseError, ParseResult};

use gantry_codegen::ir::{Code, Opcode};
use gantry_codegen::{Pos, Word};
use std::collections::HashMap;
use std::str::Chars;

/// Parse a complete textual IR program into a code object.
pub fn parse_code(text: &str) -> ParseResult<Code> {
    let mut parser = Parser {
        lexer: Lexer::new(text),
        code: Code::new(),
        symbols: HashMap::new(),
    };
    parser.run()?;
    Ok(parser.code)
}

fn fail<T>(location: Location, kind: ErrorKind) -> ParseResult<T> {
    Err(ParseError::new(location, kind))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LBracket,
    RBracket,
    Colon,
    Ident(String),
    Number(Word),
}

struct Lexer<'a> {
    chars: Chars<'a>,
    lookahead: Option<char>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        let mut chars = text.chars();
        let lookahead = chars.next();
        Self {
            chars,
            lookahead,
            line: 1,
            column: 1,
        }
    }

    /// Position of the next character to be consumed.
    fn location(&self) -> Location {
        Location {
            line: self.line,
            column: self.column,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let current = self.lookahead;
        if current == Some('\n') {
            self.line += 1;
            self.column = 1;
        } else if current.is_some() {
            self.column += 1;
        }
        self.lookahead = self.chars.next();
        current
    }

    fn next_token(&mut self) -> ParseResult<Option<Token>> {
        loop {
            match self.lookahead {
                None => return Ok(None),
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('[') => {
                    self.bump();
                    return Ok(Some(Token::LBracket));
                }
                Some(']') => {
                    self.bump();
                    return Ok(Some(Token::RBracket));
                }
                Some(':') => {
                    self.bump();
                    return Ok(Some(Token::Colon));
                }
                Some(c) if c == '-' || c.is_ascii_digit() => {
                    let at = self.location();
                    let mut s = String::new();
                    s.push(self.bump().unwrap());
                    while let Some(d) = self.lookahead {
                        if d.is_ascii_digit() {
                            s.push(self.bump().unwrap());
                        } else {
                            break;
                        }
                    }
                    return match s.parse::<Word>() {
                        Ok(n) => Ok(Some(Token::Number(n))),
                        Err(_) => fail(
                            at,
                            ErrorKind::Syntax(format!("bad number literal '{}'", s)),
                        ),
                    };
                }
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    let mut s = String::new();
                    s.push(self.bump().unwrap());
                    while let Some(d) = self.lookahead {
                        if d.is_ascii_alphanumeric() || d == '_' {
                            s.push(self.bump().unwrap());
                        } else {
                            break;
                        }
                    }
                    return Ok(Some(Token::Ident(s)));
                }
                Some(c) => {
                    return fail(
                        self.location(),
                        ErrorKind::Syntax(format!("unexpected character '{}'", c)),
                    );
                }
            }
        }
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    code: Code,
    symbols: HashMap<String, Pos>,
}

impl<'a> Parser<'a> {
    fn run(&mut self) -> ParseResult<()> {
        while let Some(token) = self.lexer.next_token()? {
            match token {
                Token::Ident(name) => {
                    match self.lexer.next_token()? {
                        Some(Token::Colon) => {}
                        _ => {
                            return fail(
                                self.lexer.location(),
                                ErrorKind::Syntax(format!(
                                    "expected ':' after binding '{}'",
                                    name
                                )),
                            )
                        }
                    }
                    match self.lexer.next_token()? {
                        Some(Token::LBracket) => {
                            let pos = self.parse_node()?;
                            self.symbols.insert(name, pos);
                        }
                        _ => {
                            return fail(
                                self.lexer.location(),
                                ErrorKind::Syntax(format!(
                                    "binding '{}' must name a bracketed node",
                                    name
                                )),
                            )
                        }
                    }
                }
                Token::LBracket => {
                    self.parse_node()?;
                }
                other => {
                    return fail(
                        self.lexer.location(),
                        ErrorKind::Syntax(format!("unexpected token {:?}", other)),
                    );
                }
            }
        }
        Ok(())
    }

    /// Parse a node body after its opening bracket and append it.
    fn parse_node(&mut self) -> ParseResult<Pos> {
        let start = self.lexer.location();
        let op = match self.lexer.next_token()? {
            Some(Token::Ident(name)) => match name.parse::<Opcode>() {
                Ok(op) => op,
                Err(()) => return fail(start, ErrorKind::UnknownOpcode(name)),
            },
            _ => {
                return fail(
                    start,
                    ErrorKind::Syntax("expected an opcode name".to_string()),
                )
            }
        };

        let mut args: Vec<Word> = Vec::new();
        loop {
            let at = self.lexer.location();
            let token = match self.lexer.next_token()? {
                Some(t) => t,
                None => {
                    return fail(at, ErrorKind::Syntax("unterminated node".to_string()));
                }
            };
            let index = args.len();
            match token {
                Token::RBracket => break,
                Token::Number(n) => {
                    if op.arg_is_node(index) {
                        // Numeric shorthand for an immediate node.
                        args.push(self.code.imm(n));
                    } else {
                        args.push(n);
                    }
                }
                Token::Ident(name) => {
                    if !op.arg_is_node(index) {
                        return fail(
                            at,
                            ErrorKind::Syntax(format!(
                                "argument {} of {} takes a number",
                                index, op
                            )),
                        );
                    }
                    match self.symbols.get(&name) {
                        Some(&pos) => args.push(pos),
                        None => return fail(at, ErrorKind::UndefinedSymbol(name)),
                    }
                }
                Token::LBracket => {
                    if !op.arg_is_node(index) {
                        return fail(
                            at,
                            ErrorKind::Syntax(format!(
                                "argument {} of {} takes a number",
                                index, op
                            )),
                        );
                    }
                    let pos = self.parse_node()?;
                    args.push(pos);
                }
                Token::Colon => {
                    return fail(
                        at,
                        ErrorKind::Syntax("bindings are not allowed inside a node".to_string()),
                    );
                }
            }
        }

        if let Some(expected) = op.arg_count() {
            if args.len() != expected {
                return fail(
                    start,
                    ErrorKind::WrongArity {
                        opcode: op.name(),
                        expected,
                        found: args.len(),
                    },
                );
            }
        }
        Ok(self.code.append(op, &args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_whole_function() {
        let code = parse_code(
            "# return the sum of both arguments\n\
             f: [Enter [Fun 0 [Int -64] [Int -64] [Int -64]]]\n\
             [Move [RVal f] [Add [Arg f 0] [Arg f 1]]]\n\
             [Exit f]\n",
        )
        .unwrap();
        let ops: Vec<Opcode> = code.nodes().map(|n| n.op).collect();
        assert!(ops.contains(&Opcode::Enter));
        assert!(ops.contains(&Opcode::Add));
        assert!(ops.contains(&Opcode::Exit));
        assert_eq!(gantry_codegen::interpret::run(&code, &[19, 23]).unwrap(), 42);
    }

    #[test]
    fn numeric_literals_are_immediates_in_node_positions() {
        let code = parse_code("[Move [Temp [Int -64]] 42]").unwrap();
        let mv = code.nodes().find(|n| n.op == Opcode::Move).unwrap();
        let src = code.node_at(mv.arg(1));
        assert_eq!(src.op, Opcode::Imm);
        assert_eq!(src.arg(0), 42);
        // The width argument of Int stays a raw scalar.
        let int = code.nodes().find(|n| n.op == Opcode::Int).unwrap();
        assert_eq!(int.arg(0), -64);
    }

    #[test]
    fn round_trips_through_the_renderer() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[i64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let t = code.temp(i64t);
        let sum = code.add(a0, a0);
        code.mov(t, sum);
        let s = code.skip_if(t);
        code.here(s);
        let rv = code.rval(f);
        code.mov(rv, t);
        code.exit(f);

        let text = code.to_string();
        let reparsed = parse_code(&text).unwrap();
        assert_eq!(reparsed.to_string(), text);
    }

    #[test]
    fn errors_classify_and_locate_the_failure() {
        let err = parse_code("[Imm 1]\n[Bogus 2]\n").unwrap_err();
        assert_eq!(err.location.line, 2);
        assert_eq!(err.location.column, 2);
        assert!(matches!(err.kind, ErrorKind::UnknownOpcode(ref s) if s == "Bogus"));

        let err = parse_code("[Add [Imm 1]]").unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::WrongArity {
                opcode: "Add",
                expected: 2,
                found: 1,
            }
        ));

        let err = parse_code("[Jump nowhere]").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UndefinedSymbol(ref s) if s == "nowhere"));

        let err = parse_code("[Imm ?]").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Syntax(_)));
    }
}
