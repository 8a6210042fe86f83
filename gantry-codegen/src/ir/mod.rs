//! Representation of gantry IR: a compact, self-describing instruction
//! stream over a word buffer, with forward and reverse visitation.

mod builder;
mod code;
mod opcode;
mod semantics;

pub use self::code::{Code, Node, Nodes, Visit};
pub use self::opcode::Opcode;
pub use self::semantics::Sign;
