//! Converting a code object to text.
//!
//! Rendering is a read-only pass: pure nodes that are referenced exactly
//! once are inlined into their consumer; every other node gets its own line,
//! prefixed with a symbolic label `OpName_k` when something references it.
//! The output is accepted back by `gantry-reader`, with immediates rendered
//! as bare numeric literals.

use crate::buffer::Pos;
use crate::ir::{Code, Node, Opcode};
use rustc_hash::FxHashMap;
use std::fmt::{self, Write};

struct Render<'a> {
    code: &'a Code,
    refs: FxHashMap<Pos, u32>,
    ordinal: FxHashMap<Pos, u32>,
}

impl<'a> Render<'a> {
    fn new(code: &'a Code) -> Self {
        let mut refs = FxHashMap::default();
        let mut ordinal = FxHashMap::default();
        for (i, node) in code.nodes().enumerate() {
            ordinal.insert(node.pos, i as u32);
            for a in node.node_args() {
                *refs.entry(a).or_insert(0) += 1;
            }
        }
        Self {
            code,
            refs,
            ordinal,
        }
    }

    fn ref_count(&self, pos: Pos) -> u32 {
        self.refs.get(&pos).copied().unwrap_or(0)
    }

    fn inlined(&self, pos: Pos) -> bool {
        self.code.node_at(pos).op.is_pure() && self.ref_count(pos) == 1
    }

    fn label(&self, node: &Node) -> String {
        format!("{}_{}", node.op.name(), self.ordinal[&node.pos])
    }

    fn write_node(&self, w: &mut dyn Write, node: &Node) -> fmt::Result {
        write!(w, "[{}", node.op.name())?;
        for (i, &a) in node.args.iter().enumerate() {
            w.write_char(' ')?;
            if node.op.arg_is_node(i) {
                self.write_value(w, a)?;
            } else {
                write!(w, "{}", a)?;
            }
        }
        w.write_char(']')
    }

    fn write_value(&self, w: &mut dyn Write, pos: Pos) -> fmt::Result {
        let target = self.code.node_at(pos);
        if self.inlined(pos) {
            if target.op == Opcode::Imm {
                write!(w, "{}", target.arg(0))
            } else {
                self.write_node(w, &target)
            }
        } else {
            w.write_str(&self.label(&target))
        }
    }
}

/// Write the text rendering of `code`.
pub fn write_code(w: &mut dyn Write, code: &Code) -> fmt::Result {
    let render = Render::new(code);
    for node in code.nodes() {
        if render.inlined(node.pos) {
            continue;
        }
        if render.ref_count(node.pos) > 0 {
            write!(w, "{}: ", render.label(&node))?;
        }
        render.write_node(w, &node)?;
        w.write_char('\n')?;
    }
    Ok(())
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_code(f, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_use_pure_nodes_inline() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[]);
        let f = code.enter(ft);
        let rv = code.rval(f);
        let c = code.imm(42);
        code.mov(rv, c);
        code.exit(f);

        let text = code.to_string();
        // The type chain inlines into Enter; the move inlines RVal and the
        // immediate; Enter keeps a label because Exit and RVal cite it.
        assert_eq!(
            text,
            "Enter_2: [Enter [Fun 0 [Int -64]]]\n\
             [Move [RVal Enter_2] 42]\n\
             [Exit Enter_2]\n"
        );
    }

    #[test]
    fn shared_nodes_get_labels() {
        let mut code = Code::new();
        let a = code.imm(7);
        let sum = code.add(a, a);
        let _ = code.mul(sum, sum);

        let text = code.to_string();
        assert_eq!(
            text,
            "Imm_0: [Imm 7]\n\
             Add_1: [Add Imm_0 Imm_0]\n\
             [Mul Add_1 Add_1]\n"
        );
    }
}
