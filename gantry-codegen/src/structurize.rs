//! Bidirectional conversion between goto form and structured-loop form.
//!
//! The unstructurizer lowers structured control mechanically: `Forever`
//! becomes a label bound on the spot, `Repeat` a backward jump, `Skip` and
//! `SkipIf` forward jumps to labels declared at the skip site, and `Here`
//! binds those labels. The label introduced for a skip is identified by the
//! position of the originating skip node.
//!
//! The structurizer accepts the forward-reducible shape the unstructurizer
//! produces. It runs two passes: a reverse pass counting, per label, the
//! jumps that occur after the label's `Mark` (those are back-edges, and the
//! count becomes the loop refcount), and a forward rewrite pass that opens a
//! `Forever` at each loop-header `Mark`, turns forward jumps into pending
//! skips, closes loops with `Repeat` as back-edges consume the refcount, and
//! lands pending skips with `Here` at their `Mark`.

use crate::buffer::Pos;
use crate::ir::{Code, Opcode};
use crate::remap::Remap;
use crate::result::{CodegenError, CodegenResult};
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

/// Does `code` use goto-form control flow?
pub fn is_goto_form(code: &Code) -> bool {
    code.nodes().any(|n| {
        matches!(
            n.op,
            Opcode::Label | Opcode::Mark | Opcode::Jump | Opcode::Branch
        )
    })
}

/// Convert structured-loop form to label+jump form.
pub fn unstructurize(code: &Code) -> Code {
    let mut dst = Code::new();
    let mut remap = Remap::new();
    for node in code.nodes() {
        match node.op {
            Opcode::Forever => {
                let l = dst.label();
                dst.mark(l);
                remap.set(node.pos, l);
            }
            Opcode::Repeat => {
                dst.jump(remap.get(node.arg(0)));
            }
            Opcode::Skip => {
                let l = dst.label();
                dst.jump(l);
                remap.set(node.pos, l);
            }
            Opcode::SkipIf => {
                let l = dst.label();
                dst.branch(l, remap.get(node.arg(0)));
                remap.set(node.pos, l);
            }
            Opcode::Here => {
                dst.mark(remap.get(node.arg(0)));
            }
            _ => {
                remap.copy(&node, &mut dst);
            }
        }
    }
    dst
}

/// An open loop during the structurize rewrite pass.
struct OpenLoop {
    label: Pos,
    forever: Pos,
    refs: u32,
}

/// Convert label+jump form to structured-loop form.
///
/// The input must have a forward-reducible control-flow graph, as produced
/// by [`unstructurize`]; anything else is reported as malformed IR.
pub fn structurize(code: &Code) -> CodegenResult<Code> {
    // Count pass, in reverse: a jump seen before its label's `Mark` is a
    // back-edge. Back-edge targets are loop headers.
    let mut marked: FxHashSet<Pos> = FxHashSet::default();
    let mut headers: FxHashMap<Pos, u32> = FxHashMap::default();
    for node in code.nodes().rev() {
        match node.op {
            Opcode::Jump | Opcode::Branch => {
                let label = node.arg(0);
                if !marked.contains(&label) {
                    *headers.entry(label).or_insert(0) += 1;
                }
            }
            Opcode::Mark => {
                marked.insert(node.arg(0));
            }
            _ => {}
        }
    }
    debug!("structurize: {} loop headers", headers.len());

    // Rewrite pass, forward.
    let mut dst = Code::new();
    let mut remap = Remap::new();
    let mut stack: Vec<OpenLoop> = Vec::new();
    let mut pending: FxHashMap<Pos, Vec<Pos>> = FxHashMap::default();
    let mut bound: FxHashSet<Pos> = FxHashSet::default();

    let close_back_edge = |stack: &mut Vec<OpenLoop>, label: Pos| -> CodegenResult<Pos> {
        let top = stack.last_mut().ok_or_else(|| {
            CodegenError::MalformedIr("back-edge outside any loop".to_string())
        })?;
        if top.label != label {
            return Err(CodegenError::MalformedIr(
                "back-edge crosses an enclosing loop".to_string(),
            ));
        }
        let forever = top.forever;
        top.refs -= 1;
        if top.refs == 0 {
            stack.pop();
        }
        Ok(forever)
    };

    for node in code.nodes() {
        match node.op {
            Opcode::Label => {}
            Opcode::Mark => {
                let label = node.arg(0);
                bound.insert(label);
                if let Some(&refs) = headers.get(&label) {
                    let forever = dst.forever();
                    stack.push(OpenLoop {
                        label,
                        forever,
                        refs,
                    });
                }
                if let Some(skips) = pending.remove(&label) {
                    for skip in skips {
                        dst.here(skip);
                    }
                }
            }
            Opcode::Jump => {
                let label = node.arg(0);
                if bound.contains(&label) {
                    let forever = close_back_edge(&mut stack, label)?;
                    dst.repeat(forever);
                } else {
                    let skip = dst.skip();
                    pending.entry(label).or_default().push(skip);
                }
            }
            Opcode::Branch => {
                let label = node.arg(0);
                let cond = remap.get(node.arg(1));
                if bound.contains(&label) {
                    // A conditional back-edge repeats unless the condition
                    // fails: skip over the Repeat on the negated condition.
                    let ncond = dst.not(cond);
                    let skip = dst.skip_if(ncond);
                    let forever = close_back_edge(&mut stack, label)?;
                    dst.repeat(forever);
                    dst.here(skip);
                } else {
                    let skip = dst.skip_if(cond);
                    pending.entry(label).or_default().push(skip);
                }
            }
            _ => {
                remap.copy(&node, &mut dst);
            }
        }
    }

    if !stack.is_empty() {
        return Err(CodegenError::MalformedIr(
            "loop header never closed by its back-edges".to_string(),
        ));
    }
    if !pending.is_empty() {
        return Err(CodegenError::MalformedIr(
            "forward jump to a label that is never marked".to_string(),
        ));
    }
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    // A structured program with two nested loops, two conditional exits,
    // one unconditional skip, and a loop body that does real work.
    fn nested_loops() -> Code {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[]);
        let f = code.enter(ft);
        let t = code.temp(i64t);
        let zero = code.imm(0);
        code.mov(t, zero);

        let outer = code.forever();
        let eight = code.imm(8);
        let done = code.gte(t, eight);
        let s1 = code.skip_if(done);

        let inner = code.forever();
        let four = code.imm(4);
        let mid = code.gte(t, four);
        let s2 = code.skip_if(mid);
        let s3 = code.skip();
        code.here(s3);
        let one = code.imm(1);
        let next = code.add(t, one);
        code.mov(t, next);
        code.repeat(inner);
        code.here(s2);
        code.repeat(outer);
        code.here(s1);

        let rv = code.rval(f);
        code.mov(rv, t);
        code.exit(f);
        code
    }

    fn control_ops(code: &Code) -> Vec<Opcode> {
        code.nodes()
            .map(|n| n.op)
            .filter(|op| {
                matches!(
                    op,
                    Opcode::Forever
                        | Opcode::Repeat
                        | Opcode::Skip
                        | Opcode::SkipIf
                        | Opcode::Here
                )
            })
            .collect()
    }

    #[test]
    fn unstructurize_then_structurize_is_identity() {
        let structured = nested_loops();
        let goto = unstructurize(&structured);
        assert!(is_goto_form(&goto));
        let back = structurize(&goto).unwrap();
        assert_eq!(back.to_string(), structured.to_string());
    }

    #[test]
    fn structurize_then_unstructurize_is_identity() {
        let goto = unstructurize(&nested_loops());
        let structured = structurize(&goto).unwrap();
        let goto_again = unstructurize(&structured);
        assert_eq!(goto_again.to_string(), goto.to_string());
    }

    #[test]
    fn nested_back_edges_structurize_to_expected_shape() {
        let goto = unstructurize(&nested_loops());
        let structured = structurize(&goto).unwrap();
        assert_eq!(
            control_ops(&structured),
            vec![
                Opcode::Forever,
                Opcode::SkipIf,
                Opcode::Forever,
                Opcode::SkipIf,
                Opcode::Skip,
                Opcode::Here,
                Opcode::Repeat,
                Opcode::Here,
                Opcode::Repeat,
                Opcode::Here,
            ]
        );
    }

    #[test]
    fn conditional_back_edge_becomes_guarded_repeat() {
        // A hand-written do-while: the back-edge is a conditional branch,
        // which has no direct structured equivalent and is rewritten as
        // SkipIf(!cond); Repeat; Here.
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[]);
        let f = code.enter(ft);
        let t = code.temp(i64t);
        let zero = code.imm(0);
        code.mov(t, zero);
        let l = code.label();
        code.mark(l);
        let one = code.imm(1);
        let next = code.add(t, one);
        code.mov(t, next);
        let ten = code.imm(10);
        let more = code.lt(t, ten);
        code.branch(l, more);
        let rv = code.rval(f);
        code.mov(rv, t);
        code.exit(f);

        let structured = structurize(&code).unwrap();
        assert_eq!(
            control_ops(&structured),
            vec![
                Opcode::Forever,
                Opcode::SkipIf,
                Opcode::Repeat,
                Opcode::Here,
            ]
        );
        let nots: Vec<_> = structured
            .nodes()
            .filter(|n| n.op == Opcode::Not)
            .collect();
        assert_eq!(nots.len(), 1);
    }

    #[test]
    fn unbound_forward_target_is_malformed() {
        let mut code = Code::new();
        let l = code.label();
        code.jump(l);
        assert!(matches!(
            structurize(&code),
            Err(CodegenError::MalformedIr(_))
        ));
    }
}
