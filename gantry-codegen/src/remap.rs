//! Identity-preserving IR copier.
//!
//! Every transform produces a new code object, and positions change because
//! nodes are dropped, added or reordered. The remapper carries the
//! old-position to new-position mapping; forwarding a node through it
//! translates the node-reference arguments before appending, so
//! cross-references are never lost. A transform may alias one old position
//! to another's new position (dead-temp elimination relies on this), and may
//! mint negative "virtual" positions for helper nodes it injects without a
//! source counterpart.

use crate::buffer::Pos;
use crate::ir::{Code, Node};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Old-position to new-position mapping for one transform.
#[derive(Default)]
pub struct Remap {
    map: FxHashMap<Pos, Pos>,
    next_virtual: Pos,
}

impl Remap {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self {
            map: FxHashMap::default(),
            next_virtual: 0,
        }
    }

    /// The new position of old position `old`.
    ///
    /// Panics when `old` was never mapped; a transform that reaches this has
    /// dropped a node something else still references, which is fatal.
    pub fn get(&self, old: Pos) -> Pos {
        match self.map.get(&old) {
            Some(&new) => new,
            None => panic!("remap: position {} has no counterpart", old),
        }
    }

    /// The new position of `old`, if one was recorded.
    pub fn try_get(&self, old: Pos) -> Option<Pos> {
        self.map.get(&old).copied()
    }

    /// Record that `old` now lives at `new`.
    pub fn set(&mut self, old: Pos, new: Pos) {
        self.map.insert(old, new);
    }

    /// Alias `old` to the new position of `to_old`: uses of `old` are
    /// rewritten to whatever `to_old` became.
    pub fn alias(&mut self, old: Pos, to_old: Pos) {
        let new = self.get(to_old);
        self.set(old, new);
    }

    /// Mint a fresh virtual position. Virtual positions are negative and
    /// never appear in a buffer; they key helper nodes a transform injects
    /// without a source counterpart.
    pub fn mint_virtual(&mut self) -> Pos {
        self.next_virtual -= 1;
        self.next_virtual
    }

    /// Forward `node` into `dst`, translating its node-reference arguments,
    /// and record the mapping. Returns the new position.
    pub fn copy(&mut self, node: &Node, dst: &mut Code) -> Pos {
        let mut args: SmallVec<[Pos; 4]> = node.args.clone();
        for (i, a) in args.iter_mut().enumerate() {
            if node.op.arg_is_node(i) {
                *a = self.get(*a);
            }
        }
        let new = dst.append(node.op, &args);
        self.set(node.pos, new);
        new
    }
}

/// Copy `code` through a fresh remapper without transformation.
pub fn copy_code(code: &Code) -> Code {
    let mut dst = Code::new();
    let mut remap = Remap::new();
    for node in code.nodes() {
        remap.copy(&node, &mut dst);
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_copy_preserves_text() {
        let mut code = Code::new();
        let i64t = code.int(-64);
        let ft = code.fun(0, i64t, &[i64t, i64t]);
        let f = code.enter(ft);
        let a0 = code.arg(f, 0);
        let a1 = code.arg(f, 1);
        let sum = code.add(a0, a1);
        let rv = code.rval(f);
        code.mov(rv, sum);
        code.exit(f);

        let copy = copy_code(&code);
        assert_eq!(copy.to_string(), code.to_string());
    }

    #[test]
    fn aliasing_redirects_uses() {
        let mut src = Code::new();
        let a = src.imm(1);
        let b = src.imm(2);
        let use_b = src.neg(b);

        let mut dst = Code::new();
        let mut remap = Remap::new();
        let a_node = src.node_at(a);
        remap.copy(&a_node, &mut dst);
        // Pretend `b` was eliminated in favour of `a`.
        remap.alias(b, a);
        let neg = remap.copy(&src.node_at(use_b), &mut dst);
        assert_eq!(dst.node_at(neg).arg(0), remap.get(a));
    }

    #[test]
    fn virtual_positions_are_negative_and_distinct() {
        let mut remap = Remap::new();
        let v1 = remap.mint_virtual();
        let v2 = remap.mint_virtual();
        assert!(v1 < 0 && v2 < 0 && v1 != v2);
    }
}
