//! A cursor for navigating and editing a [`NodeList`].
//!
//! Adapted from `cranelift-codegen`'s `cursor::Cursor` trait — the same
//! `CursorPosition` shape and builder-style `at_position`/`with_srcloc`
//! chaining — but specialized to one concrete cursor type, since this
//! crate's IR has one list shape rather than a per-EBB `Layout`. Spec §9
//! describes exactly this: "the cursor is simply a `NodeId` plus a
//! position-before/after marker."

use crate::ir::node::{Node, NodeId, NodeList};

/// Where a [`Cursor`] is anchored, and whether new nodes are inserted
/// before or after it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CursorPosition {
    /// Not anchored to any node; insertion is forbidden.
    Nowhere,
    /// Anchored at `id`; `insert` places new nodes immediately before it.
    Before(NodeId),
    /// Anchored at `id`; `insert` places new nodes immediately after it.
    After(NodeId),
}

/// A cursor over a borrowed [`NodeList`]. Moving the cursor never mutates
/// the list; only [`Cursor::insert`] and [`Cursor::remove_current`] do.
pub struct Cursor<'f> {
    list: &'f mut NodeList,
    pos: CursorPosition,
}

impl<'f> Cursor<'f> {
    pub fn new(list: &'f mut NodeList) -> Self {
        Cursor {
            list,
            pos: CursorPosition::Nowhere,
        }
    }

    pub fn position(&self) -> CursorPosition {
        self.pos
    }

    pub fn set_position(&mut self, pos: CursorPosition) {
        self.pos = pos;
    }

    /// Rebuild this cursor positioned at `pos` (builder-style).
    pub fn at_position(mut self, pos: CursorPosition) -> Self {
        self.set_position(pos);
        self
    }

    pub fn at_end(mut self) -> Self {
        self.pos = match self.list.last() {
            Some(id) => CursorPosition::After(id),
            None => CursorPosition::Nowhere,
        };
        self
    }

    /// Insert `node` at the cursor, advancing the cursor to sit after it.
    pub fn insert(&mut self, node: Node) -> NodeId {
        let id = match self.pos {
            CursorPosition::Nowhere => self.list.push_back(node),
            CursorPosition::Before(at) => self.list.insert_before(at, node),
            CursorPosition::After(at) => match self.list.next(at) {
                Some(next) => self.list.insert_before(next, node),
                None => self.list.push_back(node),
            },
        };
        self.pos = CursorPosition::After(id);
        id
    }

    /// Remove the node the cursor currently sits at (`Before`/`After`
    /// variants only), leaving the cursor pointing at its former neighbor.
    pub fn remove_current(&mut self) -> Option<Node> {
        let id = match self.pos {
            CursorPosition::Before(id) | CursorPosition::After(id) => id,
            CursorPosition::Nowhere => return None,
        };
        let node = self.list.get(id).clone();
        let prev = self.list.prev(id);
        self.list.remove(id);
        self.pos = match prev {
            Some(p) => CursorPosition::After(p),
            None => CursorPosition::Nowhere,
        };
        Some(node)
    }

    pub fn current(&self) -> Option<&Node> {
        match self.pos {
            CursorPosition::Before(id) | CursorPosition::After(id) => Some(self.list.get(id)),
            CursorPosition::Nowhere => None,
        }
    }
}

/// Run `f` with the cursor temporarily rewound to `hook`, restoring the
/// original position on every exit path — including early return via `?`
/// inside `f`. Grounds the "scoped prologue injection" design note (spec
/// §9): `UniCompiler::simd_const`/`k_const` use this to hoist constant
/// materialization to a function's prologue hook without losing the
/// caller's place in the instruction stream.
pub fn with_cursor_at<T>(
    cursor: &mut Cursor,
    hook: NodeId,
    f: impl FnOnce(&mut Cursor) -> T,
) -> T {
    let saved = cursor.position();
    cursor.set_position(CursorPosition::After(hook));
    let result = f(cursor);
    cursor.set_position(saved);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::Node;

    #[test]
    fn insert_at_nowhere_appends() {
        let mut list = NodeList::new();
        let mut cur = Cursor::new(&mut list);
        cur.insert(Node::SectionAlign(1));
        cur.insert(Node::SectionAlign(2));
        drop(cur);
        let vals: Vec<u32> = list
            .iter()
            .map(|(_, n)| match n {
                Node::SectionAlign(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(vals, vec![1, 2]);
    }

    #[test]
    fn with_cursor_at_restores_position_on_exit() {
        let mut list = NodeList::new();
        let first = list.push_back(Node::SectionAlign(1));
        let hook = list.push_back(Node::SectionAlign(2));
        list.push_back(Node::SectionAlign(3));

        let mut cur = Cursor::new(&mut list).at_position(CursorPosition::After(first));
        with_cursor_at(&mut cur, hook, |c| {
            c.insert(Node::SectionAlign(99));
        });
        assert_eq!(cur.position(), CursorPosition::After(first));
    }

    #[test]
    fn remove_current_leaves_cursor_at_predecessor() {
        let mut list = NodeList::new();
        let a = list.push_back(Node::SectionAlign(1));
        let b = list.push_back(Node::SectionAlign(2));
        let mut cur = Cursor::new(&mut list).at_position(CursorPosition::Before(b));
        cur.remove_current();
        assert_eq!(cur.position(), CursorPosition::After(a));
    }

    #[test]
    fn remove_current_at_first_node_leaves_cursor_nowhere() {
        let mut list = NodeList::new();
        let a = list.push_back(Node::SectionAlign(1));
        let mut cur = Cursor::new(&mut list).at_position(CursorPosition::Before(a));
        cur.remove_current();
        assert_eq!(cur.position(), CursorPosition::Nowhere);
    }
}
