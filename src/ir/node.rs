//! The builder IR: a doubly-linked sequence of [`Node`]s with an editable
//! cursor.
//!
//! Spec §9 calls for mapping the intrinsically cyclic node-to-node linkage
//! onto "an arena with node indices rather than owning pointers," exactly
//! the idiom `cranelift-codegen` itself uses for its `Layout`
//! (`ir::entities::Inst`/`Ebb` indices into a `PrimaryMap`, navigated by a
//! `cursor::Cursor`). This module is that idiom applied to the flat
//! `Node` list instead of cranelift's EBB-structured layout.

use crate::callconv::CallConv;
use crate::inst_db::InstId;
use crate::label::LabelId;
use crate::operand::Operand;
use cranelift_entity::{entity_impl, PrimaryMap};
use smallvec::SmallVec;
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// An opaque reference to a [`Node`] in a [`NodeList`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct NodeId(u32);
entity_impl!(NodeId, "node");

/// The function signature recorded on a `Func` node.
#[derive(Clone, Debug)]
pub struct FuncSignature {
    pub name: String,
    pub call_conv: CallConv,
}

/// A single entry in the builder's instruction stream.
#[derive(Clone, Debug)]
pub enum Node {
    /// A marker binding a label to this position once emitted.
    Label(LabelId),
    /// A concrete or abstract instruction: an instruction-table id plus its
    /// operands.
    Inst(InstId, SmallVec<[Operand; 4]>),
    /// A call to `target` with `args`, producing `ret` (if any). Participates
    /// in liveness the same way an `Inst` does (spec §4.3 Pass 2: "Invoke
    /// nodes additionally record the return's definition at their pos").
    Invoke {
        target: LabelId,
        args: SmallVec<[Operand; 4]>,
        ret: Option<Operand>,
    },
    /// The start of a function body; `prologue_marker` is filled in once
    /// this node is appended, recording the cursor position immediately
    /// after it for later prologue injection (spec §4.5 item 3).
    Func(FuncSignature),
    /// Pad the buffer to the given byte alignment at this point.
    SectionAlign(u32),
    /// Embed raw bytes (used for the constant table appended by `end_func`).
    EmbedData(Vec<u8>),
}

struct Slot {
    prev: NodeId,
    next: NodeId,
    data: Option<Node>,
}

/// A doubly-linked sequence of nodes stored in an arena, with exactly one
/// sentinel head (spec §3 builder invariants). The sentinel's own `data` is
/// always `None` and it is never visited by [`NodeList::iter`].
pub struct NodeList {
    slots: PrimaryMap<NodeId, Slot>,
    sentinel: NodeId,
}

impl NodeList {
    pub fn new() -> Self {
        let mut slots = PrimaryMap::new();
        let sentinel = slots.next_key();
        slots.push(Slot {
            prev: sentinel,
            next: sentinel,
            data: None,
        });
        NodeList { slots, sentinel }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        let sentinel = self.slots.next_key();
        self.slots.push(Slot {
            prev: sentinel,
            next: sentinel,
            data: None,
        });
        self.sentinel = sentinel;
    }

    pub fn sentinel(&self) -> NodeId {
        self.sentinel
    }

    pub fn is_empty(&self) -> bool {
        self.slots[self.sentinel].next == self.sentinel
    }

    pub fn first(&self) -> Option<NodeId> {
        let n = self.slots[self.sentinel].next;
        if n == self.sentinel {
            None
        } else {
            Some(n)
        }
    }

    pub fn last(&self) -> Option<NodeId> {
        let p = self.slots[self.sentinel].prev;
        if p == self.sentinel {
            None
        } else {
            Some(p)
        }
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        let n = self.slots[id].next;
        if n == self.sentinel {
            None
        } else {
            Some(n)
        }
    }

    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        let p = self.slots[id].prev;
        if p == self.sentinel {
            None
        } else {
            Some(p)
        }
    }

    pub fn get(&self, id: NodeId) -> &Node {
        self.slots[id]
            .data
            .as_ref()
            .expect("NodeId referenced the sentinel or a removed node")
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id]
            .data
            .as_mut()
            .expect("NodeId referenced the sentinel or a removed node")
    }

    /// Insert `node` immediately before `before`, returning its id.
    pub fn insert_before(&mut self, before: NodeId, node: Node) -> NodeId {
        let prev = self.slots[before].prev;
        let id = self.slots.push(Slot {
            prev,
            next: before,
            data: Some(node),
        });
        self.slots[prev].next = id;
        self.slots[before].prev = id;
        id
    }

    /// Append `node` at the end of the list, returning its id.
    pub fn push_back(&mut self, node: Node) -> NodeId {
        self.insert_before(self.sentinel, node)
    }

    /// Remove `id` from the list. Does not reclaim the arena slot (the
    /// arena only ever grows within one compilation pass, mirroring
    /// `cranelift-codegen`'s append-only entity maps).
    pub fn remove(&mut self, id: NodeId) {
        let prev = self.slots[id].prev;
        let next = self.slots[id].next;
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
        self.slots[id].data = None;
    }

    /// Forward iterator over live nodes (the sentinel is skipped).
    pub fn iter(&self) -> NodeIter<'_> {
        NodeIter {
            list: self,
            cur: self.slots[self.sentinel].next,
        }
    }
}

impl Default for NodeList {
    fn default() -> Self {
        Self::new()
    }
}

pub struct NodeIter<'a> {
    list: &'a NodeList,
    cur: NodeId,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == self.list.sentinel {
            return None;
        }
        let id = self.cur;
        self.cur = self.list.slots[id].next;
        Some((id, self.list.get(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_has_no_first() {
        let list = NodeList::new();
        assert!(list.is_empty());
        assert_eq!(list.first(), None);
        assert_eq!(list.last(), None);
    }

    #[test]
    fn push_back_preserves_order() {
        let mut list = NodeList::new();
        let a = list.push_back(Node::SectionAlign(16));
        let b = list.push_back(Node::SectionAlign(32));
        assert_eq!(list.first(), Some(a));
        assert_eq!(list.last(), Some(b));
        assert_eq!(list.next(a), Some(b));
        assert_eq!(list.prev(b), Some(a));
    }

    #[test]
    fn insert_before_splices_correctly() {
        let mut list = NodeList::new();
        let a = list.push_back(Node::SectionAlign(1));
        let c = list.push_back(Node::SectionAlign(3));
        let b = list.insert_before(c, Node::SectionAlign(2));
        assert_eq!(list.next(a), Some(b));
        assert_eq!(list.next(b), Some(c));
        assert_eq!(list.prev(c), Some(b));
    }

    #[test]
    fn remove_splices_neighbors_together() {
        let mut list = NodeList::new();
        let a = list.push_back(Node::SectionAlign(1));
        let b = list.push_back(Node::SectionAlign(2));
        let c = list.push_back(Node::SectionAlign(3));
        list.remove(b);
        assert_eq!(list.next(a), Some(c));
        assert_eq!(list.prev(c), Some(a));
    }

    #[test]
    fn no_node_appears_twice_under_iteration() {
        let mut list = NodeList::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(list.push_back(Node::SectionAlign(i)));
        }
        let seen: Vec<NodeId> = list.iter().map(|(id, _)| id).collect();
        assert_eq!(seen, ids);
    }
}
