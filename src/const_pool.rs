//! Vector/scalar constant pooling (spec §4.5 item 3, component K).
//!
//! Grounded almost verbatim on `cranelift-codegen`'s `ir::constant::ConstantPool`:
//! the same handle-returning `insert` with byte-equality dedup via a reverse
//! `data -> handle` map, the same "offset is unknown until layout is fixed"
//! two-step (`insert` now, `set_offset` once the function body's length is
//! known). Extended with an `align` field (spec §9 "Constant-pool sharing"
//! cares about both data and alignment) and a `Scope` distinguishing the two
//! addressing strategies spec §9 calls for: a globally shared table baked in
//! as absolute addresses, or a per-function local table reached via
//! RIP-relative `lea`.

use cranelift_entity::{entity_impl, PrimaryMap};
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An opaque reference to a pooled constant, valid only within the
/// [`ConstPool`] that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ConstId(u32);
entity_impl!(ConstId, "const");

/// Whether a constant's address is baked in absolute (caller accepts the
/// ASLR/security tradeoff spec §9 names) or reached RIP-relative from the
/// end of the owning function's body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Global,
    Local,
}

#[derive(Clone)]
struct Entry {
    data: Vec<u8>,
    align: u8,
    offset: Option<u32>,
}

/// A single dedup-by-value constant table (spec §3 `VecConstTable`).
///
/// One `ConstPool` instance serves one [`Scope`]: a `UniCompiler` keeps a
/// local pool per function plus, if the caller opts in, one long-lived
/// global pool shared across functions.
#[derive(Clone)]
pub struct ConstPool {
    scope: Scope,
    handles: PrimaryMap<ConstId, Entry>,
    by_value: HashMap<(Vec<u8>, u8), ConstId>,
}

impl ConstPool {
    pub fn new(scope: Scope) -> Self {
        ConstPool {
            scope,
            handles: PrimaryMap::new(),
            by_value: HashMap::new(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn clear(&mut self) {
        self.handles.clear();
        self.by_value.clear();
    }

    /// Insert `data` (aligned to `align` bytes once placed); returns the
    /// existing handle if identical data at the same alignment was already
    /// inserted, matching spec §9's "dedup by byte-equality of data and
    /// alignment."
    pub fn insert(&mut self, data: Vec<u8>, align: u8) -> ConstId {
        let key = (data.clone(), align);
        if let Some(&id) = self.by_value.get(&key) {
            return id;
        }
        let id = self.handles.push(Entry {
            data,
            align,
            offset: None,
        });
        self.by_value.insert(key, id);
        id
    }

    pub fn get(&self, id: ConstId) -> &[u8] {
        &self.handles[id].data
    }

    pub fn align_of(&self, id: ConstId) -> u8 {
        self.handles[id].align
    }

    /// Record the byte offset of `id` relative to the start of this pool's
    /// emitted data block, once the preceding code/data layout is fixed.
    pub fn set_offset(&mut self, id: ConstId, offset: u32) {
        self.handles[id].offset = Some(offset);
    }

    /// The offset set by [`ConstPool::set_offset`], if any.
    pub fn offset_of(&self, id: ConstId) -> Option<u32> {
        self.handles[id].offset
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Combined byte size of every distinct constant in the pool, ignoring
    /// inter-entry padding (callers align each entry's start when laying
    /// out the data block).
    pub fn byte_size(&self) -> usize {
        self.handles.values().map(|e| e.data.len()).sum()
    }

    /// Iterate constants in insertion order, as `(id, data, align)`.
    pub fn iter(&self) -> impl Iterator<Item = (ConstId, &[u8], u8)> {
        self.handles
            .iter()
            .map(|(id, e)| (id, e.data.as_slice(), e.align))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_dedups_identical_data_and_alignment() {
        let mut pool = ConstPool::new(Scope::Local);
        let a = pool.insert(vec![1, 2, 3, 4], 16);
        let b = pool.insert(vec![1, 2, 3, 4], 16);
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn same_bytes_different_alignment_are_distinct() {
        let mut pool = ConstPool::new(Scope::Local);
        let a = pool.insert(vec![1, 2, 3, 4], 16);
        let b = pool.insert(vec![1, 2, 3, 4], 32);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn offset_unset_until_assigned() {
        let mut pool = ConstPool::new(Scope::Local);
        let a = pool.insert(vec![0xAA], 1);
        assert_eq!(pool.offset_of(a), None);
        pool.set_offset(a, 16);
        assert_eq!(pool.offset_of(a), Some(16));
    }

    #[test]
    fn byte_size_sums_distinct_entries_only() {
        let mut pool = ConstPool::new(Scope::Local);
        pool.insert(vec![0; 16], 16);
        pool.insert(vec![0; 16], 16);
        pool.insert(vec![1; 32], 32);
        assert_eq!(pool.byte_size(), 16 + 32);
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut pool = ConstPool::new(Scope::Global);
        pool.insert(vec![1], 1);
        pool.insert(vec![2], 1);
        let seen: Vec<u8> = pool.iter().map(|(_, data, _)| data[0]).collect();
        assert_eq!(seen, vec![1, 2]);
    }
}
