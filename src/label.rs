//! Labels and the deferred-relocation mechanism that patches label-relative
//! operands once the final code layout is known.
//!
//! Grounded on the relocation-deferral idea in
//! `cranelift-codegen`'s `binemit::relaxation` (label fixups recorded
//! during emission, patched in one final walk) and on
//! `cranelift_entity::PrimaryMap`'s arena pattern, the same one
//! `ir::constant::ConstantPool` uses to map handles to data.

use crate::buffer::CodeBuffer;
use crate::error::{CodegenError, CodegenResult};
use cranelift_entity::{entity_impl, PrimaryMap};
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// An opaque reference to a label, valid only within the
/// [`LabelManager`] that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct LabelId(u32);
entity_impl!(LabelId, "label");

/// The kind of patch a [`Relocation`] applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocKind {
    /// A 32-bit PC-relative displacement, patched as
    /// `bound_offset - (buffer_offset + 4) + addend`.
    Rel32,
    /// A 64-bit absolute image address, patched as `bound_offset + addend`.
    Abs64,
    /// A 64-bit absolute pointer value (identical patch formula to `Abs64`
    /// but kept distinct so callers can tell "address of code" from
    /// "address of data" relocations apart when laying out sections).
    AbsPtr,
}

/// A deferred patch recorded when an instruction references a
/// not-yet-bound label.
#[derive(Clone, Copy, Debug)]
pub struct Relocation {
    pub kind: RelocKind,
    pub buffer_offset: u32,
    pub target: LabelId,
    pub addend: i32,
}

struct LabelData {
    #[allow(dead_code)] // kept for diagnostics/debug formatting
    name: Option<String>,
    bound_offset: Option<u32>,
}

/// Allocates label ids, tracks binding offsets, and records relocations
/// until a final resolution pass patches the buffer.
pub struct LabelManager {
    labels: PrimaryMap<LabelId, LabelData>,
    relocations: Vec<Relocation>,
}

impl LabelManager {
    pub fn new() -> Self {
        LabelManager {
            labels: PrimaryMap::new(),
            relocations: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.labels.clear();
        self.relocations.clear();
    }

    /// Allocate a fresh, unbound label.
    pub fn new_label(&mut self, name: Option<&str>) -> LabelId {
        self.labels.push(LabelData {
            name: name.map(str::to_owned),
            bound_offset: None,
        })
    }

    /// Bind `id` to `offset`. Fails with [`CodegenError::AlreadyBound`] if
    /// the label already has a binding.
    pub fn bind(&mut self, id: LabelId, offset: u32) -> CodegenResult<()> {
        let data = &mut self.labels[id];
        if data.bound_offset.is_some() {
            return Err(CodegenError::AlreadyBound(id));
        }
        data.bound_offset = Some(offset);
        Ok(())
    }

    /// The bound offset of `id`, if it has been bound.
    pub fn resolve(&self, id: LabelId) -> Option<u32> {
        self.labels[id].bound_offset
    }

    pub fn is_bound(&self, id: LabelId) -> bool {
        self.resolve(id).is_some()
    }

    /// Record a relocation to be patched by [`LabelManager::resolve_all`].
    pub fn record_relocation(
        &mut self,
        kind: RelocKind,
        buffer_offset: u32,
        target: LabelId,
        addend: i32,
    ) {
        self.relocations.push(Relocation {
            kind,
            buffer_offset,
            target,
            addend,
        });
    }

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    /// Walk every recorded relocation and patch `buffer` in place.
    ///
    /// Fails with [`CodegenError::Unbound`] on the first relocation whose
    /// target was never bound; already-applied patches before that point
    /// are not rolled back, matching the "first error poisons the
    /// compiler, no partial output is handed to the caller" policy at the
    /// call site (the caller must treat any error here as fatal for the
    /// whole compilation, not retry on the same buffer).
    pub fn resolve_all(&self, buffer: &mut CodeBuffer) -> CodegenResult<()> {
        for reloc in &self.relocations {
            let bound = self
                .resolve(reloc.target)
                .ok_or(CodegenError::Unbound(reloc.target))?;
            let patched: i64 = match reloc.kind {
                RelocKind::Rel32 => {
                    i64::from(bound) - i64::from(reloc.buffer_offset + 4) + i64::from(reloc.addend)
                }
                RelocKind::Abs64 | RelocKind::AbsPtr => i64::from(bound) + i64::from(reloc.addend),
            };
            match reloc.kind {
                RelocKind::Rel32 => {
                    let v = patched as i32;
                    buffer.patch_bytes(reloc.buffer_offset, &v.to_le_bytes());
                }
                RelocKind::Abs64 | RelocKind::AbsPtr => {
                    buffer.patch_bytes(reloc.buffer_offset, &patched.to_le_bytes());
                }
            }
        }
        Ok(())
    }
}

impl Default for LabelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_once() {
        let mut mgr = LabelManager::new();
        let l = mgr.new_label(Some("loop_top"));
        assert!(mgr.resolve(l).is_none());
        mgr.bind(l, 16).unwrap();
        assert_eq!(mgr.resolve(l), Some(16));
        assert!(matches!(
            mgr.bind(l, 32),
            Err(CodegenError::AlreadyBound(_))
        ));
    }

    #[test]
    fn rel32_patch_formula() {
        let mut mgr = LabelManager::new();
        let l = mgr.new_label(None);
        mgr.bind(l, 100).unwrap();
        mgr.record_relocation(RelocKind::Rel32, 10, l, 0);
        let mut buf = CodeBuffer::new();
        buf.emit_bytes(&[0u8; 14]);
        mgr.resolve_all(&mut buf).unwrap();
        let patched = i32::from_le_bytes(buf.data()[10..14].try_into().unwrap());
        assert_eq!(patched, 100 - (10 + 4));
    }

    #[test]
    fn unbound_target_fails() {
        let mut mgr = LabelManager::new();
        let l = mgr.new_label(None);
        mgr.record_relocation(RelocKind::Rel32, 0, l, 0);
        let mut buf = CodeBuffer::new();
        buf.emit_bytes(&[0u8; 4]);
        assert!(matches!(
            mgr.resolve_all(&mut buf),
            Err(CodegenError::Unbound(_))
        ));
    }
}
