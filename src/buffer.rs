//! Append-only machine-code byte sink.
//!
//! No truncation checks are performed here: callers must pass values that
//! already fit in the width they're emitting (spec §4.1). This mirrors
//! `cranelift-codegen`'s `binemit` sink types, which likewise trust their
//! callers to have already validated operand widths during encoding.

use crate::error::{CodegenError, CodegenResult};

/// An append-only byte sink with little-endian multi-byte emission and
/// NOP-padded alignment.
#[derive(Clone, Debug, Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        CodeBuffer { bytes: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        CodeBuffer {
            bytes: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    /// Reserve `additional` bytes against an explicit capacity budget
    /// (spec §7 `OutOfMemory`): unlike the `emit*` family, which never
    /// fails, a caller that wants a hard ceiling on a single function's
    /// code size can call this before emitting and get a typed error
    /// instead of an unbounded allocation.
    pub fn try_reserve(&mut self, additional: usize, budget: usize) -> CodegenResult<()> {
        if self.bytes.len() + additional > budget {
            return Err(CodegenError::OutOfMemory);
        }
        self.bytes.reserve(additional);
        Ok(())
    }

    pub fn emit8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    pub fn emit16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Overwrite `bytes.len()` bytes starting at `offset`. Used by
    /// [`crate::label::LabelManager::resolve_all`] to patch relocations
    /// after the fact.
    pub fn patch_bytes(&mut self, offset: u32, bytes: &[u8]) {
        let start = offset as usize;
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn set_at(&mut self, offset: u32, byte: u8) {
        self.bytes[offset as usize] = byte;
    }

    /// Pad the buffer to the next multiple of `align` bytes using
    /// architecturally-neutral NOP sequences. `nop_fill` supplies the
    /// per-architecture NOP byte sequences of length 1..=9 (x86) or a
    /// fixed-width NOP (AArch64); see [`crate::isa::x86::nop_sequence`].
    pub fn align_with_nops(&mut self, align: u32, nop_fill: impl Fn(usize) -> &'static [u8]) {
        let rem = self.len() % align;
        if rem == 0 {
            return;
        }
        let mut pad = (align - rem) as usize;
        while pad > 0 {
            let chunk = nop_fill(pad);
            self.emit_bytes(chunk);
            pad -= chunk.len();
        }
    }
}
