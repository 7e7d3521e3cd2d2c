//! jitforge: a cross-architecture JIT code generator core.
//!
//! The crate is organised the way the pieces line up: an
//! architecture-neutral operand/instruction IR ([`ir`], [`operand`],
//! [`virtreg`]), a linear-scan allocator ([`regalloc`]), an x86-64 machine
//! encoder ([`isa::x86`]) plus a byte-free AArch64 instruction shape
//! ([`isa::aarch64`]), and the [`compiler::UniCompiler`] façade that ties
//! all of it together behind a single cross-ISA entry point.
//!
//! There is no working `no_std` build yet: the constant pool and the
//! compiler's prologue-hook bookkeeping are both backed by
//! `std::collections::HashMap`, so the `core` feature currently only trims
//! `cranelift-entity`'s own std dependency rather than producing an
//! allocator-generic build. Nothing in this core's scope has forced that
//! work yet.

pub use cranelift_entity as entity;

pub mod buffer;
pub mod callconv;
pub mod compiler;
pub mod const_pool;
pub mod error;
pub mod inst_db;
pub mod ir;
pub mod isa;
pub mod label;
pub mod operand;
pub mod regalloc;
pub mod selection;
pub mod uniop;
pub mod virtreg;

pub use crate::callconv::CallConv;
pub use crate::compiler::UniCompiler;
pub use crate::const_pool::{ConstId, ConstPool, Scope as ConstScope};
pub use crate::error::{AllocError, CodegenError, CodegenResult};
pub use crate::isa::x86::features::CpuFeatures;
pub use crate::isa::Architecture;
pub use crate::label::LabelId;
pub use crate::operand::{Immediate, MemOperand, Operand, RegGroup, RegRef, RegType};
pub use crate::uniop::{FmaPolicy, ScalarOpBehavior, UniOp, Verb};
pub use crate::virtreg::VirtRegId;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
