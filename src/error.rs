//! Error taxonomy for the code generator.
//!
//! Every fallible entry point in this crate returns [`CodegenResult`]. Once
//! an error is produced the originating [`crate::compiler::UniCompiler`] is
//! poisoned: see [`crate::compiler`] for the propagation policy.

use crate::label::LabelId;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type CodegenResult<T> = Result<T, CodegenError>;

/// The reason a register allocation pass could not proceed.
///
/// These are all fatal: the allocator never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// A vector swap needed a scratch register but every register in the
    /// group was live.
    #[error("no free scratch register available to plan a vector swap")]
    ScratchExhausted,
    /// A use of a virtual register was recorded before any definition of it.
    #[error("virtual register used before it was defined")]
    InconsistentUse,
    /// An operand referenced a virtual register id that the compiler never
    /// created.
    #[error("reference to an unknown virtual register")]
    UnknownVirtReg,
}

/// Top-level error type returned by the core engine.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// An operand shape was invalid for the chosen instruction (wrong size,
    /// illegal ModR/M combination, etc).
    #[error("invalid encoding: {0}")]
    Encoding(String),

    /// Relocation resolution found a label with no binding.
    #[error("label {0:?} referenced by a relocation was never bound")]
    Unbound(LabelId),

    /// A label was bound a second time.
    #[error("label {0:?} is already bound")]
    AlreadyBound(LabelId),

    /// No lowering exists for the given (verb, architecture, feature) triple.
    #[error("unsupported operation: {0}")]
    UnsupportedOp(String),

    /// An operand's type or size didn't match what the verb expects.
    #[error("operand mismatch: {0}")]
    OperandMismatch(String),

    /// The register allocator could not complete its pass.
    #[error("register allocation failed: {0}")]
    Alloc(#[from] AllocError),

    /// The backing code buffer could not grow to satisfy a reservation.
    #[error("out of memory growing the code buffer")]
    OutOfMemory,

    /// An operation was attempted on a compiler that already failed once.
    ///
    /// Per spec §7 propagation policy, the first error poisons the
    /// compiler; all further calls either return this variant or are
    /// no-ops, and never deliver partial machine code.
    #[error("compiler is poisoned by a previous error")]
    Poisoned,
}
