//! Execution engine: environment, linker, interpreter and diagnostics.

pub mod environment;
pub mod link;
pub mod memory;
pub mod numeric;
pub mod thread;
pub mod trace;
pub mod value;

pub use environment::{Environment, HostError, HostFunc, HostModule};
pub use link::{FuncHandle, LinkError, LinkingPolicy, LinkingThreadOptions, Runtime};
pub use memory::RuntimeMemory;
pub use thread::Thread;
pub use value::{TypedValue, Value};

use thiserror::Error;

/// Non-recoverable outcome of a call chain. `Ok(())` from a call means the
/// function returned; every abort maps to exactly one of these.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    #[error("out of bounds memory access")]
    MemoryAccessOutOfBounds,
    #[error("atomic memory access is unaligned")]
    AtomicMemoryAccessUnaligned,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    #[error("undefined table index")]
    UndefinedTableIndex,
    #[error("uninitialized table element")]
    UninitializedTableElement,
    #[error("unreachable executed")]
    Unreachable,
    #[error("indirect call signature mismatch")]
    IndirectCallSignatureMismatch,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("value stack exhausted")]
    ValueStackExhausted,
    #[error("host result type mismatch")]
    HostResultTypeMismatch,
    #[error("host function trapped")]
    HostTrapped,
    #[error("argument type mismatch")]
    ArgumentTypeMismatch,
    #[error("unknown export")]
    UnknownExport,
    #[error("export kind mismatch")]
    ExportKindMismatch,
}

/// Result of a `call_safe`: `Ok(())` is `Returned`, `Err` carries the trap.
pub type ThreadResult = Result<(), Trap>;
