//! Shared primitives used across the control-plane crates: human-readable
//! size parsing, the per-VM advisory lock, a process-wide runtime context,
//! and digest helpers.

pub mod context;
pub mod digest;
pub mod lock;
pub mod size;
