//! Executable-memory management for generated code.
//!
//! The [`JitMemoryManager`] hands out blocks of writable memory, copies
//! finished code into them, and flips the pages to read-execute. It is the
//! only intentionally shared mutable piece of the backend; a single mutex
//! serializes every operation.

mod memory;

pub use memory::{JitError, JitMemory, JitMemoryManager};
