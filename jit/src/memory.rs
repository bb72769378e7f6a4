//! Block-allocated executable pages.

use log::{debug, trace};
use region::{Allocation, Protection};
use std::sync::Mutex;
use thiserror::Error;

/// Minimum size of a fresh block; small allocations bump-allocate out of
/// shared blocks.
const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Errors surfaced by the memory manager. Everything else in the backend
/// is an assertion; running out of executable memory is a real condition
/// the caller must report to the user.
#[derive(Error, Debug)]
pub enum JitError {
    #[error("executable-memory allocation of {size} bytes failed: {source}")]
    AllocationFailed {
        size: usize,
        source: region::Error,
    },
    #[error("changing page protection failed: {0}")]
    ProtectionFailed(#[from] region::Error),
}

/// A span of memory handed out by the manager.
///
/// The handle does not own the pages; the manager that produced it does,
/// and must outlive every use of the span. Executing the code after
/// [`JitMemoryManager::make_executable`] is inherently `unsafe` and in the
/// caller's hands.
#[derive(Debug, Clone, Copy)]
pub struct JitMemory {
    ptr: *mut u8,
    size: u32,
    allocation_size: u32,
}

impl Default for JitMemory {
    fn default() -> Self {
        JitMemory {
            ptr: std::ptr::null_mut(),
            size: 0,
            allocation_size: 0,
        }
    }
}

impl JitMemory {
    pub fn reset(&mut self) {
        *self = JitMemory::default();
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.ptr.is_null()
    }

    /// First byte of the span; the entry point once code was copied in.
    pub fn entry_point(&self) -> *const u8 {
        self.ptr
    }
}

// The raw pointer is a plain address into manager-owned pages.
unsafe impl Send for JitMemory {}

struct Block {
    alloc: Allocation,
    allocated: usize,
}

impl Block {
    fn free(&self) -> usize {
        self.alloc.len() - self.allocated
    }
}

/// Thread-safe bump allocator over executable-to-be pages.
///
/// Blocks are created read-write, filled, and flipped to read-execute;
/// writing to a span after [`JitMemoryManager::make_executable`] is
/// undefined. All blocks are released when the manager drops.
pub struct JitMemoryManager {
    blocks: Mutex<Vec<Block>>,
}

// All access to the raw pointers inside `blocks` is mediated by the
// `Mutex`, so the manager is safe to share and send across threads.
unsafe impl Send for JitMemoryManager {}
unsafe impl Sync for JitMemoryManager {}

impl JitMemoryManager {
    pub fn new() -> Self {
        JitMemoryManager {
            blocks: Mutex::new(Vec::new()),
        }
    }

    /// Reserve `size` bytes of read-write memory.
    pub fn allocate(&self, size: u32) -> Result<JitMemory, JitError> {
        assert!(size > 0, "zero-sized executable allocations are a bug");
        let mut blocks = self.blocks.lock().unwrap();
        let needed = size as usize;

        let index = match blocks.iter().position(|block| block.free() >= needed) {
            Some(index) => index,
            None => {
                let block_size = needed.max(DEFAULT_BLOCK_SIZE);
                let alloc = region::alloc(block_size, Protection::READ_WRITE).map_err(|source| {
                    JitError::AllocationFailed {
                        size: block_size,
                        source,
                    }
                })?;
                debug!("new executable block: {} bytes", alloc.len());
                blocks.push(Block {
                    alloc,
                    allocated: 0,
                });
                blocks.len() - 1
            }
        };

        let block = &mut blocks[index];
        let ptr = unsafe { block.alloc.as_mut_ptr::<u8>().add(block.allocated) };
        block.allocated += needed;
        trace!("allocated {needed} bytes in block {index}");
        Ok(JitMemory {
            ptr,
            size,
            allocation_size: needed as u32,
        })
    }

    /// Reserve memory and copy `bytes` into it.
    pub fn allocate_and_copy(&self, bytes: &[u8]) -> Result<JitMemory, JitError> {
        let memory = self.allocate(bytes.len() as u32)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), memory.ptr, bytes.len());
        }
        Ok(memory)
    }

    /// Flip a span's pages to read-execute. Any later write through the
    /// span is undefined.
    pub fn make_executable(&self, memory: &JitMemory) -> Result<(), JitError> {
        assert!(!memory.is_empty());
        // Hold the lock so a concurrent allocation cannot race the
        // protection flip on a shared page. Write permission stays on:
        // protection is page-granular and other spans bump-allocated from
        // the same page may still be waiting for their copy.
        let _guard = self.blocks.lock().unwrap();
        unsafe {
            region::protect(
                memory.ptr,
                memory.allocation_size as usize,
                Protection::READ_WRITE_EXECUTE,
            )?;
        }
        Ok(())
    }
}

impl Default for JitMemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_share_a_block() {
        let manager = JitMemoryManager::new();
        let a = manager.allocate(64).unwrap();
        let b = manager.allocate(64).unwrap();
        assert!(!a.is_empty() && !b.is_empty());
        // Bump allocation from the same 64 KiB block.
        assert_eq!(a.entry_point() as usize + 64, b.entry_point() as usize);
    }

    #[test]
    fn large_allocations_get_their_own_block() {
        let manager = JitMemoryManager::new();
        let big = manager.allocate(256 * 1024).unwrap();
        assert_eq!(big.size(), 256 * 1024);
    }

    #[test]
    fn copy_writes_the_bytes() {
        let manager = JitMemoryManager::new();
        let code = [0xb8, 0x2a, 0x00, 0x00, 0x00, 0xc3];
        let memory = manager.allocate_and_copy(&code).unwrap();
        let copied = unsafe { std::slice::from_raw_parts(memory.entry_point(), code.len()) };
        assert_eq!(copied, &code);
    }

    #[test]
    fn handles_reset() {
        let manager = JitMemoryManager::new();
        let mut memory = manager.allocate(16).unwrap();
        assert!(!memory.is_empty());
        memory.reset();
        assert!(memory.is_empty());
        assert_eq!(memory.size(), 0);
    }

    #[test]
    fn concurrent_allocation_is_serialized() {
        use std::sync::Arc;
        let manager = Arc::new(JitMemoryManager::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = Arc::clone(&manager);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    manager.allocate(32).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
