//! Unmanaged memory: the only path by which native byte buffers are created
//! or destroyed.
//!
//! An [`UnmanagedBuffer`] is an owning handle to a raw heap block whose
//! address can be handed to a native library. Freeing is idempotent, and
//! dropping the handle frees it if the owner never did.

use std::alloc::{self, Layout};
use std::cell::Cell;
use std::fmt;
use std::ptr::{self, NonNull};

use crate::error::{MarshalError, Result};

/// Alignment of every block; matches what `malloc` guarantees.
const BLOCK_ALIGN: usize = 16;

/// Allocation counters for the calling thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    /// Blocks allocated.
    pub allocations: u64,
    /// Blocks freed.
    pub frees: u64,
}

impl AllocationStats {
    /// Blocks allocated and not yet freed.
    pub fn live(&self) -> u64 {
        self.allocations.saturating_sub(self.frees)
    }

    /// Counters accumulated since an earlier snapshot.
    pub fn since(&self, earlier: AllocationStats) -> AllocationStats {
        AllocationStats {
            allocations: self.allocations.saturating_sub(earlier.allocations),
            frees: self.frees.saturating_sub(earlier.frees),
        }
    }
}

thread_local! {
    static STATS: Cell<AllocationStats> = const {
        Cell::new(AllocationStats {
            allocations: 0,
            frees: 0,
        })
    };
}

/// Snapshot of the allocation counters of the calling thread.
pub fn thread_stats() -> AllocationStats {
    STATS.with(Cell::get)
}

fn record(update: impl FnOnce(&mut AllocationStats)) {
    STATS.with(|cell| {
        let mut stats = cell.get();
        update(&mut stats);
        cell.set(stats);
    });
}

fn block_layout(size: usize) -> Result<Layout> {
    // Zero-sized requests still get a real block so the handle is non-null.
    Layout::from_size_align(size.max(1), BLOCK_ALIGN).map_err(|_| MarshalError::OutOfMemory { size })
}

/// Owning handle to a block of unmanaged memory.
pub struct UnmanagedBuffer {
    ptr: Option<NonNull<u8>>,
    size: usize,
}

// SAFETY: the block is exclusively owned by the handle; no aliases escape
// except as raw addresses handed to native code for the duration of a call.
unsafe impl Send for UnmanagedBuffer {}

impl fmt::Debug for UnmanagedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnmanagedBuffer")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("size", &self.size)
            .finish()
    }
}

impl UnmanagedBuffer {
    /// Allocate a zeroed block of `size` bytes.
    ///
    /// `size == 0` is legal and yields a non-null, freeable handle.
    pub fn allocate(size: usize) -> Result<Self> {
        let layout = block_layout(size)?;
        // SAFETY: `layout` has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(MarshalError::OutOfMemory { size })?;
        record(|s| s.allocations += 1);
        tracing::debug!(size, address = ?ptr, "allocated unmanaged buffer");
        Ok(Self {
            ptr: Some(ptr),
            size,
        })
    }

    /// Allocate a block holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buffer = Self::allocate(bytes.len())?;
        buffer.copy_into(bytes)?;
        Ok(buffer)
    }

    /// Like [`from_bytes`](Self::from_bytes), but an empty slice maps to no
    /// buffer at all (a null pointer on the native side).
    pub fn from_bytes_or_null(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.is_empty() {
            return Ok(None);
        }
        Self::from_bytes(bytes).map(Some)
    }

    fn live(&self, operation: &'static str) -> Result<NonNull<u8>> {
        self.ptr.ok_or(MarshalError::UseAfterRelease { operation })
    }

    /// Write exactly `bytes.len()` bytes at the start of the block.
    pub fn copy_into(&mut self, bytes: &[u8]) -> Result<()> {
        let ptr = self.live("copy_into")?;
        if bytes.len() > self.size {
            return Err(MarshalError::BufferTooSmall {
                needed: bytes.len(),
                capacity: self.size,
            });
        }
        // SAFETY: the block is live and at least `bytes.len()` long; a
        // borrowed slice cannot overlap a block we exclusively own.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len()) };
        Ok(())
    }

    /// Copy of the current block contents.
    pub fn read(&self) -> Result<Vec<u8>> {
        let ptr = self.live("read")?;
        // SAFETY: the block is live, initialized (zeroed on allocation), and
        // `size` bytes long.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size) };
        Ok(bytes.to_vec())
    }

    /// Address of the block, or `0` once freed.
    pub fn address(&self) -> usize {
        self.ptr.map_or(0, |p| p.as_ptr() as usize)
    }

    /// Raw pointer for native calls; null once freed.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.map_or(ptr::null(), |p| p.as_ptr() as *const u8)
    }

    /// Mutable raw pointer for native calls that fill the block; null once freed.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Size in bytes; `0` once freed.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_freed(&self) -> bool {
        self.ptr.is_none()
    }

    /// Release the block. Calling this again is a no-op.
    pub fn free(&mut self) {
        let Some(ptr) = self.ptr.take() else {
            return;
        };
        // The layout was valid at allocation time, so it still is.
        if let Ok(layout) = block_layout(self.size) {
            // SAFETY: `ptr` came from `alloc_zeroed` with this exact layout
            // and has been taken out of the handle, so it is freed once.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
            record(|s| s.frees += 1);
            tracing::debug!(size = self.size, address = ?ptr, "freed unmanaged buffer");
        }
        self.size = 0;
    }
}

impl Drop for UnmanagedBuffer {
    fn drop(&mut self) {
        self.free();
    }
}

/// Read an optional buffer; `None` reads as empty.
pub(crate) fn read_or_empty(buffer: &Option<UnmanagedBuffer>) -> Result<Vec<u8>> {
    match buffer {
        Some(b) => b.read(),
        None => Ok(Vec::new()),
    }
}

/// Free an optional buffer in place, leaving `None`.
pub(crate) fn free_slot(buffer: &mut Option<UnmanagedBuffer>) {
    if let Some(mut b) = buffer.take() {
        b.free();
    }
}

/// Address of an optional buffer; `None` is the null pointer.
pub(crate) fn address_or_null(buffer: &Option<UnmanagedBuffer>) -> usize {
    buffer.as_ref().map_or(0, UnmanagedBuffer::address)
}
