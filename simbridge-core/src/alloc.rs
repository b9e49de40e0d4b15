//! # Allocator Bridge
//!
//! Every byte handed back to a host caller (duplicated strings, copied-out
//! records, error detail strings) is obtained through the host's allocator so
//! that the host can release it with its own `free`.
//!
//! ```text
//!   host                          simbridge
//!   ────                          ─────────
//!   alloc(size, ctx) ◄─────────── Allocator::allocate / dup_str / copy_slice
//!   free(ptr, ctx)   ◄─────────── HostBuffer::drop  (or host, after into_raw)
//!
//!   detached buffers:  [ header: *Allocator | payload ... ]
//!                                             ▲
//!                          release_detached(payload) frees the whole block
//! ```
//!
//! A null return from `alloc` is reported as `OutOfMemory` and never retried.

use std::alloc::{self as std_alloc, Layout};
use std::ffi::c_void;
use std::fmt;
use std::mem::{self, ManuallyDrop};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{QueryHit, SparseElement};

/// `void* (*alloc)(size_t size, void* ctx)`
pub type AllocFn = unsafe extern "C" fn(size: usize, ctx: *mut c_void) -> *mut c_void;
/// `void (*free)(void* ptr, void* ctx)`
pub type FreeFn = unsafe extern "C" fn(ptr: *mut c_void, ctx: *mut c_void);
/// Free function handed out alongside detached buffers
pub type ReleaseFn = unsafe extern "C" fn(ptr: *mut c_void);

/// C layout of a host allocator
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawAllocator {
    pub alloc: Option<AllocFn>,
    pub free: Option<FreeFn>,
    pub ctx: *mut c_void,
}

/// Memory provider for buffers crossing the boundary
pub trait HostAllocator: Send + Sync {
    /// Allocate `size` bytes; `None` means the host is out of memory
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this allocator and not
    /// freed since.
    unsafe fn deallocate(&self, ptr: NonNull<u8>);
}

/// Host allocator built from C callbacks
pub struct CallbackAllocator {
    alloc: AllocFn,
    free: FreeFn,
    ctx: *mut c_void,
}

// The host promises its callbacks may be invoked from any thread with `ctx`.
unsafe impl Send for CallbackAllocator {}
unsafe impl Sync for CallbackAllocator {}

impl CallbackAllocator {
    /// # Safety
    ///
    /// The callbacks must behave like `malloc`/`free` for the given `ctx` and
    /// stay valid for as long as any object created with this allocator lives.
    pub unsafe fn from_raw(raw: &RawAllocator) -> Result<Self> {
        match (raw.alloc, raw.free) {
            (Some(alloc), Some(free)) => Ok(Self { alloc, free, ctx: raw.ctx }),
            (None, _) => Err(Error::invalid_argument("allocator has no alloc callback")),
            (_, None) => Err(Error::invalid_argument("allocator has no free callback")),
        }
    }
}

impl HostAllocator for CallbackAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let ptr = unsafe { (self.alloc)(size, self.ctx) };
        NonNull::new(ptr as *mut u8)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        (self.free)(ptr.as_ptr() as *mut c_void, self.ctx);
    }
}

impl fmt::Debug for CallbackAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackAllocator").field("ctx", &self.ctx).finish()
    }
}

const SYSTEM_HEADER: usize = 16;

/// Process allocator, for Rust callers that have no host allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl HostAllocator for SystemAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let total = size.checked_add(SYSTEM_HEADER)?;
        let layout = Layout::from_size_align(total, SYSTEM_HEADER).ok()?;
        unsafe {
            let base = NonNull::new(std_alloc::alloc(layout))?;
            ptr::write(base.as_ptr() as *mut usize, total);
            NonNull::new(base.as_ptr().add(SYSTEM_HEADER))
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        let base = ptr.as_ptr().sub(SYSTEM_HEADER);
        let total = ptr::read(base as *const usize);
        let layout = Layout::from_size_align_unchecked(total, SYSTEM_HEADER);
        std_alloc::dealloc(base, layout);
    }
}

/// Plain-old-data element types that may be copied into host memory byte-wise.
///
/// # Safety
///
/// Implementors must have no padding bytes.
pub unsafe trait HostPod: Copy + 'static {}

unsafe impl HostPod for u8 {}
unsafe impl HostPod for i32 {}
unsafe impl HostPod for u32 {}
unsafe impl HostPod for f32 {}
unsafe impl HostPod for SparseElement {}
unsafe impl HostPod for QueryHit {}

const DETACHED_HEADER: usize = 16;

/// Shared handle to a host allocator
#[derive(Clone)]
pub struct Allocator {
    inner: Arc<dyn HostAllocator>,
}

impl Allocator {
    pub fn new<A: HostAllocator + 'static>(allocator: A) -> Self {
        Self { inner: Arc::new(allocator) }
    }

    pub fn system() -> Self {
        Self::new(SystemAllocator)
    }

    /// # Safety
    ///
    /// See [`CallbackAllocator::from_raw`].
    pub unsafe fn from_raw(raw: &RawAllocator) -> Result<Self> {
        Ok(Self::new(CallbackAllocator::from_raw(raw)?))
    }

    fn raw_allocate(&self, size: usize) -> Result<NonNull<u8>> {
        self.inner.allocate(size).ok_or_else(|| Error::out_of_memory(size))
    }

    /// Allocate `size` uninitialized-but-zeroed bytes
    pub fn allocate(&self, size: usize) -> Result<HostBuffer> {
        let base = self.raw_allocate(size)?;
        unsafe { ptr::write_bytes(base.as_ptr(), 0, size) };
        Ok(HostBuffer { base, offset: 0, len: size, allocator: self.clone() })
    }

    /// NUL-terminated copy of `s`; `len()` includes the terminator
    pub fn dup_str(&self, s: &str) -> Result<HostBuffer> {
        self.dup_bytes(s.as_bytes())
    }

    /// NUL-terminated copy of raw character data
    pub fn dup_bytes(&self, bytes: &[u8]) -> Result<HostBuffer> {
        let len = bytes.len() + 1;
        let base = self.raw_allocate(len)?;
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), base.as_ptr(), bytes.len());
            *base.as_ptr().add(bytes.len()) = 0;
        }
        Ok(HostBuffer { base, offset: 0, len, allocator: self.clone() })
    }

    /// Byte-wise copy of `values`, freed with the host's `free`
    pub fn copy_slice<T: HostPod>(&self, values: &[T]) -> Result<HostBuffer> {
        let len = mem::size_of_val(values);
        let base = self.raw_allocate(len)?;
        unsafe { ptr::copy_nonoverlapping(values.as_ptr() as *const u8, base.as_ptr(), len) };
        Ok(HostBuffer { base, offset: 0, len, allocator: self.clone() })
    }

    /// Byte-wise copy of `values` that the host releases through
    /// [`release_detached`] without knowing the allocator
    pub fn copy_detached<T: HostPod>(&self, values: &[T]) -> Result<HostBuffer> {
        let len = mem::size_of_val(values);
        let total = len
            .checked_add(DETACHED_HEADER)
            .ok_or_else(|| Error::out_of_memory(usize::MAX))?;
        let base = self.raw_allocate(total)?;
        let owner = Box::into_raw(Box::new(self.clone()));
        unsafe {
            ptr::write_unaligned(base.as_ptr() as *mut *mut Allocator, owner);
            ptr::copy_nonoverlapping(
                values.as_ptr() as *const u8,
                base.as_ptr().add(DETACHED_HEADER),
                len,
            );
        }
        Ok(HostBuffer { base, offset: DETACHED_HEADER, len, allocator: self.clone() })
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator").finish_non_exhaustive()
    }
}

/// Release a buffer produced by [`Allocator::copy_detached`].
///
/// # Safety
///
/// `ptr` must be the payload pointer of a detached buffer released to the
/// host with [`HostBuffer::into_raw`], or null.
pub unsafe extern "C" fn release_detached(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    let base = (ptr as *mut u8).sub(DETACHED_HEADER);
    let owner = ptr::read_unaligned(base as *const *mut Allocator);
    let allocator = Box::from_raw(owner);
    allocator.inner.deallocate(NonNull::new_unchecked(base));
}

/// Memory obtained from a host allocator
pub struct HostBuffer {
    base: NonNull<u8>,
    offset: usize,
    len: usize,
    allocator: Allocator,
}

// The buffer exclusively owns its block; the allocator is Send + Sync.
unsafe impl Send for HostBuffer {}

impl HostBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when the host must release it with [`release_detached`]
    pub fn is_detached(&self) -> bool {
        self.offset == DETACHED_HEADER
    }

    pub fn as_ptr(&self) -> *const u8 {
        unsafe { self.base.as_ptr().add(self.offset) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// Typed view, `None` if the host memory is misaligned for `T`
    pub fn as_slice<T: HostPod>(&self) -> Option<&[T]> {
        let size = mem::size_of::<T>();
        let ptr = self.as_ptr();
        if size == 0 || self.len % size != 0 || ptr.align_offset(mem::align_of::<T>()) != 0 {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts(ptr as *const T, self.len / size) })
    }

    /// Hand ownership to the host, returning the payload pointer.
    ///
    /// Plain buffers are freed with the allocator's `free`; detached ones
    /// with [`release_detached`].
    pub fn into_raw(self) -> *mut u8 {
        let this = ManuallyDrop::new(self);
        let allocator = unsafe { ptr::read(&this.allocator) };
        drop(allocator);
        unsafe { this.base.as_ptr().add(this.offset) }
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        unsafe {
            if self.is_detached() {
                release_detached(self.base.as_ptr().add(self.offset) as *mut c_void);
            } else {
                self.allocator.inner.deallocate(self.base);
            }
        }
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer")
            .field("len", &self.len)
            .field("detached", &self.is_detached())
            .finish()
    }
}
