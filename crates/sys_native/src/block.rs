use std::ffi::{c_char, CString};
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

/// Magic word of a block that is currently handed out.
pub const MAGIC_LIVE: u32 = 0x4E41_5430;
/// Magic word written into a block once it has been released.
pub const MAGIC_FREED: u32 = 0xDEAD_F4EE;

/// The two object kinds the library hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlockKind {
    /// Reference-counted mini-object (caps).
    MiniObject = 1,
    /// Plain structure without a reference count.
    Structure = 2,
}

impl BlockKind {
    pub const fn index(self) -> usize {
        match self {
            Self::MiniObject => 0,
            Self::Structure => 1,
        }
    }
}

/// Common prefix of every object the library allocates.
///
/// Object pointers handed across the C boundary point at this header, the
/// same way a caps pointer is also a mini-object pointer.
#[repr(C)]
pub struct Header {
    magic: AtomicU32,
    kind: BlockKind,
    refcount: AtomicI32,
    name: *mut c_char,
}

impl Header {
    /// Allocates a fresh zeroed block with `libc::calloc`.
    ///
    /// Returns `None` when the system allocator fails.
    pub fn allocate(kind: BlockKind) -> Option<NonNull<Self>> {
        // SAFETY: calloc with a non-zero size; the result is checked for null.
        let raw = unsafe { libc::calloc(1, mem::size_of::<Self>()) }.cast::<Self>();
        let block = NonNull::new(raw)?;
        // SAFETY: the block is freshly allocated, suitably aligned by calloc
        // and large enough for a header.
        unsafe { Self::initialize(block, kind) };
        Some(block)
    }

    /// Writes a live header into `block`, overwriting whatever was there.
    ///
    /// # Safety
    ///
    /// `block` must point to memory from [`Header::allocate`] that no caller
    /// currently treats as a live object.
    pub unsafe fn initialize(block: NonNull<Self>, kind: BlockKind) {
        // SAFETY: guaranteed by the caller.
        unsafe {
            block.as_ptr().write(Self {
                magic: AtomicU32::new(MAGIC_LIVE),
                kind,
                refcount: AtomicI32::new(1),
                name: ptr::null_mut(),
            });
        }
    }

    /// Returns the block's memory to the system allocator.
    ///
    /// # Safety
    ///
    /// `block` must come from [`Header::allocate`] and must not be used again.
    pub unsafe fn deallocate(block: NonNull<Self>) {
        // SAFETY: guaranteed by the caller.
        unsafe {
            (*block.as_ptr()).clear_name();
            libc::free(block.as_ptr().cast());
        }
    }

    pub fn is_live(&self) -> bool {
        self.magic.load(Ordering::Acquire) == MAGIC_LIVE
    }

    pub fn is_poisoned(&self) -> bool {
        self.magic.load(Ordering::Acquire) == MAGIC_FREED
    }

    pub const fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn refcount(&self) -> i32 {
        if self.is_live() {
            self.refcount.load(Ordering::Acquire)
        } else {
            0
        }
    }

    pub fn inc_ref(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the count. Returns true if this dropped the last reference.
    pub fn dec_ref(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Marks the block released and drops the payload it owns.
    pub fn poison(&mut self) {
        self.magic.store(MAGIC_FREED, Ordering::Release);
        self.refcount.store(0, Ordering::Release);
        self.clear_name();
    }

    pub fn set_name(&mut self, name: CString) {
        self.clear_name();
        self.name = name.into_raw();
    }

    pub const fn name(&self) -> *const c_char {
        self.name
    }

    fn clear_name(&mut self) {
        if !self.name.is_null() {
            // SAFETY: `name` is only ever set from `CString::into_raw`.
            drop(unsafe { CString::from_raw(self.name) });
            self.name = ptr::null_mut();
        }
    }
}
