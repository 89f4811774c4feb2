//! The foreign-function boundary.
//!
//! Everything the bridge knows about the native library goes through
//! [`ForeignApi`]: constructors, the two destructors, the reference-count
//! accessors and the process-wide init/deinit pair. [`NativeLibrary`] binds
//! the trait to the C ABI exported by `sys_native`; tests substitute an
//! instrumented implementation.

#![allow(clippy::ptr_as_ptr)]

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::fmt;
use std::ptr::NonNull;

use crate::error::LibraryError;

// ============================================================================
// Object kinds and addresses
// ============================================================================

/// The kind of foreign object behind a pointer.
///
/// The kind alone decides which destructor releases the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Reference-counted mini-object. Release drops one reference and the
    /// object is freed when the count reaches zero.
    MiniObject,
    /// Plain structure without a reference count. Release frees it.
    Structure,
}

impl ObjectKind {
    /// Returns `true` for kinds that carry a foreign reference count.
    #[must_use]
    pub const fn is_ref_counted(self) -> bool {
        matches!(self, Self::MiniObject)
    }

    /// Short lowercase name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MiniObject => "mini-object",
            Self::Structure => "structure",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A foreign pointer value, detached from the pointer itself.
///
/// Addresses are what the reuse records are keyed on. Holding one never
/// keeps the object alive and never allows dereferencing it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(usize);

impl Address {
    pub(crate) const fn new(address: usize) -> Self {
        Self(address)
    }

    /// The numeric address.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl From<NonNull<c_void>> for Address {
    fn from(ptr: NonNull<c_void>) -> Self {
        Self(ptr.as_ptr().addr())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

// ============================================================================
// ForeignApi
// ============================================================================

/// The operations the native library offers across its C ABI.
///
/// # Safety contract for pointer arguments
///
/// Every `unsafe` method takes a pointer that must have been returned by
/// [`ForeignApi::construct_empty`] on the same library with a matching kind,
/// and that the caller still holds a reference to.
pub trait ForeignApi {
    /// Process-wide setup. Must precede every other call.
    ///
    /// # Errors
    ///
    /// Returns an error if the library rejects `args`.
    fn init(&self, args: &[CString]) -> Result<(), LibraryError>;

    /// Matches one successful [`ForeignApi::init`].
    fn deinit(&self);

    /// Allocates a new empty object of `kind`.
    ///
    /// `tag` names the object where the kind has a name (structures); it is
    /// ignored otherwise. Returns null on failure.
    fn construct_empty(&self, kind: ObjectKind, tag: &CStr) -> *mut c_void;

    /// Takes an additional reference on a mini-object.
    ///
    /// # Safety
    ///
    /// See the trait-level contract; `ptr` must be a mini-object.
    unsafe fn acquire_ref(&self, ptr: NonNull<c_void>);

    /// Drops one reference of a mini-object, freeing it at zero.
    ///
    /// # Safety
    ///
    /// See the trait-level contract; `ptr` must be a mini-object.
    unsafe fn release_refcounted(&self, ptr: NonNull<c_void>);

    /// Frees a plain structure.
    ///
    /// # Safety
    ///
    /// See the trait-level contract; `ptr` must be a structure.
    unsafe fn release_plain(&self, ptr: NonNull<c_void>);

    /// Reads the reference count of a mini-object. Diagnostics only.
    ///
    /// # Safety
    ///
    /// See the trait-level contract; `ptr` must be a mini-object.
    unsafe fn read_refcount(&self, ptr: NonNull<c_void>) -> i32;

    /// Releases `ptr` through the destructor that matches `kind`.
    ///
    /// # Safety
    ///
    /// See the trait-level contract; `ptr` must be of kind `kind`.
    unsafe fn release(&self, kind: ObjectKind, ptr: NonNull<c_void>) {
        // SAFETY: forwarded from the caller.
        unsafe {
            match kind {
                ObjectKind::MiniObject => self.release_refcounted(ptr),
                ObjectKind::Structure => self.release_plain(ptr),
            }
        }
    }
}

impl<A: ForeignApi + ?Sized> ForeignApi for &A {
    fn init(&self, args: &[CString]) -> Result<(), LibraryError> {
        (**self).init(args)
    }

    fn deinit(&self) {
        (**self).deinit();
    }

    fn construct_empty(&self, kind: ObjectKind, tag: &CStr) -> *mut c_void {
        (**self).construct_empty(kind, tag)
    }

    unsafe fn acquire_ref(&self, ptr: NonNull<c_void>) {
        // SAFETY: forwarded from the caller.
        unsafe { (**self).acquire_ref(ptr) }
    }

    unsafe fn release_refcounted(&self, ptr: NonNull<c_void>) {
        // SAFETY: forwarded from the caller.
        unsafe { (**self).release_refcounted(ptr) }
    }

    unsafe fn release_plain(&self, ptr: NonNull<c_void>) {
        // SAFETY: forwarded from the caller.
        unsafe { (**self).release_plain(ptr) }
    }

    unsafe fn read_refcount(&self, ptr: NonNull<c_void>) -> i32 {
        // SAFETY: forwarded from the caller.
        unsafe { (**self).read_refcount(ptr) }
    }
}

// ============================================================================
// NativeLibrary
// ============================================================================

/// Allocation statistics reported by the native library.
pub use sys_native::NatStats as LibraryStats;

/// [`ForeignApi`] over the C ABI of `sys_native`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeLibrary;

impl NativeLibrary {
    /// Statistics of the running session, or `None` outside of one.
    #[must_use]
    pub fn stats(self) -> Option<LibraryStats> {
        let mut stats = LibraryStats::default();
        // SAFETY: `stats` is valid writable storage for the duration of the call.
        let status = unsafe { sys_native::nat_debug_stats(&mut stats) };
        (status == sys_native::NAT_OK).then_some(stats)
    }

    /// Returns `true` while a session is running.
    #[must_use]
    pub fn is_initialized(self) -> bool {
        sys_native::nat_is_initialized()
    }
}

impl ForeignApi for NativeLibrary {
    fn init(&self, args: &[CString]) -> Result<(), LibraryError> {
        let argv: Vec<*const c_char> = args.iter().map(|arg| arg.as_ptr()).collect();
        let argc = c_int::try_from(argv.len()).map_err(|_| LibraryError::TooManyArguments)?;
        // SAFETY: `argv` holds `argc` NUL-terminated strings borrowed from
        // `args`, which outlives the call.
        let status = unsafe { sys_native::nat_init(argc, argv.as_ptr()) };
        match status {
            sys_native::NAT_OK => Ok(()),
            sys_native::NAT_ERR_INVALID_ARGUMENT => Err(LibraryError::Rejected),
            sys_native::NAT_ERR_CONFLICT => Err(LibraryError::Conflict),
            status => Err(LibraryError::InitFailed { status }),
        }
    }

    fn deinit(&self) {
        sys_native::nat_deinit();
    }

    fn construct_empty(&self, kind: ObjectKind, tag: &CStr) -> *mut c_void {
        match kind {
            ObjectKind::MiniObject => sys_native::nat_caps_new_empty().cast(),
            // SAFETY: `tag` is a valid NUL-terminated string.
            ObjectKind::Structure => unsafe { sys_native::nat_structure_new_empty(tag.as_ptr()) }.cast(),
        }
    }

    unsafe fn acquire_ref(&self, ptr: NonNull<c_void>) {
        // SAFETY: forwarded from the caller.
        unsafe { sys_native::nat_mini_object_ref(ptr.as_ptr().cast()) };
    }

    unsafe fn release_refcounted(&self, ptr: NonNull<c_void>) {
        // SAFETY: forwarded from the caller.
        unsafe { sys_native::nat_mini_object_unref(ptr.as_ptr().cast()) };
    }

    unsafe fn release_plain(&self, ptr: NonNull<c_void>) {
        // SAFETY: forwarded from the caller.
        unsafe { sys_native::nat_structure_free(ptr.as_ptr().cast()) };
    }

    unsafe fn read_refcount(&self, ptr: NonNull<c_void>) -> i32 {
        // SAFETY: forwarded from the caller.
        unsafe { sys_native::nat_mini_object_refcount(ptr.as_ptr().cast()) }
    }
}
