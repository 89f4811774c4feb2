//! A small native object library with a C ABI.
//!
//! The library hands out two kinds of objects: reference-counted
//! mini-objects (caps) and plain structures. Every entry point is
//! `extern "C"` so that bindings reach it exactly as they would reach any
//! other native library.
//!
//! All use must be bracketed by [`nat_init`] and [`nat_deinit`]. Calls nest:
//! the library is torn down when the last `nat_init` is matched.
//!
//! # Allocation policy
//!
//! Released objects are poisoned. Under the default `quarantine` policy the
//! poisoned blocks stay out of circulation until teardown, so an address is
//! never handed out twice within a session and a second release of the same
//! object is detected instead of freeing twice. Passing
//! `--nat-alloc=pooled` to `nat_init` recycles freed blocks instead, most
//! recently freed first.
//!
//! Without `--nat-quarantine-limit=N` the quarantine is unbounded: memory
//! held by a session grows with every allocation it makes until the last
//! `nat_deinit`. With a limit, the oldest poisoned blocks go back to the
//! system allocator and their addresses may be handed out again.

#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr::{self, NonNull};

mod block;
mod library;
mod options;

use block::{BlockKind, Header};
use library::InitOutcome;

pub use options::{AllocPolicy, BadArgument, InitOptions};

/// Success.
pub const NAT_OK: c_int = 0;
/// An argument is null or could not be parsed.
pub const NAT_ERR_INVALID_ARGUMENT: c_int = -1;
/// `nat_init` options differ from those of the running session.
pub const NAT_ERR_CONFLICT: c_int = -2;
/// The library has not been initialized.
pub const NAT_ERR_NOT_INITIALIZED: c_int = -3;

/// Opaque reference-counted object.
#[repr(C)]
pub struct NatMiniObject {
    _private: [u8; 0],
}

/// Opaque caps object. A caps pointer is also a [`NatMiniObject`] pointer.
#[repr(C)]
pub struct NatCaps {
    _private: [u8; 0],
}

/// Opaque structure without a reference count.
#[repr(C)]
pub struct NatStructure {
    _private: [u8; 0],
}

/// Allocation statistics of the running session.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NatStats {
    /// Objects handed out and not yet retired.
    pub live_objects: u64,
    /// Objects handed out since `nat_init`.
    pub total_allocations: u64,
    /// Releases of objects that were already released.
    pub double_releases: u64,
    /// Releases of pointers that are not live objects of the expected kind.
    pub invalid_releases: u64,
    /// Poisoned blocks held in quarantine.
    pub quarantined: u64,
    /// Poisoned blocks waiting in the recycling pools.
    pub pooled: u64,
}

/// Initializes the library, parsing `--nat-*` options from `argv`.
///
/// Returns [`NAT_OK`] on success, [`NAT_ERR_INVALID_ARGUMENT`] if an option
/// cannot be parsed, or [`NAT_ERR_CONFLICT`] if the library is already
/// running with different options.
#[no_mangle]
pub unsafe extern "C" fn nat_init(argc: c_int, argv: *const *const c_char) -> c_int {
    // SAFETY: forwarded from the caller.
    let Ok(options) = (unsafe { InitOptions::from_argv(argc, argv) }) else {
        return NAT_ERR_INVALID_ARGUMENT;
    };
    match library::init(options) {
        InitOutcome::Started | InitOutcome::Joined => NAT_OK,
        InitOutcome::Conflict => NAT_ERR_CONFLICT,
    }
}

/// Matches one [`nat_init`]. The last call frees every retained block.
#[no_mangle]
pub extern "C" fn nat_deinit() {
    library::deinit();
}

/// Returns true between the first `nat_init` and the last `nat_deinit`.
#[no_mangle]
pub extern "C" fn nat_is_initialized() -> bool {
    library::is_initialized()
}

/// Creates empty caps with a reference count of one.
///
/// Returns null if the library is not initialized or allocation fails.
#[no_mangle]
pub extern "C" fn nat_caps_new_empty() -> *mut NatCaps {
    library::allocate(BlockKind::MiniObject).map_or(ptr::null_mut(), |block| block.as_ptr().cast())
}

/// Creates an empty structure called `name`.
///
/// Returns null if `name` is null, the library is not initialized, or
/// allocation fails.
#[no_mangle]
pub unsafe extern "C" fn nat_structure_new_empty(name: *const c_char) -> *mut NatStructure {
    if name.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: non-null names are NUL-terminated per the C contract.
    let name = CString::from(unsafe { CStr::from_ptr(name) });
    let Some(mut block) = library::allocate(BlockKind::Structure) else {
        return ptr::null_mut();
    };
    // SAFETY: the block was just handed out and is owned by this call.
    unsafe { block.as_mut() }.set_name(name);
    block.as_ptr().cast()
}

/// Takes an additional reference on a mini-object.
#[no_mangle]
pub unsafe extern "C" fn nat_mini_object_ref(object: *mut NatMiniObject) -> *mut NatMiniObject {
    if let Some(header) = live_header(object.cast(), BlockKind::MiniObject) {
        // SAFETY: checked live above; the caller owns a reference.
        unsafe { header.as_ref() }.inc_ref();
    }
    object
}

/// Drops one reference of a mini-object, retiring it at zero.
#[no_mangle]
pub unsafe extern "C" fn nat_mini_object_unref(object: *mut NatMiniObject) {
    if let Some(block) = NonNull::new(object.cast::<Header>()) {
        // SAFETY: the caller passes a pointer obtained from this library.
        unsafe { library::release(block, BlockKind::MiniObject) };
    }
}

/// Current reference count of a mini-object, 0 once it has been released.
#[no_mangle]
pub unsafe extern "C" fn nat_mini_object_refcount(object: *const NatMiniObject) -> c_int {
    NonNull::new(object.cast_mut().cast::<Header>())
        // SAFETY: the caller passes a pointer obtained from this library.
        .map_or(0, |block| unsafe { block.as_ref() }.refcount())
}

/// Frees a structure.
#[no_mangle]
pub unsafe extern "C" fn nat_structure_free(structure: *mut NatStructure) {
    if let Some(block) = NonNull::new(structure.cast::<Header>()) {
        // SAFETY: the caller passes a pointer obtained from this library.
        unsafe { library::release(block, BlockKind::Structure) };
    }
}

/// Name of a live structure, or null. The string is owned by the structure.
#[no_mangle]
pub unsafe extern "C" fn nat_structure_name(structure: *const NatStructure) -> *const c_char {
    match live_header(structure.cast_mut().cast(), BlockKind::Structure) {
        // SAFETY: checked live above.
        Some(header) => unsafe { header.as_ref() }.name(),
        None => ptr::null(),
    }
}

/// Copies the session statistics into `out`.
#[no_mangle]
pub unsafe extern "C" fn nat_debug_stats(out: *mut NatStats) -> c_int {
    if out.is_null() {
        return NAT_ERR_INVALID_ARGUMENT;
    }
    let Some(stats) = library::stats() else {
        return NAT_ERR_NOT_INITIALIZED;
    };
    // SAFETY: `out` is non-null and points to writable storage per the C contract.
    unsafe { out.write(stats) };
    NAT_OK
}

fn live_header(object: *mut Header, kind: BlockKind) -> Option<NonNull<Header>> {
    let block = NonNull::new(object)?;
    // SAFETY: callers only pass pointers obtained from this library.
    let header = unsafe { block.as_ref() };
    (header.is_live() && header.kind() == kind).then_some(block)
}

// Library state is process-wide; unit tests that touch it take this lock.
#[cfg(test)]
static TEST_SERIAL: parking_lot::Mutex<()> = parking_lot::Mutex::new(());
