//! The `ForeignHandle` ownership wrapper.
//!
//! A handle wraps exactly one foreign pointer and remembers whether it is
//! responsible for releasing it. Ownership is checked in one place,
//! [`ForeignHandle::release`], which both the explicit call and `Drop` go
//! through.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::LifecycleError;
use crate::ffi::{Address, ForeignApi, NativeLibrary, ObjectKind};
use crate::metrics::record;

/// Process-unique identity of a handle, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    fn next() -> Self {
        static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric identity.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who is responsible for releasing the wrapped pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The handle releases the pointer exactly once.
    Owned,
    /// Someone else releases the pointer; the handle never will.
    Disowned,
    /// The handle has released the pointer. Nothing else is well-defined.
    Released,
}

/// A foreign pointer together with the responsibility for releasing it.
///
/// The handle's [`ObjectKind`] selects the destructor: mini-objects drop one
/// reference, structures are freed.
///
/// # Examples
///
/// ```ignore
/// use native_bridge::{ForeignHandle, NativeLibrary, ObjectKind};
///
/// let raw = NativeLibrary.construct_empty(ObjectKind::MiniObject, c"caps");
/// let mut caps = ForeignHandle::wrap(NativeLibrary, ObjectKind::MiniObject, raw)?;
/// caps.disown();
/// caps.release()?; // no-op: someone else owns it now
/// ```
pub struct ForeignHandle<A: ForeignApi = NativeLibrary> {
    ptr: NonNull<c_void>,
    kind: ObjectKind,
    ownership: Ownership,
    id: HandleId,
    api: A,
}

impl<A: ForeignApi> ForeignHandle<A> {
    /// Takes ownership of `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidPointer`] if `raw` is null.
    pub fn wrap(api: A, kind: ObjectKind, raw: *mut c_void) -> Result<Self, LifecycleError> {
        Self::with_ownership(api, kind, raw, Ownership::Owned)
    }

    /// Wraps `raw` without taking ownership of it.
    ///
    /// The handle starts out disowned and never releases the pointer.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidPointer`] if `raw` is null.
    pub fn wrap_unowned(api: A, kind: ObjectKind, raw: *mut c_void) -> Result<Self, LifecycleError> {
        Self::with_ownership(api, kind, raw, Ownership::Disowned)
    }

    fn with_ownership(
        api: A,
        kind: ObjectKind,
        raw: *mut c_void,
        ownership: Ownership,
    ) -> Result<Self, LifecycleError> {
        let ptr = NonNull::new(raw).ok_or(LifecycleError::InvalidPointer { kind })?;
        let handle = Self {
            ptr,
            kind,
            ownership,
            id: HandleId::next(),
            api,
        };
        record(|m| m.wrapped += 1);
        tracing::trace!(handle = %handle.id, %kind, pointer = %handle.address(), ?ownership, "wrap");
        Ok(handle)
    }

    /// The wrapped pointer, whatever the ownership state.
    #[must_use]
    pub const fn raw_pointer(&self) -> NonNull<c_void> {
        self.ptr
    }

    /// The wrapped pointer as an [`Address`].
    #[must_use]
    pub fn address(&self) -> Address {
        Address::from(self.ptr)
    }

    /// Kind of the wrapped object.
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Identity of this handle.
    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    /// Current ownership state.
    #[must_use]
    pub const fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Returns `true` while the handle is responsible for releasing.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self.ownership, Ownership::Owned)
    }

    /// The foreign API this handle releases through.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Hands responsibility for the pointer to someone else.
    ///
    /// Has no effect on the foreign object. Disowning twice is the same as
    /// disowning once, and a released handle stays released.
    pub fn disown(&mut self) {
        if self.ownership == Ownership::Owned {
            self.ownership = Ownership::Disowned;
            record(|m| m.disowned += 1);
            tracing::trace!(handle = %self.id, pointer = %self.address(), "disown");
        }
    }

    /// Releases the pointer if this handle owns it.
    ///
    /// An owned handle invokes its kind's destructor exactly once and
    /// becomes [`Ownership::Released`]. A disowned handle does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::DoubleRelease`] if the handle was already
    /// released. The destructor is not called again.
    pub fn release(&mut self) -> Result<(), LifecycleError> {
        match self.ownership {
            Ownership::Owned => {
                self.ownership = Ownership::Released;
                // SAFETY: the pointer came from the foreign constructor of
                // `kind` and this handle held the reference being dropped.
                unsafe { self.api.release(self.kind, self.ptr) };
                record(|m| m.released += 1);
                tracing::trace!(handle = %self.id, kind = %self.kind, pointer = %self.address(), "release");
                Ok(())
            }
            Ownership::Disowned => {
                record(|m| m.skipped_releases += 1);
                Ok(())
            }
            Ownership::Released => {
                record(|m| m.double_releases += 1);
                tracing::warn!(handle = %self.id, pointer = %self.address(), "double release refused");
                Err(LifecycleError::DoubleRelease {
                    handle: self.id,
                    pointer: self.address(),
                })
            }
        }
    }

    /// Reference count of an owned mini-object.
    ///
    /// Returns `None` for structures and for handles that no longer own
    /// their object, where reading it could touch freed memory.
    #[must_use]
    pub fn ref_count(&self) -> Option<i32> {
        if !self.kind.is_ref_counted() || !self.is_owned() {
            return None;
        }
        // SAFETY: the handle owns a reference, so the mini-object is alive.
        Some(unsafe { self.api.read_refcount(self.ptr) })
    }

    /// Takes a new foreign reference and returns a second owned handle.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotRefCounted`] for structures and
    /// [`LifecycleError::NotOwned`] if this handle holds no reference.
    pub fn try_clone(&self) -> Result<Self, LifecycleError>
    where
        A: Clone,
    {
        if !self.kind.is_ref_counted() {
            return Err(LifecycleError::NotRefCounted { kind: self.kind });
        }
        if !self.is_owned() {
            return Err(LifecycleError::NotOwned {
                handle: self.id,
                pointer: self.address(),
            });
        }
        // SAFETY: the handle owns a reference, so the mini-object is alive.
        unsafe { self.api.acquire_ref(self.ptr) };
        Self::wrap(self.api.clone(), self.kind, self.ptr.as_ptr())
    }
}

impl<A: ForeignApi> Drop for ForeignHandle<A> {
    fn drop(&mut self) {
        if self.is_owned() && self.release().is_ok() {
            record(|m| m.released_on_drop += 1);
        }
    }
}

impl<A: ForeignApi> fmt::Display for ForeignHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}@{}", self.kind, self.id, self.address())
    }
}

impl<A: ForeignApi> fmt::Debug for ForeignHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("pointer", &self.address())
            .field("ownership", &self.ownership)
            .finish_non_exhaustive()
    }
}
