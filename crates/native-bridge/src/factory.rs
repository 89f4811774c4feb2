//! Object factories, one per {wrapped, raw pointer} × {mini-object, structure}.
//!
//! The verifier is written once against [`NativeObjectFactory`] and run
//! against all four implementations.

use std::ffi::{c_void, CStr};
use std::fmt;
use std::ptr::NonNull;

use crate::error::LifecycleError;
use crate::ffi::{ForeignApi, NativeLibrary, ObjectKind};
use crate::handle::ForeignHandle;

/// Name given to structures built by [`WrappedStructureFactory`].
pub const WRAPPED_STRUCTURE_NAME: &CStr = c"name";
/// Name given to structures built by [`RawStructureFactory`].
pub const RAW_STRUCTURE_NAME: &CStr = c"test";
/// Tag passed to the caps constructor, which ignores it.
const CAPS_TAG: &CStr = c"caps";

/// Constructs, inspects, disowns and frees one kind of foreign object.
pub trait NativeObjectFactory {
    /// What [`construct`](Self::construct) hands out.
    type Object;

    /// Stable name used in failure diagnostics.
    fn name(&self) -> &'static str;

    /// Kind of foreign object this factory produces.
    fn kind(&self) -> ObjectKind;

    /// Constructs a new, empty foreign object.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidPointer`] if the foreign constructor
    /// returned null.
    fn construct(&self) -> Result<Self::Object, LifecycleError>;

    /// The raw foreign pointer behind `object`.
    fn raw_pointer(&self, object: &Self::Object) -> NonNull<c_void>;

    /// Gives up wrapper-level ownership of `object`.
    fn disown(&self, object: &mut Self::Object);

    /// Releases the foreign object through the kind's destructor.
    ///
    /// # Safety
    ///
    /// `object` must come from this factory's [`construct`](Self::construct)
    /// and must not have been freed before. If it is a wrapper it must be
    /// disowned, so that nothing else releases it.
    unsafe fn free(&self, object: &Self::Object);

    /// Reference count of `object` for diagnostics; 1 for kinds without one.
    fn ref_count(&self, _object: &Self::Object) -> i32 {
        1
    }
}

// ============================================================================
// Wrapped-object factories
// ============================================================================

/// Builds caps wrapped in an owned [`ForeignHandle`].
#[derive(Debug, Clone, Default)]
pub struct WrappedMiniObjectFactory<A: ForeignApi + Clone = NativeLibrary> {
    api: A,
}

impl<A: ForeignApi + Clone> WrappedMiniObjectFactory<A> {
    /// A factory constructing through `api`.
    pub const fn new(api: A) -> Self {
        Self { api }
    }
}

impl<A: ForeignApi + Clone> NativeObjectFactory for WrappedMiniObjectFactory<A> {
    type Object = ForeignHandle<A>;

    fn name(&self) -> &'static str {
        "caps"
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::MiniObject
    }

    fn construct(&self) -> Result<Self::Object, LifecycleError> {
        let raw = self.api.construct_empty(ObjectKind::MiniObject, CAPS_TAG);
        ForeignHandle::wrap(self.api.clone(), ObjectKind::MiniObject, raw)
    }

    fn raw_pointer(&self, object: &Self::Object) -> NonNull<c_void> {
        object.raw_pointer()
    }

    fn disown(&self, object: &mut Self::Object) {
        object.disown();
    }

    unsafe fn free(&self, object: &Self::Object) {
        // SAFETY: forwarded from the caller.
        unsafe { self.api.release_refcounted(object.raw_pointer()) };
    }

    fn ref_count(&self, object: &Self::Object) -> i32 {
        object.ref_count().unwrap_or(1)
    }
}

/// Builds structures wrapped in an owned [`ForeignHandle`].
#[derive(Debug, Clone, Default)]
pub struct WrappedStructureFactory<A: ForeignApi + Clone = NativeLibrary> {
    api: A,
}

impl<A: ForeignApi + Clone> WrappedStructureFactory<A> {
    /// A factory constructing through `api`.
    pub const fn new(api: A) -> Self {
        Self { api }
    }
}

impl<A: ForeignApi + Clone> NativeObjectFactory for WrappedStructureFactory<A> {
    type Object = ForeignHandle<A>;

    fn name(&self) -> &'static str {
        "structure"
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Structure
    }

    fn construct(&self) -> Result<Self::Object, LifecycleError> {
        let raw = self
            .api
            .construct_empty(ObjectKind::Structure, WRAPPED_STRUCTURE_NAME);
        ForeignHandle::wrap(self.api.clone(), ObjectKind::Structure, raw)
    }

    fn raw_pointer(&self, object: &Self::Object) -> NonNull<c_void> {
        object.raw_pointer()
    }

    fn disown(&self, object: &mut Self::Object) {
        object.disown();
    }

    unsafe fn free(&self, object: &Self::Object) {
        // SAFETY: forwarded from the caller.
        unsafe { self.api.release_plain(object.raw_pointer()) };
    }
}

// ============================================================================
// Raw-pointer factories
// ============================================================================

/// Builds bare caps pointers with no wrapper.
///
/// There is no wrapper-level ownership to give up, so `disown` does nothing.
#[derive(Debug, Clone, Default)]
pub struct RawMiniObjectFactory<A: ForeignApi = NativeLibrary> {
    api: A,
}

impl<A: ForeignApi> RawMiniObjectFactory<A> {
    /// A factory constructing through `api`.
    pub const fn new(api: A) -> Self {
        Self { api }
    }
}

impl<A: ForeignApi> NativeObjectFactory for RawMiniObjectFactory<A> {
    type Object = NonNull<c_void>;

    fn name(&self) -> &'static str {
        "caps-pointer"
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::MiniObject
    }

    fn construct(&self) -> Result<Self::Object, LifecycleError> {
        NonNull::new(self.api.construct_empty(ObjectKind::MiniObject, CAPS_TAG)).ok_or(
            LifecycleError::InvalidPointer {
                kind: ObjectKind::MiniObject,
            },
        )
    }

    fn raw_pointer(&self, object: &Self::Object) -> NonNull<c_void> {
        *object
    }

    fn disown(&self, _object: &mut Self::Object) {}

    unsafe fn free(&self, object: &Self::Object) {
        // SAFETY: forwarded from the caller.
        unsafe { self.api.release_refcounted(*object) };
    }
}

/// Builds bare structure pointers with no wrapper.
///
/// There is no wrapper-level ownership to give up, so `disown` does nothing.
#[derive(Debug, Clone, Default)]
pub struct RawStructureFactory<A: ForeignApi = NativeLibrary> {
    api: A,
}

impl<A: ForeignApi> RawStructureFactory<A> {
    /// A factory constructing through `api`.
    pub const fn new(api: A) -> Self {
        Self { api }
    }
}

impl<A: ForeignApi> NativeObjectFactory for RawStructureFactory<A> {
    type Object = NonNull<c_void>;

    fn name(&self) -> &'static str {
        "structure-pointer"
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Structure
    }

    fn construct(&self) -> Result<Self::Object, LifecycleError> {
        NonNull::new(
            self.api
                .construct_empty(ObjectKind::Structure, RAW_STRUCTURE_NAME),
        )
        .ok_or(LifecycleError::InvalidPointer {
            kind: ObjectKind::Structure,
        })
    }

    fn raw_pointer(&self, object: &Self::Object) -> NonNull<c_void> {
        *object
    }

    fn disown(&self, _object: &mut Self::Object) {}

    unsafe fn free(&self, object: &Self::Object) {
        // SAFETY: forwarded from the caller.
        unsafe { self.api.release_plain(*object) };
    }
}

// ============================================================================
// Enumeration
// ============================================================================

/// The four factory variants, for parameterizing tests and runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactoryKind {
    /// [`WrappedMiniObjectFactory`].
    WrappedMiniObject,
    /// [`WrappedStructureFactory`].
    WrappedStructure,
    /// [`RawMiniObjectFactory`].
    RawMiniObject,
    /// [`RawStructureFactory`].
    RawStructure,
}

impl FactoryKind {
    /// Every variant, wrapped factories first.
    pub const ALL: [Self; 4] = [
        Self::WrappedMiniObject,
        Self::WrappedStructure,
        Self::RawMiniObject,
        Self::RawStructure,
    ];

    /// The diagnostic name of the corresponding factory.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::WrappedMiniObject => "caps",
            Self::WrappedStructure => "structure",
            Self::RawMiniObject => "caps-pointer",
            Self::RawStructure => "structure-pointer",
        }
    }

    /// Kind of foreign object the factory produces.
    #[must_use]
    pub const fn object_kind(self) -> ObjectKind {
        match self {
            Self::WrappedMiniObject | Self::RawMiniObject => ObjectKind::MiniObject,
            Self::WrappedStructure | Self::RawStructure => ObjectKind::Structure,
        }
    }

    /// Returns `true` for factories that hand out [`ForeignHandle`]s.
    #[must_use]
    pub const fn is_wrapped(self) -> bool {
        matches!(self, Self::WrappedMiniObject | Self::WrappedStructure)
    }
}

impl fmt::Display for FactoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::Address;
    use crate::handle::Ownership;
    use crate::test_util::{ForeignCall, RecordingLibrary};

    #[test]
    fn test_names_match_enumeration() {
        let library = RecordingLibrary::new();
        assert_eq!(
            WrappedMiniObjectFactory::new(&library).name(),
            FactoryKind::WrappedMiniObject.name()
        );
        assert_eq!(
            WrappedStructureFactory::new(&library).name(),
            FactoryKind::WrappedStructure.name()
        );
        assert_eq!(
            RawMiniObjectFactory::new(&library).name(),
            FactoryKind::RawMiniObject.name()
        );
        assert_eq!(
            RawStructureFactory::new(&library).name(),
            FactoryKind::RawStructure.name()
        );
    }

    #[test]
    fn test_enumeration_covers_the_matrix() {
        let wrapped = FactoryKind::ALL.iter().filter(|k| k.is_wrapped()).count();
        let mini = FactoryKind::ALL
            .iter()
            .filter(|k| k.object_kind() == ObjectKind::MiniObject)
            .count();
        assert_eq!(wrapped, 2);
        assert_eq!(mini, 2);
    }

    #[test]
    fn test_wrapped_factory_hands_out_owned_handles() {
        let library = RecordingLibrary::new();
        let factory = WrappedMiniObjectFactory::new(&library);
        let mut caps = factory.construct().unwrap();
        assert_eq!(caps.ownership(), Ownership::Owned);
        assert_eq!(factory.ref_count(&caps), 1);

        factory.disown(&mut caps);
        assert_eq!(caps.ownership(), Ownership::Disowned);
        unsafe { factory.free(&caps) };
        drop(caps);
        assert_eq!(library.refcounted_releases(), 1);
        assert_eq!(library.live_objects(), 0);
    }

    #[test]
    fn test_wrapped_structure_free_uses_direct_free() {
        let library = RecordingLibrary::new();
        let factory = WrappedStructureFactory::new(&library);
        let mut structure = factory.construct().unwrap();
        let address = structure.address();
        assert_eq!(factory.ref_count(&structure), 1);

        factory.disown(&mut structure);
        unsafe { factory.free(&structure) };
        assert_eq!(library.calls().last(), Some(&ForeignCall::ReleasePlain(address)));
        assert_eq!(library.refcounted_releases(), 0);
    }

    #[test]
    fn test_raw_factories_dispatch_by_kind() {
        let library = RecordingLibrary::new();
        let caps = RawMiniObjectFactory::new(&library);
        let structure = RawStructureFactory::new(&library);

        let mut c = caps.construct().unwrap();
        let mut s = structure.construct().unwrap();
        caps.disown(&mut c);
        structure.disown(&mut s);
        unsafe {
            caps.free(&c);
            structure.free(&s);
        }

        let calls = library.calls();
        assert!(calls.contains(&ForeignCall::ReleaseRefCounted(Address::from(c))));
        assert!(calls.contains(&ForeignCall::ReleasePlain(Address::from(s))));
        assert_eq!(library.live_objects(), 0);
    }

    #[test]
    fn test_raw_disown_has_no_foreign_effect() {
        let library = RecordingLibrary::new();
        let factory = RawMiniObjectFactory::new(&library);
        let mut pointer = factory.construct().unwrap();
        let before = library.calls().len();
        factory.disown(&mut pointer);
        assert_eq!(library.calls().len(), before);
        assert_eq!(factory.raw_pointer(&pointer), pointer);
        unsafe { factory.free(&pointer) };
    }

    #[test]
    fn test_null_construction_is_invalid_pointer() {
        let library = RecordingLibrary::failing_constructors();
        assert_eq!(
            WrappedStructureFactory::new(&library).construct().unwrap_err(),
            LifecycleError::InvalidPointer {
                kind: ObjectKind::Structure
            }
        );
        assert_eq!(
            RawMiniObjectFactory::new(&library).construct().unwrap_err(),
            LifecycleError::InvalidPointer {
                kind: ObjectKind::MiniObject
            }
        );
    }
}
