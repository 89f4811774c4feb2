//! An instrumented stand-in for the native library.
//!
//! [`RecordingLibrary`] implements [`ForeignApi`] without touching real
//! memory: it hands out synthetic addresses, keeps reference counts in a
//! table and records every call so tests can assert on destructor dispatch.

use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::error::LibraryError;
use crate::ffi::{Address, ForeignApi, ObjectKind};

const FIRST_ADDRESS: usize = 0x1000;
const ADDRESS_STRIDE: usize = 0x40;

/// One call made through the foreign boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForeignCall {
    /// `init` with the given arguments.
    Init(Vec<String>),
    /// `deinit`.
    Deinit,
    /// A constructor call and the address it returned, if any.
    Construct(ObjectKind, Option<Address>),
    /// An extra reference was taken.
    AcquireRef(Address),
    /// The reference-decrement destructor.
    ReleaseRefCounted(Address),
    /// The direct-free destructor.
    ReleasePlain(Address),
    /// A reference count read.
    ReadRefcount(Address),
}

/// How the mock allocator picks addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reuse {
    /// Every allocation gets a fresh address.
    Never,
    /// Freed addresses are handed out again, most recent first.
    Recycle,
}

#[derive(Debug, Default)]
struct State {
    next_address: usize,
    free_list: Vec<usize>,
    live: HashMap<usize, (ObjectKind, i32)>,
    calls: Vec<ForeignCall>,
}

/// Instrumented [`ForeignApi`] for tests.
#[derive(Debug)]
pub struct RecordingLibrary {
    state: Mutex<State>,
    reuse: Reuse,
    fail_construct: bool,
    fail_init: Option<LibraryError>,
}

impl Default for RecordingLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingLibrary {
    /// A mock that never hands out an address twice.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_address: FIRST_ADDRESS,
                ..State::default()
            }),
            reuse: Reuse::Never,
            fail_construct: false,
            fail_init: None,
        }
    }

    /// A mock that recycles freed addresses, most recently freed first.
    #[must_use]
    pub fn recycling() -> Self {
        Self {
            reuse: Reuse::Recycle,
            ..Self::new()
        }
    }

    /// A mock whose constructors always return null.
    #[must_use]
    pub fn failing_constructors() -> Self {
        Self {
            fail_construct: true,
            ..Self::new()
        }
    }

    /// A mock whose `init` fails with `error`.
    #[must_use]
    pub fn failing_init(error: LibraryError) -> Self {
        Self {
            fail_init: Some(error),
            ..Self::new()
        }
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ForeignCall> {
        self.state.lock().calls.clone()
    }

    /// Number of constructor calls.
    #[must_use]
    pub fn constructions(&self) -> usize {
        self.count(|call| matches!(call, ForeignCall::Construct(..)))
    }

    /// Number of reference-decrement destructor calls.
    #[must_use]
    pub fn refcounted_releases(&self) -> usize {
        self.count(|call| matches!(call, ForeignCall::ReleaseRefCounted(_)))
    }

    /// Number of direct-free destructor calls.
    #[must_use]
    pub fn plain_releases(&self) -> usize {
        self.count(|call| matches!(call, ForeignCall::ReleasePlain(_)))
    }

    /// Number of destructor calls, of either kind, that named `address`.
    #[must_use]
    pub fn releases_of(&self, address: Address) -> usize {
        self.count(|call| {
            matches!(call, ForeignCall::ReleaseRefCounted(a) | ForeignCall::ReleasePlain(a) if *a == address)
        })
    }

    /// Objects constructed and not yet freed.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.state.lock().live.len()
    }

    fn count(&self, predicate: impl Fn(&ForeignCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    fn retire(&self, state: &mut State, address: usize) {
        state.live.remove(&address);
        if self.reuse == Reuse::Recycle {
            state.free_list.push(address);
        }
    }
}

fn address_of(ptr: NonNull<c_void>) -> usize {
    ptr.as_ptr().addr()
}

impl ForeignApi for RecordingLibrary {
    fn init(&self, args: &[CString]) -> Result<(), LibraryError> {
        let args = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        self.state.lock().calls.push(ForeignCall::Init(args));
        self.fail_init.clone().map_or(Ok(()), Err)
    }

    fn deinit(&self) {
        self.state.lock().calls.push(ForeignCall::Deinit);
    }

    fn construct_empty(&self, kind: ObjectKind, _tag: &CStr) -> *mut c_void {
        let mut state = self.state.lock();
        if self.fail_construct {
            state.calls.push(ForeignCall::Construct(kind, None));
            return std::ptr::null_mut();
        }
        let address = if let Some(address) = state.free_list.pop() {
            address
        } else {
            let address = state.next_address;
            state.next_address += ADDRESS_STRIDE;
            address
        };
        state.live.insert(address, (kind, 1));
        state
            .calls
            .push(ForeignCall::Construct(kind, Some(Address::new(address))));
        std::ptr::without_provenance_mut(address)
    }

    unsafe fn acquire_ref(&self, ptr: NonNull<c_void>) {
        let mut state = self.state.lock();
        state.calls.push(ForeignCall::AcquireRef(Address::from(ptr)));
        if let Some((_, count)) = state.live.get_mut(&address_of(ptr)) {
            *count += 1;
        }
    }

    unsafe fn release_refcounted(&self, ptr: NonNull<c_void>) {
        let mut state = self.state.lock();
        state.calls.push(ForeignCall::ReleaseRefCounted(Address::from(ptr)));
        let address = address_of(ptr);
        let retired = match state.live.get_mut(&address) {
            Some((ObjectKind::MiniObject, count)) => {
                *count -= 1;
                *count == 0
            }
            _ => false,
        };
        if retired {
            self.retire(&mut state, address);
        }
    }

    unsafe fn release_plain(&self, ptr: NonNull<c_void>) {
        let mut state = self.state.lock();
        state.calls.push(ForeignCall::ReleasePlain(Address::from(ptr)));
        let address = address_of(ptr);
        if matches!(state.live.get(&address), Some((ObjectKind::Structure, _))) {
            self.retire(&mut state, address);
        }
    }

    unsafe fn read_refcount(&self, ptr: NonNull<c_void>) -> i32 {
        let mut state = self.state.lock();
        state.calls.push(ForeignCall::ReadRefcount(Address::from(ptr)));
        state
            .live
            .get(&address_of(ptr))
            .map_or(0, |(_, count)| *count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_addresses_without_recycling() {
        let library = RecordingLibrary::new();
        let a = library.construct_empty(ObjectKind::Structure, c"a");
        unsafe { library.release_plain(NonNull::new(a).unwrap()) };
        let b = library.construct_empty(ObjectKind::Structure, c"b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_recycling_returns_last_freed() {
        let library = RecordingLibrary::recycling();
        let a = library.construct_empty(ObjectKind::MiniObject, c"a");
        unsafe { library.release_refcounted(NonNull::new(a).unwrap()) };
        let b = library.construct_empty(ObjectKind::MiniObject, c"b");
        assert_eq!(a, b);
    }

    #[test]
    fn test_refcounted_object_survives_until_last_reference() {
        let library = RecordingLibrary::recycling();
        let a = NonNull::new(library.construct_empty(ObjectKind::MiniObject, c"a")).unwrap();
        unsafe {
            library.acquire_ref(a);
            library.release_refcounted(a);
            assert_eq!(library.read_refcount(a), 1);
            library.release_refcounted(a);
            assert_eq!(library.read_refcount(a), 0);
        }
        assert_eq!(library.live_objects(), 0);
        assert_eq!(library.refcounted_releases(), 2);
    }

    #[test]
    fn test_failing_constructors_return_null() {
        let library = RecordingLibrary::failing_constructors();
        assert!(library.construct_empty(ObjectKind::MiniObject, c"a").is_null());
        assert_eq!(
            library.calls(),
            vec![ForeignCall::Construct(ObjectKind::MiniObject, None)]
        );
    }
}
