//! Ownership contract of `ForeignHandle`, checked against the recording mock.

use native_bridge::test_util::{ForeignCall, RecordingLibrary};
use native_bridge::{Address, ForeignApi, ForeignHandle, LifecycleError, ObjectKind, Ownership};
use proptest::prelude::*;

fn wrap(library: &RecordingLibrary, kind: ObjectKind) -> ForeignHandle<&RecordingLibrary> {
    let raw = library.construct_empty(kind, c"test");
    ForeignHandle::wrap(library, kind, raw).unwrap()
}

#[test]
fn test_disowned_handle_never_calls_destructor() {
    let library = RecordingLibrary::new();
    let mut handle = wrap(&library, ObjectKind::MiniObject);

    handle.disown();
    handle.release().unwrap();
    drop(handle);

    assert_eq!(library.refcounted_releases(), 0);
    assert_eq!(library.plain_releases(), 0);
}

#[test]
fn test_owned_release_calls_destructor_once_with_its_pointer() {
    let library = RecordingLibrary::new();
    let mut handle = wrap(&library, ObjectKind::MiniObject);
    let address = handle.address();

    handle.release().unwrap();
    assert_eq!(handle.ownership(), Ownership::Released);
    drop(handle);

    assert_eq!(library.releases_of(address), 1);
    assert_eq!(
        library.calls().last(),
        Some(&ForeignCall::ReleaseRefCounted(address))
    );
}

#[test]
fn test_null_pointer_is_refused() {
    let library = RecordingLibrary::new();
    for kind in [ObjectKind::MiniObject, ObjectKind::Structure] {
        let err = ForeignHandle::wrap(&library, kind, std::ptr::null_mut()).unwrap_err();
        assert_eq!(err, LifecycleError::InvalidPointer { kind });
    }
    assert!(library.calls().is_empty());
}

#[test]
fn test_release_dispatches_on_kind() {
    let library = RecordingLibrary::new();
    let mut caps = wrap(&library, ObjectKind::MiniObject);
    let mut structure = wrap(&library, ObjectKind::Structure);

    caps.release().unwrap();
    assert_eq!((library.refcounted_releases(), library.plain_releases()), (1, 0));
    structure.release().unwrap();
    assert_eq!((library.refcounted_releases(), library.plain_releases()), (1, 1));
}

#[test]
fn test_second_release_is_refused_without_calling_destructor() {
    let library = RecordingLibrary::new();
    let mut handle = wrap(&library, ObjectKind::Structure);
    let address = handle.address();

    handle.release().unwrap();
    let err = handle.release().unwrap_err();

    assert_eq!(
        err,
        LifecycleError::DoubleRelease {
            handle: handle.id(),
            pointer: address,
        }
    );
    assert_eq!(library.releases_of(address), 1);
}

#[test]
fn test_dropping_owned_handle_releases_it() {
    let library = RecordingLibrary::new();
    let handle = wrap(&library, ObjectKind::Structure);
    let address = handle.address();
    drop(handle);
    assert_eq!(library.releases_of(address), 1);
    assert_eq!(library.live_objects(), 0);
}

#[test]
fn test_cloned_caps_keep_object_alive() {
    let library = RecordingLibrary::new();
    let first = wrap(&library, ObjectKind::MiniObject);
    let second = first.try_clone().unwrap();
    assert_eq!(second.address(), first.address());
    assert_eq!(first.ref_count(), Some(2));

    drop(first);
    assert_eq!(library.live_objects(), 1);
    assert_eq!(second.ref_count(), Some(1));
    drop(second);
    assert_eq!(library.live_objects(), 0);
}

#[test]
fn test_unowned_wrap_leaves_object_to_caller() {
    let library = RecordingLibrary::new();
    let raw = library.construct_empty(ObjectKind::Structure, c"borrowed");
    let handle = ForeignHandle::wrap_unowned(&library, ObjectKind::Structure, raw).unwrap();
    let address: Address = handle.address();
    drop(handle);
    assert_eq!(library.releases_of(address), 0);
    assert_eq!(library.live_objects(), 1);
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Disown,
    Release,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![Just(Step::Disown), Just(Step::Release)]
}

fn kind() -> impl Strategy<Value = ObjectKind> {
    prop_oneof![Just(ObjectKind::MiniObject), Just(ObjectKind::Structure)]
}

proptest! {
    #[test]
    fn disowning_twice_equals_disowning_once(kind in kind(), releases in 0usize..4) {
        let once = RecordingLibrary::new();
        let twice = RecordingLibrary::new();
        let mut a = wrap(&once, kind);
        let mut b = wrap(&twice, kind);

        a.disown();
        b.disown();
        b.disown();
        for _ in 0..releases {
            prop_assert!(a.release().is_ok());
            prop_assert!(b.release().is_ok());
        }

        prop_assert_eq!(a.ownership(), b.ownership());
        drop((a, b));
        prop_assert_eq!(once.calls().len(), twice.calls().len());
        prop_assert_eq!(twice.live_objects(), 1);
    }

    #[test]
    fn destructor_runs_at_most_once(kind in kind(), steps in prop::collection::vec(step(), 0..12)) {
        let library = RecordingLibrary::new();
        let mut handle = wrap(&library, kind);
        let address = handle.address();

        let mut disowned_first = false;
        for step in steps {
            match step {
                Step::Disown => {
                    disowned_first |= handle.is_owned();
                    handle.disown();
                }
                Step::Release => {
                    let _ = handle.release();
                }
            }
        }
        drop(handle);

        let expected = usize::from(!disowned_first);
        prop_assert_eq!(library.releases_of(address), expected);
    }
}
