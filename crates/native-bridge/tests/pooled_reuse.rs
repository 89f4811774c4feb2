//! The verifier catches a native allocator that recycles freed blocks.
//!
//! The allocation policy is fixed for the lifetime of a native session, so
//! this runs in its own test binary with a single test.

use native_bridge::{
    AllocPolicy, FactoryKind, LibraryOptions, LibrarySession, NativeLibrary, ReuseVerifier,
    VerifierConfig, VerifyError,
};

#[test]
fn test_pooled_allocator_reuse_is_reported() {
    let options = LibraryOptions::new()
        .program("pooled-reuse")
        .policy(AllocPolicy::Pooled);
    let session = LibrarySession::init(NativeLibrary, &options).unwrap();
    let verifier = ReuseVerifier::with_config(VerifierConfig::new().iterations(16));

    for kind in FactoryKind::ALL {
        let err = verifier.verify_kind(kind, *session.api()).unwrap_err();
        assert!(err.is_reuse(), "{kind}: expected reuse, got {err}");
        assert_eq!(err.factory(), kind.name());
        assert_eq!(err.iteration(), 1, "{kind}: LIFO pool hands back the last block");

        match (&err, kind.is_wrapped()) {
            (VerifyError::PointerReuse { ref_count, .. }, true) => assert_eq!(*ref_count, 1),
            (VerifyError::RawPointerReuse { .. }, false) => {}
            _ => panic!("{kind}: wrong violation {err:?}"),
        }
    }

    let stats = session.api().stats().unwrap();
    assert_eq!(stats.double_releases, 0);
    assert_eq!(stats.invalid_releases, 0);
    assert_eq!(stats.live_objects, 0);
}
