//! Reuse verification against the bundled native library.
//!
//! The library runs with its default quarantine policy, so no address may be
//! handed out twice while a session is open and every run must come back
//! clean.

use native_bridge::{
    FactoryKind, LibrarySession, NativeLibrary, RawMiniObjectFactory, RawStructureFactory,
    ReuseVerifier, WrappedMiniObjectFactory, WrappedStructureFactory, DEFAULT_ITERATIONS,
};

fn assert_library_clean(library: NativeLibrary) {
    let stats = library.stats().expect("library is initialized");
    assert_eq!(stats.double_releases, 0);
    assert_eq!(stats.invalid_releases, 0);
}

#[test]
fn test_wrapped_caps_never_reuse_a_live_pointer() {
    let session = LibrarySession::native().unwrap();
    let report = ReuseVerifier::new()
        .verify_wrapped(&WrappedMiniObjectFactory::new(*session.api()))
        .unwrap();
    assert_eq!(report.factory, "caps");
    assert_eq!(report.iterations, DEFAULT_ITERATIONS);
    assert_eq!(report.distinct_pointers, DEFAULT_ITERATIONS);
    assert_library_clean(*session.api());
}

#[test]
fn test_wrapped_structures_never_reuse_a_live_pointer() {
    let session = LibrarySession::native().unwrap();
    let report = ReuseVerifier::new()
        .verify_wrapped(&WrappedStructureFactory::new(*session.api()))
        .unwrap();
    assert_eq!(report.factory, "structure");
    assert_eq!(report.distinct_pointers, DEFAULT_ITERATIONS);
    assert_library_clean(*session.api());
}

#[test]
fn test_raw_caps_pointers_are_never_reused() {
    let session = LibrarySession::native().unwrap();
    let report = ReuseVerifier::new()
        .verify_raw(&RawMiniObjectFactory::new(*session.api()))
        .unwrap();
    assert_eq!(report.factory, "caps-pointer");
    assert_eq!(report.distinct_pointers, DEFAULT_ITERATIONS);
    assert_library_clean(*session.api());
}

#[test]
fn test_raw_structure_pointers_are_never_reused() {
    let session = LibrarySession::native().unwrap();
    let report = ReuseVerifier::new()
        .verify_raw(&RawStructureFactory::new(*session.api()))
        .unwrap();
    assert_eq!(report.factory, "structure-pointer");
    assert_eq!(report.distinct_pointers, DEFAULT_ITERATIONS);
    assert_library_clean(*session.api());
}

#[test]
fn test_every_factory_kind_passes() {
    let session = LibrarySession::native().unwrap();
    let reports = ReuseVerifier::new().verify_all(*session.api()).unwrap();
    assert_eq!(reports.len(), FactoryKind::ALL.len());
    for (report, kind) in reports.iter().zip(FactoryKind::ALL) {
        assert_eq!(report.factory, kind.name());
        assert_eq!(report.distinct_pointers, report.iterations);
    }
}
