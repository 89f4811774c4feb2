//! The pooled policy hands freed blocks straight back out.
//!
//! Lives in its own test binary: the policy is fixed for the process-wide
//! session, and the unit tests run with the default quarantine policy.

use sys_native::{
    nat_caps_new_empty, nat_debug_stats, nat_deinit, nat_init, nat_mini_object_refcount,
    nat_mini_object_unref, nat_structure_free, nat_structure_new_empty, NatStats, NAT_OK,
};

#[test]
fn test_pooled_policy_recycles_most_recent_block() {
    let pooled = c"--nat-alloc=pooled";
    let argv = [c"pooled-test".as_ptr(), pooled.as_ptr()];
    assert_eq!(unsafe { nat_init(2, argv.as_ptr()) }, NAT_OK);

    let first = nat_caps_new_empty();
    unsafe { nat_mini_object_unref(first.cast()) };
    let second = nat_caps_new_empty();
    assert_eq!(first, second, "pooled caps should be recycled");
    assert_eq!(unsafe { nat_mini_object_refcount(second.cast()) }, 1);

    // Pools are per kind: a structure never lands on a freed caps block.
    unsafe { nat_mini_object_unref(second.cast()) };
    let structure = unsafe { nat_structure_new_empty(c"test".as_ptr()) };
    assert_ne!(structure.cast::<u8>(), second.cast::<u8>());

    let mut stats = NatStats::default();
    assert_eq!(unsafe { nat_debug_stats(&mut stats) }, NAT_OK);
    assert_eq!(stats.pooled, 1);
    assert_eq!(stats.live_objects, 1);
    assert_eq!(stats.quarantined, 0);

    unsafe { nat_structure_free(structure) };
    nat_deinit();

    assert!(nat_caps_new_empty().is_null());
}
