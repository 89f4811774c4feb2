//! Ownership bridge between Rust handles and native objects.
//!
//! `native-bridge` wraps pointers returned by a C library in
//! [`ForeignHandle`]s that know which destructor the object needs and whether
//! Rust still owns it. On top of that it provides a [`ReuseVerifier`] that
//! detects the native allocator handing out an address while an earlier
//! object at that address is still considered alive by the bridge.
//!
//! # Object kinds
//!
//! - **Mini-objects** are reference counted. Releasing one decrements its
//!   count; the library frees it when the count reaches zero.
//! - **Structures** are freed directly and carry a name.
//!
//! # Quick Start
//!
//! ```no_run
//! use native_bridge::{LibrarySession, ReuseVerifier};
//!
//! let session = LibrarySession::native()?;
//! let reports = ReuseVerifier::new().verify_all(*session.api())?;
//! for report in &reports {
//!     println!("{report}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Ownership
//!
//! A handle starts out [`Ownership::Owned`]. [`ForeignHandle::disown`] hands
//! the object back to native code so that releasing the handle no longer
//! calls the destructor. Releasing an already released handle is refused
//! with [`LifecycleError::DoubleRelease`]. Owned handles release themselves
//! on drop.
//!
//! # Thread Safety
//!
//! Handles are `!Send` and `!Sync`: the native objects they point to are not
//! safe to touch from another thread. Lifecycle metrics are kept per thread.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod factory;
mod ffi;
mod handle;
mod metrics;
mod session;
mod tracing;
mod verify;

// Re-export public API
pub use error::{LibraryError, LifecycleError, VerifyError};
pub use factory::{
    FactoryKind, NativeObjectFactory, RawMiniObjectFactory, RawStructureFactory,
    WrappedMiniObjectFactory, WrappedStructureFactory, RAW_STRUCTURE_NAME, WRAPPED_STRUCTURE_NAME,
};
pub use ffi::{Address, ForeignApi, LibraryStats, NativeLibrary, ObjectKind};
pub use handle::{ForeignHandle, HandleId, Ownership};
pub use metrics::{lifecycle_metrics, reset_lifecycle_metrics, LifecycleMetrics};
pub use session::{AllocPolicy, LibraryOptions, LibrarySession, DEFAULT_PROGRAM};
pub use self::tracing::RunId;
pub use verify::{ReuseVerifier, VerificationReport, VerifierConfig, DEFAULT_ITERATIONS};

#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod test_util;
