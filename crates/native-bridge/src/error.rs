//! Error types for the ownership bridge and the reuse verifier.

use thiserror::Error;

use crate::ffi::{Address, ObjectKind};
use crate::handle::HandleId;

/// Misuse of a [`ForeignHandle`](crate::ForeignHandle) or a foreign constructor failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// A foreign constructor returned null, or null was offered for wrapping.
    #[error("foreign {kind} pointer is null")]
    InvalidPointer {
        /// Kind of object that was expected.
        kind: ObjectKind,
    },
    /// An owned handle was released a second time.
    #[error("handle {handle} already released {pointer}")]
    DoubleRelease {
        /// The offending handle.
        handle: HandleId,
        /// The pointer it wrapped.
        pointer: Address,
    },
    /// A reference was requested on a kind without a reference count.
    #[error("{kind} objects are not reference counted")]
    NotRefCounted {
        /// Kind of the handle.
        kind: ObjectKind,
    },
    /// An operation that needs ownership was attempted on a handle without it.
    #[error("handle {handle} does not own {pointer}")]
    NotOwned {
        /// The offending handle.
        handle: HandleId,
        /// The pointer it wraps.
        pointer: Address,
    },
}

/// A violation found by the [`ReuseVerifier`](crate::ReuseVerifier).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// A new wrapped object was handed an address that is still recorded
    /// for an earlier one.
    #[error(
        "Resource {factory}: reuse pointer {pointer}(refCount: {ref_count}) for object {object} and {existing} (iteration {iteration})"
    )]
    PointerReuse {
        /// Name of the factory under test.
        factory: &'static str,
        /// Iteration at which the collision was observed.
        iteration: usize,
        /// The colliding address.
        pointer: Address,
        /// Reference count of the new object, 1 for kinds without one.
        ref_count: i32,
        /// The newly constructed object.
        object: String,
        /// The object already recorded at `pointer`.
        existing: String,
    },
    /// A bare pointer was handed out twice.
    #[error("Resource {factory}: {pointer} got freed and reused. (iteration {iteration})")]
    RawPointerReuse {
        /// Name of the factory under test.
        factory: &'static str,
        /// Iteration at which the collision was observed.
        iteration: usize,
        /// The colliding address.
        pointer: Address,
    },
    /// The lifecycle itself failed, e.g. a constructor returned null.
    #[error("Resource {factory}: iteration {iteration} failed: {source}")]
    Lifecycle {
        /// Name of the factory under test.
        factory: &'static str,
        /// Iteration that failed.
        iteration: usize,
        /// The underlying failure.
        #[source]
        source: LifecycleError,
    },
}

impl VerifyError {
    /// Name of the factory the failure was reported for.
    #[must_use]
    pub const fn factory(&self) -> &'static str {
        match self {
            Self::PointerReuse { factory, .. }
            | Self::RawPointerReuse { factory, .. }
            | Self::Lifecycle { factory, .. } => *factory,
        }
    }

    /// Iteration at which the run stopped.
    #[must_use]
    pub const fn iteration(&self) -> usize {
        match self {
            Self::PointerReuse { iteration, .. }
            | Self::RawPointerReuse { iteration, .. }
            | Self::Lifecycle { iteration, .. } => *iteration,
        }
    }

    /// Returns `true` for the two pointer-reuse variants.
    #[must_use]
    pub const fn is_reuse(&self) -> bool {
        matches!(self, Self::PointerReuse { .. } | Self::RawPointerReuse { .. })
    }
}

/// Failure to start a session with the native library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LibraryError {
    /// An argument contains an interior NUL byte.
    #[error("library argument contains a NUL byte: {0:?}")]
    InvalidArgument(String),
    /// More arguments than a C `int` can count.
    #[error("too many library arguments")]
    TooManyArguments,
    /// The library could not parse its arguments.
    #[error("native library rejected its arguments")]
    Rejected,
    /// The library is already running with different options.
    #[error("native library is already running with different options")]
    Conflict,
    /// Any other non-zero init status.
    #[error("native library failed to initialize (status {status})")]
    InitFailed {
        /// Status returned by the library.
        status: i32,
    },
}
