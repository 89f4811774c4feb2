//! Pointer-reuse verification.
//!
//! Both procedures construct, record, and free objects in strictly
//! sequential iterations. Records are never pruned: they are a set that
//! must never see a collision, not a cache. The first collision ends the run.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use crate::error::VerifyError;
use crate::factory::{
    FactoryKind, NativeObjectFactory, RawMiniObjectFactory, RawStructureFactory,
    WrappedMiniObjectFactory, WrappedStructureFactory,
};
use crate::ffi::{Address, ForeignApi};
use crate::metrics::record;
use crate::tracing::{next_run_id, trace_verify_run, RunId};

/// Iterations per run unless configured otherwise.
pub const DEFAULT_ITERATIONS: usize = 1000;

/// Upper bound on the records reserved before a run starts; larger runs grow
/// the table as they go.
const MAX_RESERVED_RECORDS: usize = DEFAULT_ITERATIONS;

/// Configuration for a [`ReuseVerifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    iterations: usize,
}

impl VerifierConfig {
    /// Creates a configuration running [`DEFAULT_ITERATIONS`] iterations.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Sets the number of allocate/free iterations per run.
    #[must_use]
    pub const fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Number of iterations per run.
    #[must_use]
    pub const fn iteration_count(&self) -> usize {
        self.iterations
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of a run that found no violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    /// Correlates the report with the run's tracing span.
    pub run: RunId,
    /// Name of the factory under test.
    pub factory: &'static str,
    /// Iterations completed.
    pub iterations: usize,
    /// Distinct addresses observed; equals `iterations` on success.
    pub distinct_pointers: usize,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resource {}: {} iterations, {} distinct pointers in {:?}",
            self.factory, self.iterations, self.distinct_pointers, self.elapsed
        )
    }
}

/// Drives allocate/disown/free cycles and checks that no address is reused.
#[derive(Debug, Clone, Default)]
pub struct ReuseVerifier {
    config: VerifierConfig,
}

impl ReuseVerifier {
    /// A verifier running [`DEFAULT_ITERATIONS`] iterations.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            config: VerifierConfig::new(),
        }
    }

    /// A verifier with the given configuration.
    #[must_use]
    pub const fn with_config(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Wrapped-object verification.
    ///
    /// Each iteration constructs an object, records `(pointer → object)`,
    /// then disowns and frees it. A pointer already in the record is a
    /// [`VerifyError::PointerReuse`].
    ///
    /// # Errors
    ///
    /// Returns the first violation, or a [`VerifyError::Lifecycle`] if a
    /// constructor fails.
    pub fn verify_wrapped<F>(&self, factory: &F) -> Result<VerificationReport, VerifyError>
    where
        F: NativeObjectFactory,
        F::Object: fmt::Display,
    {
        let iterations = self.config.iterations;
        let run = next_run_id();
        let _span = trace_verify_run("wrapped", factory.name(), iterations, run);
        let start = Instant::now();
        let mut objects: HashMap<Address, F::Object> =
            HashMap::with_capacity(iterations.min(MAX_RESERVED_RECORDS));

        for iteration in 0..iterations {
            let object = construct(factory, iteration)?;
            let pointer = Address::from(factory.raw_pointer(&object));
            match objects.entry(pointer) {
                Entry::Occupied(existing) => {
                    // `object` is still owned and is released when it drops.
                    let err = VerifyError::PointerReuse {
                        factory: factory.name(),
                        iteration,
                        pointer,
                        ref_count: factory.ref_count(&object),
                        object: object.to_string(),
                        existing: existing.get().to_string(),
                    };
                    return Err(fail(err));
                }
                Entry::Vacant(slot) => {
                    let object = slot.insert(object);
                    factory.disown(object);
                    // SAFETY: constructed by `factory` in this iteration,
                    // disowned above and freed nowhere else.
                    unsafe { factory.free(object) };
                }
            }
        }

        Ok(pass(run, factory.name(), iterations, objects.len(), start))
    }

    /// Raw-pointer verification.
    ///
    /// Each iteration constructs a bare pointer, adds it to a set, then
    /// frees it. A pointer already in the set is a
    /// [`VerifyError::RawPointerReuse`].
    ///
    /// # Errors
    ///
    /// Returns the first violation, or a [`VerifyError::Lifecycle`] if a
    /// constructor fails.
    pub fn verify_raw<F>(&self, factory: &F) -> Result<VerificationReport, VerifyError>
    where
        F: NativeObjectFactory<Object = NonNull<c_void>>,
    {
        let iterations = self.config.iterations;
        let run = next_run_id();
        let _span = trace_verify_run("raw", factory.name(), iterations, run);
        let start = Instant::now();
        let mut pointers: HashSet<Address> =
            HashSet::with_capacity(iterations.min(MAX_RESERVED_RECORDS));

        for iteration in 0..iterations {
            let pointer = construct(factory, iteration)?;
            let fresh = pointers.insert(Address::from(pointer));
            // SAFETY: constructed by `factory` in this iteration and freed
            // exactly once, here.
            unsafe { factory.free(&pointer) };
            if !fresh {
                return Err(fail(VerifyError::RawPointerReuse {
                    factory: factory.name(),
                    iteration,
                    pointer: Address::from(pointer),
                }));
            }
        }

        Ok(pass(run, factory.name(), iterations, pointers.len(), start))
    }

    /// Runs the procedure that fits `kind`, building the factory over `api`.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn verify_kind<A>(&self, kind: FactoryKind, api: A) -> Result<VerificationReport, VerifyError>
    where
        A: ForeignApi + Clone,
    {
        match kind {
            FactoryKind::WrappedMiniObject => self.verify_wrapped(&WrappedMiniObjectFactory::new(api)),
            FactoryKind::WrappedStructure => self.verify_wrapped(&WrappedStructureFactory::new(api)),
            FactoryKind::RawMiniObject => self.verify_raw(&RawMiniObjectFactory::new(api)),
            FactoryKind::RawStructure => self.verify_raw(&RawStructureFactory::new(api)),
        }
    }

    /// Runs every [`FactoryKind`] in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn verify_all<A>(&self, api: A) -> Result<Vec<VerificationReport>, VerifyError>
    where
        A: ForeignApi + Clone,
    {
        FactoryKind::ALL
            .into_iter()
            .map(|kind| self.verify_kind(kind, api.clone()))
            .collect()
    }
}

fn construct<F: NativeObjectFactory>(factory: &F, iteration: usize) -> Result<F::Object, VerifyError> {
    factory.construct().map_err(|source| {
        fail(VerifyError::Lifecycle {
            factory: factory.name(),
            iteration,
            source,
        })
    })
}

fn fail(err: VerifyError) -> VerifyError {
    record(|m| m.runs_failed += 1);
    tracing::error!(factory = err.factory(), iteration = err.iteration(), "{err}");
    err
}

fn pass(
    run: RunId,
    factory: &'static str,
    iterations: usize,
    distinct_pointers: usize,
    start: Instant,
) -> VerificationReport {
    record(|m| m.runs_passed += 1);
    let report = VerificationReport {
        run,
        factory,
        iterations,
        distinct_pointers,
        elapsed: start.elapsed(),
    };
    tracing::debug!(%report, "verification passed");
    report
}
