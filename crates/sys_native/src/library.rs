//! Process-wide session state behind one lock.
//!
//! Under [`AllocPolicy::Quarantine`] without a limit every released block is
//! kept until the last `deinit`, so a session's memory grows with the total
//! number of allocations it has made, not with the number of live objects.
//! Long sessions should set a quarantine limit.

use std::collections::VecDeque;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::block::{BlockKind, Header};
use crate::options::{AllocPolicy, InitOptions};
use crate::NatStats;

/// Process-wide library state. `None` outside of an init/deinit bracket.
static LIBRARY: Mutex<Option<Library>> = Mutex::new(None);

/// Result of a release request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// The block was retired.
    Retired,
    /// A reference was dropped but others remain.
    StillReferenced,
    /// The block was already poisoned; nothing was freed.
    DoubleRelease,
    /// The pointer does not carry a live header of the expected kind.
    Invalid,
}

struct Library {
    init_count: usize,
    options: InitOptions,
    quarantine: VecDeque<NonNull<Header>>,
    pools: [Vec<NonNull<Header>>; 2],
    stats: NatStats,
}

// SAFETY: the retained blocks are only touched while `LIBRARY` is locked.
unsafe impl Send for Library {}

impl Library {
    fn new(options: InitOptions) -> Self {
        Self {
            init_count: 1,
            options,
            quarantine: VecDeque::new(),
            pools: [Vec::new(), Vec::new()],
            stats: NatStats::default(),
        }
    }

    fn allocate(&mut self, kind: BlockKind) -> Option<NonNull<Header>> {
        let block = match self.pools[kind.index()].pop() {
            Some(block) => {
                // SAFETY: pooled blocks came from `Header::allocate` and are
                // poisoned, so nobody holds them as live objects.
                unsafe { Header::initialize(block, kind) };
                self.stats.pooled -= 1;
                block
            }
            None => Header::allocate(kind)?,
        };
        self.stats.total_allocations += 1;
        self.stats.live_objects += 1;
        Some(block)
    }

    fn retire(&mut self, mut block: NonNull<Header>) {
        // SAFETY: callers hold the lock and have checked the header is live.
        let header = unsafe { block.as_mut() };
        let kind = header.kind();
        header.poison();
        self.stats.live_objects = self.stats.live_objects.saturating_sub(1);

        match self.options.policy {
            AllocPolicy::Pooled => {
                self.pools[kind.index()].push(block);
                self.stats.pooled += 1;
            }
            AllocPolicy::Quarantine => {
                self.quarantine.push_back(block);
                if let Some(limit) = self.options.quarantine_limit {
                    while self.quarantine.len() > limit {
                        if let Some(evicted) = self.quarantine.pop_front() {
                            // SAFETY: quarantined blocks are poisoned and unused.
                            unsafe { Header::deallocate(evicted) };
                        }
                    }
                }
                self.stats.quarantined = self.quarantine.len() as u64;
            }
        }
    }

    fn teardown(self) {
        let retained = self
            .quarantine
            .into_iter()
            .chain(self.pools.into_iter().flatten());
        for block in retained {
            // SAFETY: retained blocks are poisoned and owned by the library.
            unsafe { Header::deallocate(block) };
        }
    }
}

/// Outcome of [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Started,
    Joined,
    Conflict,
}

pub fn init(options: InitOptions) -> InitOutcome {
    let mut guard = LIBRARY.lock();
    match guard.as_mut() {
        Some(library) if library.options != options => InitOutcome::Conflict,
        Some(library) => {
            library.init_count += 1;
            InitOutcome::Joined
        }
        None => {
            *guard = Some(Library::new(options));
            InitOutcome::Started
        }
    }
}

/// Drops one init reference. Returns true if the library was torn down.
pub fn deinit() -> bool {
    let mut guard = LIBRARY.lock();
    let Some(library) = guard.as_mut() else {
        return false;
    };
    library.init_count -= 1;
    if library.init_count > 0 {
        return false;
    }
    if let Some(library) = guard.take() {
        library.teardown();
    }
    true
}

pub fn is_initialized() -> bool {
    LIBRARY.lock().is_some()
}

pub fn allocate(kind: BlockKind) -> Option<NonNull<Header>> {
    LIBRARY.lock().as_mut()?.allocate(kind)
}

/// Drops one reference of a mini-object, or frees a structure.
///
/// # Safety
///
/// `block` must be a pointer previously returned by [`allocate`] whose memory
/// has not been returned to the system allocator.
pub unsafe fn release(block: NonNull<Header>, expected: BlockKind) -> Released {
    let mut guard = LIBRARY.lock();
    // SAFETY: guaranteed by the caller.
    let header = unsafe { block.as_ref() };

    if header.is_poisoned() {
        if let Some(library) = guard.as_mut() {
            library.stats.double_releases += 1;
        }
        return Released::DoubleRelease;
    }
    if !header.is_live() || header.kind() != expected {
        if let Some(library) = guard.as_mut() {
            library.stats.invalid_releases += 1;
        }
        return Released::Invalid;
    }
    if expected == BlockKind::MiniObject && !header.dec_ref() {
        return Released::StillReferenced;
    }

    match guard.as_mut() {
        Some(library) => library.retire(block),
        // Objects that outlive the session go straight back to the system.
        // SAFETY: the header is live and this was its last reference.
        None => unsafe { Header::deallocate(block) },
    }
    Released::Retired
}

pub fn stats() -> Option<NatStats> {
    LIBRARY.lock().as_ref().map(|library| library.stats)
}
