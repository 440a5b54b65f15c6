//! Shared coordination flags and scoped guards over them.

use std::sync::atomic::{AtomicBool, Ordering};

/// Flags the tool changer and the runout monitor both observe.
#[derive(Debug, Default)]
pub struct Coordination {
    toolchange: AtomicBool,
    detection_active: AtomicBool,
    handling: AtomicBool,
    rebaseline: AtomicBool,
}

impl Coordination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toolchange_in_progress(&self) -> bool {
        self.toolchange.load(Ordering::SeqCst)
    }

    pub fn detection_active(&self) -> bool {
        self.detection_active.load(Ordering::SeqCst)
    }

    /// Returns the previous value.
    pub fn set_detection_active(&self, active: bool) -> bool {
        self.detection_active.swap(active, Ordering::SeqCst)
    }

    pub fn handling_in_progress(&self) -> bool {
        self.handling.load(Ordering::SeqCst)
    }

    /// Mark a tool change running until the guard drops.
    pub fn toolchange_scope(&self) -> ScopedFlag<'_> {
        ScopedFlag::set(&self.toolchange, true)
    }

    /// Suspend runout detection until the guard drops.
    pub fn suspend_detection(&self) -> ScopedFlag<'_> {
        ScopedFlag::set(&self.detection_active, false)
    }

    /// Mark runout handling running until the guard drops.
    ///
    /// `None` when handling is already in progress.
    pub fn try_handling_scope(&self) -> Option<ScopedFlag<'_>> {
        self.handling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ScopedFlag {
                flag: &self.handling,
                prior: false,
            })
    }

    /// Ask the monitor to take a fresh sensor baseline on its next cycle.
    pub fn request_rebaseline(&self) {
        self.rebaseline.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_rebaseline(&self) -> bool {
        self.rebaseline.swap(false, Ordering::SeqCst)
    }
}

/// Restores a flag to its prior value on drop.
#[must_use = "the flag is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ScopedFlag<'a> {
    flag: &'a AtomicBool,
    prior: bool,
}

impl<'a> ScopedFlag<'a> {
    pub fn set(flag: &'a AtomicBool, value: bool) -> Self {
        let prior = flag.swap(value, Ordering::SeqCst);
        Self { flag, prior }
    }

    pub fn prior(&self) -> bool {
        self.prior
    }
}

impl Drop for ScopedFlag<'_> {
    fn drop(&mut self) {
        self.flag.store(self.prior, Ordering::SeqCst);
    }
}
