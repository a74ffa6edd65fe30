//! Debug-only reentrancy guard.
//!
//! `ChainedHashMap` calls user `Hash` and key-equality code while its
//! directory and run links may be mid-update. Calling back into the same
//! map from there panics in debug builds. Release builds compile the guard
//! away.

use core::cell::Cell;
use core::marker::PhantomData;

#[derive(Debug)]
pub(crate) struct DebugReentrancy {
    #[cfg(debug_assertions)]
    busy: Cell<bool>,
    // Single-threaded: keep the owner !Send + !Sync.
    _nosend: PhantomData<*mut ()>,
}

impl DebugReentrancy {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            busy: Cell::new(false),
            _nosend: PhantomData,
        }
    }

    /// Mark the owner busy until the returned guard drops.
    #[inline]
    pub(crate) fn enter(&self) -> Entered<'_> {
        #[cfg(debug_assertions)]
        {
            assert!(
                !self.busy.replace(true),
                "ChainedHashMap re-entered from a Hash or KeyEquality callback"
            );
            return Entered { owner: self };
        }

        #[cfg(not(debug_assertions))]
        {
            return Entered { _z: PhantomData };
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct Entered<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.owner.busy.set(false);
    }
}
