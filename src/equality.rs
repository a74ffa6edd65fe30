//! Key-equality strategy.
//!
//! Lookups hand the strategy a stored key (borrowed as `Q`) and the probe.
//! `StdEq` defers to `Eq`; any `Fn(&Q, &Q) -> bool` closure also works.

pub trait KeyEquality<Q: ?Sized> {
    fn equivalent(&self, stored: &Q, probe: &Q) -> bool;
}

/// Equality through `Q: Eq`.
#[derive(Copy, Clone, Debug, Default)]
pub struct StdEq;

impl<Q: ?Sized + Eq> KeyEquality<Q> for StdEq {
    #[inline]
    fn equivalent(&self, stored: &Q, probe: &Q) -> bool {
        stored == probe
    }
}

impl<Q: ?Sized, F> KeyEquality<Q> for F
where
    F: Fn(&Q, &Q) -> bool,
{
    #[inline]
    fn equivalent(&self, stored: &Q, probe: &Q) -> bool {
        self(stored, probe)
    }
}
