//! Memory strategy: the allocation collaborator shared by `Sequence` and
//! `ChainedHashMap`.
//!
//! Storage itself lives in slot arenas. A strategy decides whether a record
//! may be created and is told when it is released; every successful
//! `allocate` is matched by exactly one `deallocate` of the same kind and
//! count over the lifetime of the container that made it.

use core::cell::Cell;
use core::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Kind of record a container asks its strategy for.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Record {
    /// One node of a `Sequence`.
    Node,
    /// One key/value record of a `ChainedHashMap`.
    Entry,
}

impl Record {
    const COUNT: usize = 2;

    fn slot(self) -> usize {
        match self {
            Record::Node => 0,
            Record::Entry => 1,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Node => f.write_str("sequence node"),
            Record::Entry => f.write_str("entry"),
        }
    }
}

/// Refusal from a memory strategy. Containers pass it through unchanged.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("memory strategy refused {count} {record} record(s)")]
pub struct AllocError {
    pub record: Record,
    pub count: usize,
}

/// Resource provider consulted before a container creates records and
/// notified after it destroys them.
pub trait MemoryStrategy {
    /// Reserve `count` records of `record` kind, or refuse.
    fn allocate(&self, record: Record, count: usize) -> Result<(), AllocError>;

    /// Release records previously reserved with `allocate`.
    fn deallocate(&self, record: Record, count: usize);

    /// Strategy a copy-constructed container should use.
    fn select_on_copy(&self) -> Rc<dyn MemoryStrategy>;
}

/// Strategy that never refuses and keeps no books.
#[derive(Copy, Clone, Debug, Default)]
pub struct Global;

impl MemoryStrategy for Global {
    #[inline]
    fn allocate(&self, _record: Record, _count: usize) -> Result<(), AllocError> {
        Ok(())
    }

    #[inline]
    fn deallocate(&self, _record: Record, _count: usize) {}

    fn select_on_copy(&self) -> Rc<dyn MemoryStrategy> {
        Rc::new(Global)
    }
}

#[derive(Debug, Default)]
struct BudgetState {
    limit: Cell<Option<usize>>,
    live: [Cell<usize>; Record::COUNT],
    allocations: Cell<usize>,
    deallocations: Cell<usize>,
}

/// Accounting strategy with an optional cap on live records.
///
/// Clones share the same books, so a copy selected via `select_on_copy`
/// draws from the same budget as its source.
#[derive(Clone, Debug, Default)]
pub struct Budget {
    state: Rc<BudgetState>,
}

impl Budget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        let b = Self::default();
        b.set_limit(Some(limit));
        b
    }

    pub fn set_limit(&self, limit: Option<usize>) {
        self.state.limit.set(limit);
    }

    pub fn limit(&self) -> Option<usize> {
        self.state.limit.get()
    }

    /// Records of `record` kind currently reserved.
    pub fn live(&self, record: Record) -> usize {
        self.state.live[record.slot()].get()
    }

    pub fn live_total(&self) -> usize {
        self.state.live.iter().map(Cell::get).sum()
    }

    /// Number of successful `allocate` calls.
    pub fn allocations(&self) -> usize {
        self.state.allocations.get()
    }

    /// Number of `deallocate` calls.
    pub fn deallocations(&self) -> usize {
        self.state.deallocations.get()
    }
}

impl MemoryStrategy for Budget {
    fn allocate(&self, record: Record, count: usize) -> Result<(), AllocError> {
        let live = self.live_total();
        if let Some(limit) = self.state.limit.get() {
            if live.saturating_add(count) > limit {
                log::trace!(
                    "budget refused {} {} record(s): {} live, limit {}",
                    count,
                    record,
                    live,
                    limit
                );
                return Err(AllocError { record, count });
            }
        }
        let cell = &self.state.live[record.slot()];
        cell.set(cell.get() + count);
        self.state.allocations.set(self.state.allocations.get() + 1);
        Ok(())
    }

    fn deallocate(&self, record: Record, count: usize) {
        let cell = &self.state.live[record.slot()];
        let live = cell.get();
        assert!(
            live >= count,
            "released {count} {record} record(s) with only {live} live"
        );
        cell.set(live - count);
        self.state
            .deallocations
            .set(self.state.deallocations.get() + 1);
    }

    fn select_on_copy(&self) -> Rc<dyn MemoryStrategy> {
        Rc::new(self.clone())
    }
}

/// Whether assignment hands the source's strategy to the target.
///
/// The target's policy decides. Defaults follow the usual allocator
/// convention: copy assignment keeps the target's strategy, move
/// assignment adopts the source's.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Propagation {
    pub on_copy_assign: bool,
    pub on_move_assign: bool,
}

impl Default for Propagation {
    fn default() -> Self {
        Self {
            on_copy_assign: false,
            on_move_assign: true,
        }
    }
}

/// Shared handle to a strategy plus its propagation policy.
#[derive(Clone)]
pub struct Memory {
    strategy: Rc<dyn MemoryStrategy>,
    policy: Propagation,
}

impl Memory {
    pub fn global() -> Self {
        Self::from_shared(Rc::new(Global))
    }

    pub fn new<M: MemoryStrategy + 'static>(strategy: M) -> Self {
        Self::from_shared(Rc::new(strategy))
    }

    pub fn from_shared(strategy: Rc<dyn MemoryStrategy>) -> Self {
        Self {
            strategy,
            policy: Propagation::default(),
        }
    }

    pub fn with_policy(mut self, policy: Propagation) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> Propagation {
        self.policy
    }

    pub fn strategy(&self) -> &Rc<dyn MemoryStrategy> {
        &self.strategy
    }

    /// True when both handles point at the same strategy instance.
    pub fn same_strategy(&self, other: &Memory) -> bool {
        core::ptr::eq(
            Rc::as_ptr(&self.strategy) as *const (),
            Rc::as_ptr(&other.strategy) as *const (),
        )
    }

    #[inline]
    pub(crate) fn allocate(&self, record: Record, count: usize) -> Result<(), AllocError> {
        if count == 0 {
            return Ok(());
        }
        self.strategy.allocate(record, count)
    }

    #[inline]
    pub(crate) fn deallocate(&self, record: Record, count: usize) {
        if count > 0 {
            self.strategy.deallocate(record, count);
        }
    }

    pub(crate) fn select_on_copy(&self) -> Memory {
        Memory {
            strategy: self.strategy.select_on_copy(),
            policy: self.policy,
        }
    }

    /// Reserve every `(record, count)` pair, or none of them.
    pub(crate) fn allocate_all(&self, records: &[(Record, usize)]) -> Result<(), AllocError> {
        for (done, &(record, count)) in records.iter().enumerate() {
            if let Err(e) = self.allocate(record, count) {
                for &(r, c) in &records[..done] {
                    self.deallocate(r, c);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Move the books for `records` from `from` to `self`.
    ///
    /// All reservations are made in `self` first; on refusal the ones
    /// already made are returned and `from` is left untouched.
    pub(crate) fn take_over(
        &self,
        from: &Memory,
        records: &[(Record, usize)],
    ) -> Result<(), AllocError> {
        self.allocate_all(records)?;
        for &(record, count) in records {
            from.deallocate(record, count);
        }
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("strategy", &Rc::as_ptr(&self.strategy))
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_tracks_live_records_per_kind() {
        let b = Budget::unlimited();
        b.allocate(Record::Node, 3).unwrap();
        b.allocate(Record::Entry, 2).unwrap();
        assert_eq!(b.live(Record::Node), 3);
        assert_eq!(b.live(Record::Entry), 2);
        assert_eq!(b.live_total(), 5);

        b.deallocate(Record::Node, 3);
        assert_eq!(b.live(Record::Node), 0);
        assert_eq!(b.allocations(), 2);
        assert_eq!(b.deallocations(), 1);
    }

    #[test]
    fn budget_refuses_past_limit_without_side_effects() {
        let b = Budget::with_limit(2);
        b.allocate(Record::Node, 2).unwrap();
        let err = b.allocate(Record::Entry, 1).unwrap_err();
        assert_eq!(
            err,
            AllocError {
                record: Record::Entry,
                count: 1
            }
        );
        assert_eq!(b.live_total(), 2);
        assert_eq!(b.allocations(), 1);

        b.set_limit(None);
        assert!(b.allocate(Record::Entry, 1).is_ok());
    }

    #[test]
    fn releasing_more_than_live_panics() {
        let b = Budget::unlimited();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            b.deallocate(Record::Entry, 1);
        }));
        assert!(res.is_err(), "double release must be detected");
    }

    #[test]
    fn copy_selection_shares_budget_books() {
        let b = Budget::unlimited();
        let m = Memory::new(b.clone());
        let copy = m.select_on_copy();
        copy.allocate(Record::Node, 4).unwrap();
        assert_eq!(b.live(Record::Node), 4);
        assert!(!copy.same_strategy(&m));
        assert_eq!(copy.policy(), m.policy());
    }

    #[test]
    fn zero_count_requests_never_reach_the_strategy() {
        let b = Budget::with_limit(0);
        let m = Memory::new(b.clone());
        assert!(m.allocate(Record::Entry, 0).is_ok());
        m.deallocate(Record::Entry, 0);
        assert_eq!(b.allocations(), 0);
        assert_eq!(b.deallocations(), 0);
    }

    #[test]
    fn take_over_is_all_or_nothing() {
        let src_books = Budget::unlimited();
        let dst_books = Budget::with_limit(3);
        let src = Memory::new(src_books.clone());
        let dst = Memory::new(dst_books.clone());
        src.allocate(Record::Node, 2).unwrap();
        src.allocate(Record::Entry, 2).unwrap();

        let err = dst
            .take_over(&src, &[(Record::Node, 2), (Record::Entry, 2)])
            .unwrap_err();
        assert_eq!(err.record, Record::Entry);
        assert_eq!(dst_books.live_total(), 0);
        assert_eq!(src_books.live_total(), 4);

        dst_books.set_limit(Some(4));
        dst.take_over(&src, &[(Record::Node, 2), (Record::Entry, 2)])
            .unwrap();
        assert_eq!(dst_books.live_total(), 4);
        assert_eq!(src_books.live_total(), 0);
    }

    #[test]
    fn allocate_all_returns_partial_grants_on_refusal() {
        let books = Budget::with_limit(2);
        let m = Memory::new(books.clone());
        let err = m
            .allocate_all(&[(Record::Entry, 1), (Record::Node, 2)])
            .unwrap_err();
        assert_eq!(err.record, Record::Node);
        assert_eq!(books.live_total(), 0);
        m.allocate_all(&[(Record::Entry, 1), (Record::Node, 1)])
            .unwrap();
        assert_eq!(books.live(Record::Entry), 1);
        assert_eq!(books.live(Record::Node), 1);
    }

    #[test]
    fn default_policy_propagates_on_move_only() {
        let p = Memory::global().policy();
        assert!(!p.on_copy_assign);
        assert!(p.on_move_assign);
        let m = Memory::global().with_policy(Propagation {
            on_copy_assign: true,
            on_move_assign: false,
        });
        assert!(m.policy().on_copy_assign);
        assert!(!m.policy().on_move_assign);
    }
}
