//! Sequence: arena-backed doubly-linked ring with a sentinel.
//!
//! Nodes live in a `SlotMap` and link to each other by generational key.
//! The sentinel is not stored in the arena; its links are the `head` and
//! `tail` fields, and it is addressed by `Position::END`. Nodes never move
//! and never change key while linked, so a `Position` stays valid until
//! the node it names is erased, after which it resolves to nothing.

use crate::memory::{AllocError, Memory, Record};
use core::fmt;
use core::marker::PhantomData;
use slotmap::SlotMap;

slotmap::new_key_type! {
    struct NodeKey;
}

/// Handle to a node of a `Sequence`, or to its sentinel (`END`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Position(Option<NodeKey>);

impl Position {
    /// The sentinel: one past the last node, and one before the first.
    pub const END: Position = Position(None);

    #[inline]
    pub fn is_end(self) -> bool {
        self.0.is_none()
    }
}

struct Node<T> {
    value: T,
    prev: Position,
    next: Position,
}

pub struct Sequence<T> {
    nodes: SlotMap<NodeKey, Node<T>>,
    // Sentinel links: `head` is sentinel.next, `tail` is sentinel.prev.
    head: Position,
    tail: Position,
    memory: Memory,
}

impl<T> Sequence<T> {
    pub fn new() -> Self {
        Self::new_in(Memory::global())
    }

    pub fn new_in(memory: Memory) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            head: Position::END,
            tail: Position::END,
            memory,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First node, or `END` when empty.
    #[inline]
    pub fn begin(&self) -> Position {
        self.head
    }

    #[inline]
    pub fn end(&self) -> Position {
        Position::END
    }

    /// Whether `pos` is `END` or names a live node of this sequence.
    pub fn contains(&self, pos: Position) -> bool {
        match pos.0 {
            None => true,
            Some(k) => self.nodes.contains_key(k),
        }
    }

    /// Successor in the ring; `next(END)` is the first node. `None` for a
    /// stale position.
    #[inline]
    pub fn next(&self, pos: Position) -> Option<Position> {
        match pos.0 {
            None => Some(self.head),
            Some(k) => self.nodes.get(k).map(|n| n.next),
        }
    }

    /// Predecessor in the ring; `prev(END)` is the last node. `None` for a
    /// stale position.
    #[inline]
    pub fn prev(&self, pos: Position) -> Option<Position> {
        match pos.0 {
            None => Some(self.tail),
            Some(k) => self.nodes.get(k).map(|n| n.prev),
        }
    }

    #[inline]
    pub fn get(&self, pos: Position) -> Option<&T> {
        self.nodes.get(pos.0?).map(|n| &n.value)
    }

    #[inline]
    pub fn get_mut(&mut self, pos: Position) -> Option<&mut T> {
        self.nodes.get_mut(pos.0?).map(|n| &mut n.value)
    }

    pub fn front(&self) -> Option<&T> {
        self.get(self.head)
    }

    pub fn back(&self) -> Option<&T> {
        self.get(self.tail)
    }

    fn set_next(&mut self, at: Position, to: Position) {
        match at.0 {
            None => self.head = to,
            Some(k) => self.nodes[k].next = to,
        }
    }

    fn set_prev(&mut self, at: Position, to: Position) {
        match at.0 {
            None => self.tail = to,
            Some(k) => self.nodes[k].prev = to,
        }
    }

    /// Create a node holding `value` immediately before `at` and return
    /// its position.
    ///
    /// # Panics
    /// If `at` is a stale position.
    pub fn insert(&mut self, at: Position, value: T) -> Result<Position, AllocError> {
        assert!(self.contains(at), "insert before a stale position");
        self.memory.allocate(Record::Node, 1)?;
        Ok(self.insert_reserved(at, value))
    }

    /// `insert` for a caller that has already been granted the node record.
    pub(crate) fn insert_reserved(&mut self, at: Position, value: T) -> Position {
        debug_assert!(self.contains(at));
        let prev = self.prev(at).unwrap_or(Position::END);
        let key = self.nodes.insert(Node {
            value,
            prev,
            next: at,
        });
        let pos = Position(Some(key));
        self.set_next(prev, pos);
        self.set_prev(at, pos);
        pos
    }

    /// Unlink and destroy the node at `pos`, returning its value. `END` and
    /// stale positions yield `None` and change nothing.
    pub fn erase(&mut self, pos: Position) -> Option<T> {
        let node = self.nodes.remove(pos.0?)?;
        self.set_next(node.prev, node.next);
        self.set_prev(node.next, node.prev);
        self.memory.deallocate(Record::Node, 1);
        Some(node.value)
    }

    /// Relink the existing node `node` so it sits immediately before `at`.
    /// No allocation; `node` keeps its position. Returns false (and does
    /// nothing) if either position is stale or `node` is `END`.
    pub fn move_before(&mut self, at: Position, node: Position) -> bool {
        let Some(key) = node.0 else {
            return false;
        };
        if !self.contains(at) || !self.nodes.contains_key(key) {
            return false;
        }
        if at == node || self.nodes[key].next == at {
            return true;
        }
        let (prev, next) = (self.nodes[key].prev, self.nodes[key].next);
        self.set_next(prev, next);
        self.set_prev(next, prev);

        let before = self.prev(at).unwrap_or(Position::END);
        self.nodes[key].prev = before;
        self.nodes[key].next = at;
        self.set_next(before, node);
        self.set_prev(at, node);
        true
    }

    pub fn push_front(&mut self, value: T) -> Result<Position, AllocError> {
        self.insert(self.head, value)
    }

    pub fn push_back(&mut self, value: T) -> Result<Position, AllocError> {
        self.insert(Position::END, value)
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.erase(self.head)
    }

    pub fn pop_back(&mut self) -> Option<T> {
        self.erase(self.tail)
    }

    pub fn clear(&mut self) {
        let n = self.nodes.len();
        self.nodes.clear();
        self.head = Position::END;
        self.tail = Position::END;
        self.memory.deallocate(Record::Node, n);
    }

    /// Move construction: the returned sequence owns every node; `self` is
    /// left empty, sharing the same memory, and fully usable.
    pub fn take(&mut self) -> Self {
        let empty = Sequence::new_in(self.memory.clone());
        core::mem::replace(self, empty)
    }

    /// Move assignment: every node of `other` moves into `self` and `other`
    /// is left empty. Under the target's policy either `other`'s memory
    /// comes along, or the node books move into `self`'s strategy first; a
    /// refusal there leaves both sides untouched.
    pub fn assign(&mut self, other: &mut Self) -> Result<(), AllocError> {
        if self.memory.policy().on_move_assign || self.memory.same_strategy(&other.memory) {
            *self = other.take();
            return Ok(());
        }
        self.memory
            .take_over(&other.memory, &[(Record::Node, other.len())])?;
        let mut moved = other.take();
        moved.memory = self.memory.clone();
        *self = moved;
        Ok(())
    }

    /// Point the sequence at `memory` without touching either side's books.
    /// The caller has already moved them.
    pub(crate) fn rehome(&mut self, memory: Memory) {
        self.memory = memory;
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            seq: self,
            front: self.head,
            back: self.tail,
            remaining: self.len(),
        }
    }

    /// Mutable traversal in sequence order, lazy and double-ended.
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        IterMut {
            front: self.head,
            back: self.tail,
            remaining: self.nodes.len(),
            nodes: &mut self.nodes,
            _marker: PhantomData,
        }
    }

    /// Positions of every node in sequence order.
    pub fn positions(&self) -> Positions<'_, T> {
        Positions {
            seq: self,
            cur: self.head,
        }
    }
}

impl<T: Clone> Sequence<T> {
    /// Deep copy in traversal order, using the strategy selected for copies.
    pub fn try_clone(&self) -> Result<Self, AllocError> {
        let mut copy = Sequence::new_in(self.memory.select_on_copy());
        for v in self.iter() {
            copy.push_back(v.clone())?;
        }
        Ok(copy)
    }

    /// Copy assignment. On refusal `self` is unchanged.
    pub fn try_clone_from(&mut self, source: &Self) -> Result<(), AllocError> {
        let memory = if self.memory.policy().on_copy_assign {
            source.memory.clone()
        } else {
            self.memory.clone()
        };
        let mut copy = Sequence::new_in(memory);
        for v in source.iter() {
            copy.push_back(v.clone())?;
        }
        *self = copy;
        Ok(())
    }
}

impl<T> Drop for Sequence<T> {
    fn drop(&mut self) {
        self.memory.deallocate(Record::Node, self.nodes.len());
    }
}

impl<T> Default for Sequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for Sequence<T> {
    fn clone(&self) -> Self {
        self.try_clone()
            .unwrap_or_else(|e| panic!("Sequence::clone: {e}"))
    }

    fn clone_from(&mut self, source: &Self) {
        if let Err(e) = self.try_clone_from(source) {
            panic!("Sequence::clone_from: {e}");
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Sequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: PartialEq> PartialEq for Sequence<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<T: Eq> Eq for Sequence<T> {}

impl<T> Extend<T> for Sequence<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for v in iter {
            if let Err(e) = self.push_back(v) {
                panic!("Sequence::extend: {e}");
            }
        }
    }
}

impl<T> FromIterator<T> for Sequence<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut s = Sequence::new();
        s.extend(iter);
        s
    }
}

/// Lazy, double-ended traversal over references.
pub struct Iter<'a, T> {
    seq: &'a Sequence<T>,
    front: Position,
    back: Position,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.seq.nodes.get(self.front.0?)?;
        self.front = node.next;
        self.remaining -= 1;
        Some(&node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> DoubleEndedIterator for Iter<'a, T> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.seq.nodes.get(self.back.0?)?;
        self.back = node.prev;
        self.remaining -= 1;
        Some(&node.value)
    }
}

impl<'a, T> ExactSizeIterator for Iter<'a, T> {}

impl<'a, T> Clone for Iter<'a, T> {
    fn clone(&self) -> Self {
        Iter {
            seq: self.seq,
            front: self.front,
            back: self.back,
            remaining: self.remaining,
        }
    }
}

/// Lazy, double-ended traversal over mutable references.
pub struct IterMut<'a, T> {
    nodes: *mut SlotMap<NodeKey, Node<T>>,
    front: Position,
    back: Position,
    remaining: usize,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T> IterMut<'a, T> {
    /// Hand out the value at `pos` and return it with the node's links.
    ///
    /// # Safety
    /// `pos` must not have been yielded before by this iterator.
    #[inline]
    unsafe fn take(&mut self, pos: Position) -> Option<(&'a mut T, Position, Position)> {
        // SAFETY: the iterator was built from `&'a mut Sequence`, so it owns
        // the only access to the arena for `'a`. The caller yields each node
        // at most once, so no two returned references alias.
        let node = unsafe { (*self.nodes).get_mut(pos.0?)? };
        Some((&mut node.value, node.prev, node.next))
    }
}

impl<'a, T> Iterator for IterMut<'a, T> {
    type Item = &'a mut T;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        // SAFETY: `front` only advances and `remaining` stops it before it
        // reaches a node already taken from the back.
        let (value, _, next) = unsafe { self.take(self.front)? };
        self.front = next;
        self.remaining -= 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> DoubleEndedIterator for IterMut<'a, T> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        // SAFETY: as in `next`, with the roles of the two ends swapped.
        let (value, prev, _) = unsafe { self.take(self.back)? };
        self.back = prev;
        self.remaining -= 1;
        Some(value)
    }
}

impl<'a, T> ExactSizeIterator for IterMut<'a, T> {}

pub struct Positions<'a, T> {
    seq: &'a Sequence<T>,
    cur: Position,
}

impl<'a, T> Iterator for Positions<'a, T> {
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        let key = self.cur.0?;
        let pos = self.cur;
        self.cur = self.seq.nodes.get(key)?.next;
        Some(pos)
    }
}

pub struct IntoIter<T> {
    seq: Sequence<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.seq.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.seq.len(), Some(self.seq.len()))
    }
}

impl<T> DoubleEndedIterator for IntoIter<T> {
    fn next_back(&mut self) -> Option<T> {
        self.seq.pop_back()
    }
}

impl<T> ExactSizeIterator for IntoIter<T> {}

impl<T> IntoIterator for Sequence<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter { seq: self }
    }
}

impl<'a, T> IntoIterator for &'a Sequence<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut Sequence<T> {
    type Item = &'a mut T;
    type IntoIter = IterMut<'a, T>;

    fn into_iter(self) -> IterMut<'a, T> {
        self.iter_mut()
    }
}
