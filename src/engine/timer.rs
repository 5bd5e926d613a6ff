// src/engine/timer.rs

use crate::engine::ConnId;

use slab::Slab;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Which of a connection's two timers an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
  Read,
  Write,
}

/// Key of one timer slot inside the engine's [`TimerSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerHandle(usize);

#[derive(Debug)]
struct TimerState {
  conn: ConnId,
  kind: TimerKind,
  /// Bumped on every arm/disable; heap entries carrying an older
  /// generation are stale and skipped.
  generation: u64,
  deadline: Option<Instant>,
}

/// Heap entry ordering: earliest deadline first (via `Reverse`).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
  deadline: Instant,
  generation: u64,
  slot: usize,
}

/// Deadline-ordered timer set with lazy cancellation.
///
/// Disabling a timer only bumps its generation; the matching heap entry is
/// discarded when it surfaces. Disabling an unarmed timer is a no-op.
#[derive(Debug, Default)]
pub(crate) struct TimerSet {
  heap: BinaryHeap<Reverse<HeapEntry>>,
  slots: Slab<TimerState>,
}

impl TimerSet {
  pub(crate) fn register(&mut self, conn: ConnId, kind: TimerKind) -> TimerHandle {
    let slot = self.slots.insert(TimerState {
      conn,
      kind,
      generation: 0,
      deadline: None,
    });
    TimerHandle(slot)
  }

  pub(crate) fn arm(&mut self, handle: TimerHandle, deadline: Instant) {
    let Some(state) = self.slots.get_mut(handle.0) else {
      return;
    };
    state.generation += 1;
    state.deadline = Some(deadline);
    self.heap.push(Reverse(HeapEntry {
      deadline,
      generation: state.generation,
      slot: handle.0,
    }));
  }

  pub(crate) fn disable(&mut self, handle: TimerHandle) {
    let Some(state) = self.slots.get_mut(handle.0) else {
      return;
    };
    if state.deadline.is_some() {
      state.generation += 1;
      state.deadline = None;
    }
  }

  pub(crate) fn is_armed(&self, handle: TimerHandle) -> bool {
    self.slots.get(handle.0).is_some_and(|s| s.deadline.is_some())
  }

  /// Frees a timer slot when its connection is closed.
  pub(crate) fn release(&mut self, handle: TimerHandle) {
    if self.slots.contains(handle.0) {
      self.slots.remove(handle.0);
    }
  }

  /// Earliest live deadline, discarding stale heap heads on the way.
  pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
    while let Some(Reverse(head)) = self.heap.peek() {
      if self.entry_is_live(head) {
        return Some(head.deadline);
      }
      self.heap.pop();
    }
    None
  }

  /// Pops one expired timer, if any. The timer is consumed: its deadline is
  /// cleared, so a later `disable` is the unarmed no-op case.
  pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<(ConnId, TimerKind)> {
    while let Some(Reverse(head)) = self.heap.peek() {
      if !self.entry_is_live(head) {
        self.heap.pop();
        continue;
      }
      if head.deadline > now {
        return None;
      }
      let slot = head.slot;
      self.heap.pop();
      let state = &mut self.slots[slot];
      state.deadline = None;
      return Some((state.conn, state.kind));
    }
    None
  }

  fn entry_is_live(&self, entry: &HeapEntry) -> bool {
    self
      .slots
      .get(entry.slot)
      .is_some_and(|s| s.generation == entry.generation && s.deadline.is_some())
  }
}
