use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Handle returned by [`TimerFacility::schedule_after`]; used to cancel a pending timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerEvent<T> {
    pub id: TimerId,
    pub deadline_ns: u64,
    pub payload: T,
}

/// Narrow timer capability consumed by devices.
///
/// Devices never see the concrete scheduler: they ask for a payload to be delivered after a
/// delay and may cancel it again before it fires. A timer that has already been delivered can no
/// longer be cancelled; `cancel` on such an id is a no-op.
pub trait TimerFacility<T> {
    /// Current guest virtual time in nanoseconds.
    fn now_ns(&self) -> u64;
    fn schedule_after(&mut self, delay_ns: u64, payload: T) -> TimerId;
    fn cancel(&mut self, id: TimerId);
}

/// Deterministic one-shot timer queue driven by virtual time.
///
/// Events are ordered by deadline, then by scheduling order, so two timers with the same
/// deadline always fire in the order they were armed.
#[derive(Debug)]
pub struct TimerQueue<T> {
    now_ns: u64,
    next_id: u64,
    pending: BTreeMap<(u64, TimerId), T>,
    deadlines: HashMap<TimerId, u64>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            now_ns: 0,
            next_id: 1,
            pending: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub fn deadline(&self, id: TimerId) -> Option<u64> {
        self.deadlines.get(&id).copied()
    }

    /// Arms a timer at an absolute virtual-time deadline.
    ///
    /// Deadlines in the past are allowed; they become due immediately.
    pub fn schedule(&mut self, deadline_ns: u64, payload: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.insert((deadline_ns, id), payload);
        self.deadlines.insert(id, deadline_ns);
        id
    }

    /// Cancels a pending timer. Returns `false` if the timer already fired or never existed.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => {
                self.pending.remove(&(deadline, id));
                true
            }
            None => false,
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.keys().next().map(|&(deadline, _)| deadline)
    }

    /// Moves virtual time forward without delivering anything.
    ///
    /// This models a host that stopped running timer callbacks (paused VM, overloaded host): the
    /// overdue events are delivered late by the next [`Self::pop_due`] / [`Self::advance_to`].
    /// Time never moves backwards.
    pub fn set_now(&mut self, now_ns: u64) {
        self.now_ns = self.now_ns.max(now_ns);
    }

    /// Pops the earliest event whose deadline is at or before the current time.
    pub fn pop_due(&mut self) -> Option<TimerEvent<T>> {
        let (&(deadline_ns, id), _) = self.pending.iter().next()?;
        if deadline_ns > self.now_ns {
            return None;
        }
        let payload = self.pending.remove(&(deadline_ns, id))?;
        self.deadlines.remove(&id);
        Some(TimerEvent {
            id,
            deadline_ns,
            payload,
        })
    }

    /// Delivers the next event due at or before `target_ns`, moving time to its deadline.
    ///
    /// Returns `None` (with time moved to `target_ns`) once nothing else is due. Callers loop on
    /// this so that each event observes virtual time exactly at its deadline and events armed by
    /// a handler are considered in the same pass.
    pub fn advance_to(&mut self, target_ns: u64) -> Option<TimerEvent<T>> {
        match self.next_deadline() {
            Some(deadline) if deadline <= target_ns => {
                self.set_now(deadline);
                self.pop_due()
            }
            _ => {
                self.set_now(target_ns);
                None
            }
        }
    }
}

impl<T> TimerFacility<T> for TimerQueue<T> {
    fn now_ns(&self) -> u64 {
        self.now_ns
    }

    fn schedule_after(&mut self, delay_ns: u64, payload: T) -> TimerId {
        let deadline = self.now_ns.saturating_add(delay_ns);
        self.schedule(deadline, payload)
    }

    fn cancel(&mut self, id: TimerId) {
        TimerQueue::cancel(self, id);
    }
}

/// Cloneable handle to a [`TimerQueue`] shared between a device and the machine loop.
///
/// Every method takes the borrow only for its own duration, so handlers invoked with an event
/// popped from the queue are free to schedule and cancel timers on the same queue.
#[derive(Debug)]
pub struct SharedTimerQueue<T> {
    inner: Rc<RefCell<TimerQueue<T>>>,
}

impl<T> Clone for SharedTimerQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for SharedTimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedTimerQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(TimerQueue::new())),
        }
    }

    pub fn now_ns(&self) -> u64 {
        self.inner.borrow().now_ns()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.inner.borrow().is_pending(id)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.inner.borrow().next_deadline()
    }

    pub fn set_now(&self, now_ns: u64) {
        self.inner.borrow_mut().set_now(now_ns);
    }

    pub fn pop_due(&self) -> Option<TimerEvent<T>> {
        self.inner.borrow_mut().pop_due()
    }

    pub fn advance_to(&self, target_ns: u64) -> Option<TimerEvent<T>> {
        self.inner.borrow_mut().advance_to(target_ns)
    }
}

impl<T> TimerFacility<T> for SharedTimerQueue<T> {
    fn now_ns(&self) -> u64 {
        self.inner.borrow().now_ns()
    }

    fn schedule_after(&mut self, delay_ns: u64, payload: T) -> TimerId {
        self.inner.borrow_mut().schedule_after(delay_ns, payload)
    }

    fn cancel(&mut self, id: TimerId) {
        self.inner.borrow_mut().cancel(id);
    }
}
