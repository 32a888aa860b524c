//! Machine lifecycle notifications (clock reset, suspend, resume).
//!
//! Subscribers receive events through a per-subscription mailbox instead of a stored callback,
//! which keeps the notifier free of re-entrancy into devices that are already borrowed. A
//! [`LifecycleSubscription`] unsubscribes itself when dropped.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The host wall clock was stepped, or the machine was reset.
    ClockReset,
    /// The guest entered a suspend state (ACPI S3).
    Suspend,
    /// The guest left the suspend state.
    Resume,
}

#[derive(Debug, Default)]
struct Mailboxes {
    next_id: u64,
    queues: BTreeMap<u64, VecDeque<LifecycleEvent>>,
}

#[derive(Debug, Default, Clone)]
pub struct LifecycleNotifier {
    inner: Rc<RefCell<Mailboxes>>,
}

impl LifecycleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> LifecycleSubscription {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.queues.insert(id, VecDeque::new());
        LifecycleSubscription {
            id,
            mailboxes: Rc::downgrade(&self.inner),
        }
    }

    /// Queues `event` for every live subscription.
    pub fn notify(&self, event: LifecycleEvent) {
        let mut inner = self.inner.borrow_mut();
        tracing::debug!(?event, subscribers = inner.queues.len(), "lifecycle event");
        for queue in inner.queues.values_mut() {
            queue.push_back(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().queues.len()
    }
}

#[derive(Debug)]
pub struct LifecycleSubscription {
    id: u64,
    mailboxes: Weak<RefCell<Mailboxes>>,
}

impl LifecycleSubscription {
    /// Takes the oldest undelivered event, if any.
    pub fn try_recv(&self) -> Option<LifecycleEvent> {
        let mailboxes = self.mailboxes.upgrade()?;
        let mut inner = mailboxes.borrow_mut();
        inner.queues.get_mut(&self.id)?.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        self.mailboxes.upgrade().is_some_and(|mailboxes| {
            mailboxes
                .borrow()
                .queues
                .get(&self.id)
                .is_some_and(|queue| !queue.is_empty())
        })
    }
}

impl Drop for LifecycleSubscription {
    fn drop(&mut self) {
        if let Some(mailboxes) = self.mailboxes.upgrade() {
            mailboxes.borrow_mut().queues.remove(&self.id);
        }
    }
}
