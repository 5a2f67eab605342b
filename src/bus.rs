//! In-process event bus.
//!
//! Subscribers register with an [`EventMask`] and an optional predicate.
//! `publish` hands the event to every matching subscriber, in subscription
//! order, before returning. Nothing is queued.

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::error::ReplayError;
use crate::events::{Event, EventKind, EventMask};

/// Trait for consumers of the replay event stream.
pub trait Subscriber {
    /// Handle one event. An error aborts the publish and is returned to the
    /// publisher.
    fn on_event(&mut self, event: &Event) -> Result<(), ReplayError>;
}

pub type SharedSubscriber = Rc<RefCell<dyn Subscriber>>;

/// Extra filter applied after the mask.
pub type Predicate = Box<dyn Fn(&Event) -> bool>;

struct Subscription {
    subscriber: SharedSubscriber,
    mask: EventMask,
    predicate: Option<Predicate>,
}

impl Subscription {
    fn accepts(&self, event: &Event) -> bool {
        self.mask.contains(event.kind().mask())
            && self.predicate.as_ref().map_or(true, |p| p(event))
    }
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    published: [u64; EventKind::ALL.len()],
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Returns false if it is already subscribed.
    pub fn subscribe(
        &mut self,
        subscriber: SharedSubscriber,
        mask: EventMask,
        predicate: Option<Predicate>,
    ) -> bool {
        if self.position(&subscriber).is_some() {
            return false;
        }
        self.subscriptions.push(Subscription {
            subscriber,
            mask,
            predicate,
        });
        true
    }

    /// Remove a subscriber. Returns false if it was not subscribed.
    pub fn unsubscribe(&mut self, subscriber: &SharedSubscriber) -> bool {
        match self.position(subscriber) {
            Some(idx) => {
                self.subscriptions.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Deliver `event` to every matching subscriber.
    pub fn publish(&mut self, event: &Event) -> Result<(), ReplayError> {
        self.published[event.kind().index()] += 1;
        trace!("publish {event}");

        for subscription in &self.subscriptions {
            if subscription.accepts(event) {
                subscription.subscriber.borrow_mut().on_event(event)?;
            }
        }
        Ok(())
    }

    /// Number of events published so far of the given kind.
    pub fn published(&self, kind: EventKind) -> u64 {
        self.published[kind.index()]
    }

    fn position(&self, subscriber: &SharedSubscriber) -> Option<usize> {
        self.subscriptions
            .iter()
            .position(|s| Rc::ptr_eq(&s.subscriber, subscriber))
    }
}
