use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::trace;

use super::types::Event;

/// A single subscriber's bounded queue. Overflow drops the oldest queued
/// event rather than blocking the publisher — the event bus must never
/// stall the poller or the discovery worker.
struct SubscriberQueue {
  events: Mutex<VecDeque<Event>>,
  ready: Condvar,
  capacity: usize,
}

impl SubscriberQueue {
  fn push(&self, event: Event) {
    let mut events = self.events.lock().unwrap();
    if events.len() >= self.capacity {
      events.pop_front();
      trace!("event bus subscriber queue full, dropped oldest event");
    }
    events.push_back(event);
    self.ready.notify_one();
  }
}

/// A handle returned by [`EventBus::subscribe`]. Dropping it unsubscribes
/// on the next publish (dead queues are pruned lazily).
pub struct Subscription {
  queue: Arc<SubscriberQueue>,
}

impl Subscription {
  /// Blocks until an event is available or `timeout` elapses.
  pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
    let mut events = self.queue.events.lock().unwrap();
    if events.is_empty() {
      let (guard, result) = self.queue.ready.wait_timeout(events, timeout).unwrap();
      events = guard;
      if result.timed_out() && events.is_empty() {
        return None;
      }
    }
    events.pop_front()
  }

  /// Non-blocking poll.
  pub fn try_recv(&self) -> Option<Event> {
    self.queue.events.lock().unwrap().pop_front()
  }
}

/// Lightweight internal publish/subscribe bus for telemetry, diagnostics,
/// alerts, and discovery progress. Delivery is best-effort: a stalled
/// subscriber loses its oldest events, never blocks the publisher.
pub struct EventBus {
  subscribers: Mutex<Vec<Arc<SubscriberQueue>>>,
  capacity: usize,
}

impl EventBus {
  pub fn new(capacity: usize) -> Self {
    EventBus { subscribers: Mutex::new(Vec::new()), capacity }
  }

  pub fn subscribe(&self) -> Subscription {
    let queue = Arc::new(SubscriberQueue { events: Mutex::new(VecDeque::new()), ready: Condvar::new(), capacity: self.capacity });
    self.subscribers.lock().unwrap().push(queue.clone());
    Subscription { queue }
  }

  pub fn publish(&self, event: Event) {
    let subscribers = self.subscribers.lock().unwrap();
    for subscriber in subscribers.iter() {
      if Arc::strong_count(subscriber) > 1 {
        subscriber.push(event.clone());
      }
    }
  }
}

impl Default for EventBus {
  fn default() -> Self {
    EventBus::new(256)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::identity::UnitId;

  #[test]
  fn publish_delivers_to_subscriber() {
    let bus = EventBus::new(4);
    let sub = bus.subscribe();
    bus.publish(Event::DiscoveryProgress { current: 1, total: 10, unit_id: UnitId::new(1).unwrap() });
    assert!(matches!(sub.try_recv(), Some(Event::DiscoveryProgress { current: 1, .. })));
  }

  #[test]
  fn overflow_drops_oldest() {
    let bus = EventBus::new(2);
    let sub = bus.subscribe();
    for i in 1..=3u32 {
      bus.publish(Event::DiscoveryProgress { current: i, total: 3, unit_id: UnitId::new(1).unwrap() });
    }
    let first = sub.try_recv().unwrap();
    assert!(matches!(first, Event::DiscoveryProgress { current: 2, .. }));
  }
}
