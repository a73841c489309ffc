//! The Event Bus and escalation protocol (C11, §4.11).
//!
//! A single multi-producer stream fanned out to zero or more subscribers.
//! Debug-level events use drop-oldest semantics per subscriber so a slow
//! consumer never backpressures a producer; control events (escalations,
//! session-done) block until the subscriber has room, since those must
//! never be silently dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::time::Duration;

use crate::model::event::{Event, EventType};
use crate::model::task::TaskId;

const DEFAULT_CAPACITY: usize = 256;

fn is_control(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::TaskEscalation | EventType::MergeConflict | EventType::SessionDone
    )
}

struct Queue {
    events: Mutex<VecDeque<Event>>,
    ready: Condvar,
    capacity: usize,
}

/// The multi-producer, multi-consumer typed event stream (§4.11).
pub struct EventBus {
    subscribers: Mutex<HashMap<u64, Arc<Queue>>>,
    next_subscriber_id: AtomicU64,
    capacity: usize,
    escalations: Mutex<HashMap<u64, mpsc::Sender<EscalationResponse>>>,
    next_escalation_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Build a bus whose per-subscriber queues hold up to `capacity`
    /// events before debug-level publication starts dropping the oldest.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(0),
            capacity,
            escalations: Mutex::new(HashMap::new()),
            next_escalation_id: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber (TUI, log file, headless printer, §4.11).
    #[must_use]
    pub fn subscribe(self: &Arc<Self>) -> EventReceiver {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::new(Queue {
            events: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            capacity: self.capacity,
        });
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, queue.clone());
        EventReceiver {
            id,
            bus: self.clone(),
            queue,
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id);
    }

    /// Publish one event to every live subscriber.
    pub fn publish(&self, event: Event) {
        let control = is_control(event.event_type);
        let subs = self.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for queue in subs.values() {
            let mut events = queue.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if events.len() >= queue.capacity {
                if control {
                    while events.len() >= queue.capacity {
                        events = queue
                            .ready
                            .wait(events)
                            .unwrap_or_else(std::sync::PoisonError::into_inner);
                    }
                } else {
                    events.pop_front();
                }
            }
            events.push_back(event.clone());
            queue.ready.notify_all();
        }
    }

    /// Publish a [`Question`] as a `TaskEscalation` event and return an id a
    /// consumer uses to [`respond`](Self::respond), plus the receiver the
    /// caller blocks on for the answer (§4.11 Escalation protocol).
    pub fn escalate(&self, question: Question) -> mpsc::Receiver<EscalationResponse> {
        let id = self.next_escalation_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        self.escalations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, tx);

        let mut metadata = serde_json::Map::new();
        metadata.insert("escalation_id".to_owned(), serde_json::json!(id));
        metadata.insert("allowed_actions".to_owned(), serde_json::json!(question.allowed_actions));

        let mut event = Event::new(EventType::TaskEscalation, 0, question.context);
        if let Some(task_id) = question.task_id {
            event = event.with_task(task_id);
        }
        event.metadata = metadata;
        self.publish(event);

        rx
    }

    /// A consumer's answer to a pending escalation. Returns `false` if `id`
    /// is unknown (already answered, or never issued).
    pub fn respond(&self, id: u64, response: EscalationResponse) -> bool {
        let sender = self
            .escalations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id);
        sender.is_some_and(|tx| tx.send(response).is_ok())
    }
}

/// A per-subscriber handle draining the bus.
pub struct EventReceiver {
    id: u64,
    bus: Arc<EventBus>,
    queue: Arc<Queue>,
}

impl EventReceiver {
    /// Block until an event is available, or `timeout` elapses.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        let events = self.queue.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (mut events, result) = self
            .queue
            .ready
            .wait_timeout_while(events, timeout, VecDeque::is_empty)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if result.timed_out() {
            return None;
        }
        events.pop_front()
    }

    /// Drain whatever is currently queued without blocking.
    pub fn drain(&self) -> Vec<Event> {
        let mut events = self.queue.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        events.drain(..).collect()
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

/// A human-decision request raised by the Executor, Merger, or Architect
/// Loop (§4.11).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Question {
    /// The task this question concerns, if any.
    pub task_id: Option<TaskId>,
    /// Free-text context shown to the human.
    pub context: String,
    /// The set of actions the consumer may reply with.
    pub allowed_actions: Vec<String>,
}

/// A consumer's answer to a [`Question`].
#[derive(Clone, Debug, PartialEq)]
pub struct EscalationResponse {
    /// The chosen action, one of the originating question's `allowed_actions`.
    pub action: String,
    /// Unix epoch milliseconds when the decision was made.
    pub timestamp_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_receives_published_event() {
        let bus = Arc::new(EventBus::default());
        let rx = bus.subscribe();
        bus.publish(Event::new(EventType::TaskStarted, 0, "go"));
        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.event_type, EventType::TaskStarted);
    }

    #[test]
    fn debug_events_drop_oldest_when_full() {
        let bus = Arc::new(EventBus::new(2));
        let rx = bus.subscribe();
        bus.publish(Event::new(EventType::TaskStarted, 1, "a"));
        bus.publish(Event::new(EventType::TaskStarted, 2, "b"));
        bus.publish(Event::new(EventType::TaskStarted, 3, "c"));
        let drained = rx.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].timestamp_ms, 2);
        assert_eq!(drained[1].timestamp_ms, 3);
    }

    #[test]
    fn escalation_round_trip() {
        let bus = Arc::new(EventBus::default());
        let rx_events = bus.subscribe();
        let reply_rx = bus.escalate(Question {
            task_id: None,
            context: "conflict on main.rs".to_owned(),
            allowed_actions: vec!["skip_agent".to_owned(), "abort_session".to_owned()],
        });

        let event = rx_events.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.event_type, EventType::TaskEscalation);
        let id = event.metadata["escalation_id"].as_u64().unwrap();

        assert!(bus.respond(
            id,
            EscalationResponse {
                action: "skip_agent".to_owned(),
                timestamp_ms: 123,
            }
        ));
        let response = reply_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(response.action, "skip_agent");
    }

    #[test]
    fn respond_to_unknown_id_returns_false() {
        let bus = EventBus::default();
        assert!(!bus.respond(
            999,
            EscalationResponse {
                action: "retry".to_owned(),
                timestamp_ms: 0,
            }
        ));
    }

    #[test]
    fn unsubscribed_receiver_stops_getting_events() {
        let bus = Arc::new(EventBus::default());
        {
            let rx = bus.subscribe();
            drop(rx);
        }
        // No subscribers left; publish must not panic or block.
        bus.publish(Event::new(EventType::SessionDone, 0, "done"));
    }
}
