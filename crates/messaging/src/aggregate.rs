//! Recording domain events raised by aggregates.

use chrono::{DateTime, Utc};

use crate::message::DomainEvent;

/// A domain event together with when, and in which order, it was raised.
#[derive(Debug, Clone, PartialEq)]
pub struct RaisedEvent<E> {
    pub event: E,
    pub raised_at: DateTime<Utc>,
    pub sequence: u64,
}

/// Collects the domain events an aggregate raises during one unit of work.
///
/// Aggregates embed a recorder, push events as they mutate, and hand the
/// drained list to the dispatcher before commit.
#[derive(Debug, Clone)]
pub struct EventRecorder<E> {
    events: Vec<RaisedEvent<E>>,
    next_sequence: u64,
}

impl<E> Default for EventRecorder<E> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            next_sequence: 0,
        }
    }
}

impl<E: DomainEvent> EventRecorder<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: E) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.events.push(RaisedEvent {
            event,
            raised_at: Utc::now(),
            sequence,
        });
    }

    /// Events raised and not yet taken.
    pub fn pending(&self) -> &[RaisedEvent<E>] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drains the raised events in raise order.
    pub fn take_events(&mut self) -> Vec<RaisedEvent<E>> {
        std::mem::take(&mut self.events)
    }
}

/// Sorts events into raise order: by time, then by sequence.
pub fn raise_order<E>(events: &mut [RaisedEvent<E>]) {
    events.sort_by(|a, b| {
        a.raised_at
            .cmp(&b.raised_at)
            .then(a.sequence.cmp(&b.sequence))
    });
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde::Serialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    enum CounterEvent {
        Incremented(u32),
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            "Incremented"
        }
    }

    #[test]
    fn take_events_drains_in_raise_order() {
        let mut recorder = EventRecorder::new();
        recorder.record(CounterEvent::Incremented(1));
        recorder.record(CounterEvent::Incremented(2));
        assert_eq!(recorder.pending().len(), 2);

        let events = recorder.take_events();
        assert!(recorder.is_empty());
        assert_eq!(events[0].event, CounterEvent::Incremented(1));
        assert_eq!(events[0].sequence, 0);
        assert_eq!(events[1].sequence, 1);
    }

    #[test]
    fn sequence_keeps_growing_across_takes() {
        let mut recorder = EventRecorder::new();
        recorder.record(CounterEvent::Incremented(1));
        recorder.take_events();
        recorder.record(CounterEvent::Incremented(2));
        assert_eq!(recorder.take_events()[0].sequence, 1);
    }

    #[test]
    fn raise_order_sorts_by_time_then_sequence() {
        let now = Utc::now();
        let mut events = vec![
            RaisedEvent {
                event: CounterEvent::Incremented(3),
                raised_at: now + Duration::milliseconds(5),
                sequence: 0,
            },
            RaisedEvent {
                event: CounterEvent::Incremented(2),
                raised_at: now,
                sequence: 1,
            },
            RaisedEvent {
                event: CounterEvent::Incremented(1),
                raised_at: now,
                sequence: 0,
            },
        ];

        raise_order(&mut events);
        let order: Vec<_> = events.iter().map(|e| e.event.clone()).collect();
        assert_eq!(
            order,
            vec![
                CounterEvent::Incremented(1),
                CounterEvent::Incremented(2),
                CounterEvent::Incremented(3),
            ]
        );
    }
}
