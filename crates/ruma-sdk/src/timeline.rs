//! The per-room timeline: a bounded, ordered event window plus the relation-aggregation index
//! edits/reactions/replies are resolved against.

use std::collections::{HashMap, VecDeque};

use crate::event::Event;

/// The default capacity of a [`Timeline`]'s recent-activity window, matching the size a room-list
/// preview typically needs.
pub const DEFAULT_CAPACITY: usize = 50;

/// An ordered window of recently observed events for one room, plus an index of relation-bearing
/// events (edits, reactions, replies) keyed by the event they target.
#[derive(Debug, Default)]
pub struct Timeline {
    capacity: usize,
    events: VecDeque<Event>,
    by_id: HashMap<String, usize>,
    aggregated_events: HashMap<String, HashMap<String, Vec<Event>>>,
}

impl Timeline {
    /// Creates an empty timeline with the given window capacity.
    pub fn new(capacity: usize) -> Self {
        Timeline { capacity, events: VecDeque::new(), by_id: HashMap::new(), aggregated_events: HashMap::new() }
    }

    /// Appends `event` to the window, evicting the oldest entry if at capacity, and records it in
    /// the aggregation index if it carries an `m.relates_to`.
    pub fn push(&mut self, event: Event) {
        if let Some(rel_type) = event.relationship_type() {
            if let Some(target_id) = event.relationship_event_id() {
                self.aggregated_events
                    .entry(target_id.to_owned())
                    .or_default()
                    .entry(rel_type.to_owned())
                    .or_default()
                    .push(event.clone());
            }
        }

        if self.events.len() == self.capacity {
            if let Some(evicted) = self.events.pop_front() {
                self.by_id.remove(&evicted.event_id);
                for idx in self.by_id.values_mut() {
                    *idx -= 1;
                }
            }
        }

        self.by_id.insert(event.event_id.clone(), self.events.len());
        self.events.push_back(event);
    }

    /// Looks up a previously observed event by ID. Only searches the bounded window, not the
    /// aggregation index or persistent store.
    pub fn get_event_by_id(&self, event_id: &str) -> Option<&Event> {
        self.by_id.get(event_id).and_then(|&idx| self.events.get(idx))
    }

    /// Returns the recorded relation-bearing events targeting `event_id` with relation type
    /// `rel_type`, if any.
    pub fn aggregated_events(&self, event_id: &str, rel_type: &str) -> Option<&Vec<Event>> {
        self.aggregated_events.get(event_id)?.get(rel_type)
    }

    /// Iterates the window's events oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// The number of events currently held in the window.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Applies a redaction to the stored timeline event with ID `redacted_event_id`, if present in
    /// the window. A no-op if the target event has already scrolled out of the window.
    pub fn apply_redaction(&mut self, redacted_event_id: &str, redaction: &Event) {
        if let Some(&idx) = self.by_id.get(redacted_event_id) {
            if let Some(event) = self.events.get_mut(idx) {
                event.set_redaction_event(redaction);
            }
        }
    }

    /// Removes an event from the window by ID, e.g. after a redaction of a local-only echo. The
    /// aggregation index is left untouched since other events may still reference it.
    pub fn remove(&mut self, event_id: &str) {
        if let Some(idx) = self.by_id.remove(event_id) {
            self.events.remove(idx);
            for i in self.by_id.values_mut() {
                if *i > idx {
                    *i -= 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::event::{EventStatus, RawEvent};

    use super::*;

    fn event(event_id: &str, event_type: &str, content: serde_json::Value, sort_order: f64) -> Event {
        let raw = RawEvent {
            event_type: event_type.to_owned(),
            content: content.as_object().cloned().unwrap_or_default(),
            sender: Some("@alice:example.org".to_owned()),
            event_id: Some(event_id.to_owned()),
            state_key: None,
            origin_server_ts: Some(1_700_000_000_000),
            unsigned: Default::default(),
            room_id: Some("!room:example.org".to_owned()),
            prev_content: None,
        };
        Event::from_raw(raw, "!room:example.org", sort_order, EventStatus::Timeline)
    }

    #[test]
    fn evicts_oldest_once_over_capacity() {
        let mut timeline = Timeline::new(2);
        timeline.push(event("$a", "m.room.message", serde_json::json!({"body": "a"}), 1.0));
        timeline.push(event("$b", "m.room.message", serde_json::json!({"body": "b"}), 2.0));
        timeline.push(event("$c", "m.room.message", serde_json::json!({"body": "c"}), 3.0));

        assert_eq!(timeline.len(), 2);
        assert!(timeline.get_event_by_id("$a").is_none());
        assert!(timeline.get_event_by_id("$b").is_some());
        assert!(timeline.get_event_by_id("$c").is_some());
    }

    #[test]
    fn indexes_edits_by_target_event() {
        let mut timeline = Timeline::new(DEFAULT_CAPACITY);
        timeline.push(event("$orig", "m.room.message", serde_json::json!({"body": "hello"}), 1.0));
        timeline.push(event(
            "$edit",
            "m.room.message",
            serde_json::json!({
                "body": "* world",
                "m.new_content": {"body": "world"},
                "m.relates_to": {"rel_type": "m.replace", "event_id": "$orig"},
            }),
            2.0,
        ));

        let edits = timeline.aggregated_events("$orig", "m.replace").unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].event_id, "$edit");
    }

    #[test]
    fn apply_redaction_clears_a_stored_event_in_place() {
        let mut timeline = Timeline::new(DEFAULT_CAPACITY);
        timeline.push(event("$msg", "m.room.message", serde_json::json!({"body": "hi"}), 1.0));
        let redaction = event("$red", "m.room.redaction", serde_json::json!({}), 2.0);

        timeline.apply_redaction("$msg", &redaction);

        assert!(timeline.get_event_by_id("$msg").unwrap().is_redacted());
    }
}
