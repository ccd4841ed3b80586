//! The per-room current-state store.

use std::collections::HashMap;

use tracing::warn;

use crate::{event::Event, timeline::Timeline};

/// The local user's relationship to a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    /// Invited but not yet joined.
    Invite,
    /// A current member.
    Join,
    /// Left, kicked, or banned.
    Leave,
}

/// `m.heroes`-derived summary fields for a room without an explicit name.
#[derive(Clone, Debug, Default)]
pub struct RoomSummary {
    /// User IDs to display when the room has no name or canonical alias.
    pub heroes: Vec<String>,
    /// Count of joined members, when the server reports it.
    pub joined_member_count: Option<u64>,
    /// Count of invited members, when the server reports it.
    pub invited_member_count: Option<u64>,
}

/// A snapshot of one room's membership/counters/summary, as persisted after each sync pass.
#[derive(Clone, Debug)]
pub struct RoomUpdate {
    /// The room this update describes.
    pub room_id: String,
    /// The local user's membership after this update.
    pub membership: Membership,
    /// Pagination token for history before this update.
    pub prev_batch: Option<String>,
    /// Unread messages matching a highlight push rule.
    pub highlight_count: u64,
    /// Total unread notifications.
    pub notification_count: u64,
    /// Room summary fields, when the server sent them.
    pub summary: Option<RoomSummary>,
}

/// One room's live state: the current-state table, room-scoped account data, ephemeral scratch
/// space, and timeline ordering cursors.
#[derive(Debug)]
pub struct Room {
    /// This room's ID.
    pub room_id: String,
    /// The local user's current membership.
    pub membership: Membership,
    /// Pagination token for history before the oldest event currently held.
    pub prev_batch: Option<String>,
    /// Unread messages matching a highlight push rule.
    pub highlight_count: u64,
    /// Total unread notifications.
    pub notification_count: u64,
    /// Room summary fields.
    pub summary: RoomSummary,
    /// Current state, keyed by `(event_type, state_key)`.
    states: HashMap<(String, String), Event>,
    /// Room-scoped account-data, keyed by event type.
    pub room_account_data: HashMap<String, Event>,
    /// Non-persisted per-room scratch space (typing, receipts), keyed by event type.
    pub ephemerals: HashMap<String, Event>,
    /// Monotone cursor for events entering at the live (new) end of the timeline.
    new_sort_order: f64,
    /// Monotone cursor (decreasing) for backfilled events entering at the old end.
    old_sort_order: f64,
    /// When this room was locally created, used as a final tiebreaker by room sorting.
    pub time_created: u64,
    /// This room's recent-activity timeline window and relation-aggregation index.
    pub timeline: Timeline,
}

impl Room {
    /// Creates an empty room in the given membership state.
    pub fn new(room_id: impl Into<String>, membership: Membership, time_created: u64) -> Self {
        Room {
            room_id: room_id.into(),
            membership,
            prev_batch: None,
            highlight_count: 0,
            notification_count: 0,
            summary: RoomSummary::default(),
            states: HashMap::new(),
            room_account_data: HashMap::new(),
            ephemerals: HashMap::new(),
            new_sort_order: 1.0,
            old_sort_order: -1.0,
            time_created,
            timeline: Timeline::new(crate::timeline::DEFAULT_CAPACITY),
        }
    }

    /// The next sort order to assign to a live timeline/state event, advancing the cursor.
    pub fn next_new_sort_order(&mut self) -> f64 {
        let value = self.new_sort_order;
        self.new_sort_order += 1.0;
        value
    }

    /// The next sort order to assign to a backfilled event, advancing the cursor downward.
    pub fn next_old_sort_order(&mut self) -> f64 {
        let value = self.old_sort_order;
        self.old_sort_order -= 1.0;
        value
    }

    /// Resets both ordering cursors, called when the server reports a limited-timeline gap.
    pub fn reset_sort_order(&mut self) {
        self.new_sort_order = 1.0;
        self.old_sort_order = -1.0;
    }

    /// Persists the current cursor values; implementations may call this after a batch of events
    /// has been handled to avoid a write per event.
    pub fn update_sort_order(&self) -> (f64, f64) {
        (self.new_sort_order, self.old_sort_order)
    }

    /// Writes `event` into the current-state table, unless a newer write (by `sort_order`) is
    /// already present for the same `(type, state_key)`.
    ///
    /// Returns `true` if the write was applied.
    pub fn set_state(&mut self, event: Event) -> bool {
        let Some(state_key) = event.state_key.clone() else {
            warn!(event_id = %event.event_id, "set_state called with a non-state event");
            return false;
        };
        let key = (event.event_type.clone(), state_key);

        if let Some(existing) = self.states.get(&key) {
            if event.sort_order < existing.sort_order {
                warn!(
                    event_type = %key.0,
                    state_key = %key.1,
                    "dropping stale state write (sort_order {} < {})",
                    event.sort_order,
                    existing.sort_order
                );
                return false;
            }
        }

        self.states.insert(key, event);
        true
    }

    /// Reads the current value of `(event_type, state_key)`. `state_key` defaults to `""`.
    pub fn get_state(&self, event_type: &str, state_key: &str) -> Option<&Event> {
        self.states.get(&(event_type.to_owned(), state_key.to_owned()))
    }

    /// Iterates every currently stored state event.
    pub fn iter_states(&self) -> impl Iterator<Item = &Event> {
        self.states.values()
    }

    /// Applies a redaction to any stored state event whose `event_id` equals `redacted_event_id`.
    pub fn apply_state_redaction(&mut self, redacted_event_id: &str, redaction: &Event) {
        for state in self.states.values_mut() {
            if state.event_id == redacted_event_id {
                state.set_redaction_event(redaction);
            }
        }
    }

    /// Whether this room is tagged as a favourite (`m.tag` content containing `m.favourite`).
    pub fn is_favourite(&self) -> bool {
        self.room_account_data
            .get("m.tag")
            .and_then(|e| e.content.get("tags"))
            .and_then(|t| t.as_object())
            .is_some_and(|tags| tags.contains_key("m.favourite"))
    }

    /// Current encryption algorithm for this room, if `m.room.encryption` state is set.
    pub fn encryption_algorithm(&self) -> Option<&str> {
        self.get_state("m.room.encryption", "")?.content.get("algorithm")?.as_str()
    }
}
