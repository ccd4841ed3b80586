//! The event model: wire parsing, redaction, relation inspection, and localized summaries.

use std::collections::HashMap;

use async_trait::async_trait;
use ruma_common::MilliSecondsSinceUnixEpoch;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;

use crate::{
    localization::{self, MatrixLocalizations, MembershipChange},
    timeline::Timeline,
};

/// The `content`/`unsigned` object type used throughout the crate. The wire format is
/// open-schema; typed access happens only at call sites that need it (see e.g.
/// [`Event::message_type`], [`Event::relationship_type`]).
pub type JsonObject = JsonMap<String, JsonValue>;

/// An event exactly as received from the homeserver, before it has been assigned a room,
/// ordering, or status.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RawEvent {
    /// The dotted event type, e.g. `m.room.message`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// The event body. Defaults to an empty object for malformed input rather than failing to
    /// deserialize the surrounding response.
    #[serde(default)]
    pub content: JsonObject,
    /// The sending user's MXID, absent for some ephemeral/account-data shapes.
    pub sender: Option<String>,
    /// The event's server-assigned ID, absent for ephemeral events.
    pub event_id: Option<String>,
    /// Present (including as `""`) exactly when this is a state event.
    pub state_key: Option<String>,
    /// Server timestamp in milliseconds since the epoch.
    pub origin_server_ts: Option<u64>,
    /// Out-of-band metadata: `prev_content`, `redacted_because`, `transaction_id`, ...
    #[serde(default)]
    pub unsigned: JsonObject,
    /// The room this event belongs to. Absent on to-device and account-data events.
    pub room_id: Option<String>,
    /// The previous content of a state event, when sent at the top level rather than nested
    /// inside `unsigned`.
    pub prev_content: Option<JsonObject>,
}

/// Which part of a sync response an [`EventUpdate`] came from, determining how the client applies
/// it (current-state table, timeline window, ephemeral scratch space, or account data).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventUpdateKind {
    /// A current-state delta.
    State,
    /// A live timeline event.
    Timeline,
    /// A backfilled timeline event, applied at the old end of the room's history.
    History,
    /// Stripped state describing a pending invite.
    InviteState,
    /// A non-persisted per-room event (typing, receipts).
    Ephemeral,
    /// A room- or client-scoped account-data event.
    AccountData,
}

/// One event, tagged with where it came from, on its way from the sync engine into the room/
/// timeline model.
#[derive(Clone, Debug)]
pub struct EventUpdate {
    /// The room this update applies to. `None` for global (client-scoped) account-data.
    pub room_id: Option<String>,
    /// Where this update came from.
    pub kind: EventUpdateKind,
    /// The event payload.
    pub content: RawEvent,
}

/// The lifecycle stage of a persisted [`Event`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i8)]
pub enum EventStatus {
    /// Sending failed; will not be retried automatically.
    Error = -1,
    /// A local echo, not yet acknowledged by the homeserver.
    Sending = 0,
    /// Acknowledged by the homeserver but not yet observed in a sync response.
    Sent = 1,
    /// Observed in the room's live timeline.
    Timeline = 2,
    /// Observed as a current-state entry.
    RoomState = 3,
}

/// A fully-formed, persistable event.
#[derive(Clone, Debug)]
pub struct Event {
    /// The event's server-assigned ID.
    pub event_id: String,
    /// The room this event belongs to.
    pub room_id: String,
    /// The dotted event type.
    pub event_type: String,
    /// The sending user's MXID.
    pub sender_id: String,
    /// Server timestamp; defaulted to the receive time if the server omitted it.
    pub origin_server_ts: MilliSecondsSinceUnixEpoch,
    /// The event body, possibly redacted.
    pub content: JsonObject,
    /// Out-of-band metadata (`redacted_because`, `transaction_id`, a local sending-status hint).
    pub unsigned: JsonObject,
    /// Present for state events (including as `Some("")`).
    pub state_key: Option<String>,
    /// The state value this event replaced, if any. Hoisted from `unsigned.prev_content` when the
    /// server nests it there instead of sending it at the top level (see crate docs on this
    /// design choice).
    pub prev_content: Option<JsonObject>,
    /// This event's lifecycle stage.
    pub status: EventStatus,
    /// Dense ordering key used for stable rendering and stale-write rejection.
    pub sort_order: f64,
}

/// Redaction content whitelist: for each state event type, the `content` keys a redaction leaves
/// untouched. Types not listed here are redacted down to an empty object.
const REDACTION_WHITELIST: &[(&str, &[&str])] = &[
    ("m.room.member", &["membership"]),
    ("m.room.create", &["creator"]),
    ("m.room.join_rules", &["join_rule"]),
    (
        "m.room.power_levels",
        &[
            "ban",
            "events",
            "events_default",
            "kick",
            "redact",
            "state_default",
            "users",
            "users_default",
        ],
    ),
    ("m.room.aliases", &["aliases"]),
    ("m.room.history_visibility", &["history_visibility"]),
];

fn redaction_whitelist_for(event_type: &str) -> &'static [&'static str] {
    REDACTION_WHITELIST
        .iter()
        .find(|(ty, _)| *ty == event_type)
        .map(|(_, keys)| *keys)
        .unwrap_or(&[])
}

impl Event {
    /// Builds an [`Event`] from a freshly received [`RawEvent`], performing the `prev_content`
    /// hoist and defaulting any missing timestamp to "now".
    pub fn from_raw(raw: RawEvent, room_id: &str, sort_order: f64, status: EventStatus) -> Self {
        let prev_content = raw.prev_content.or_else(|| {
            raw.unsigned.get("prev_content").and_then(|v| v.as_object()).cloned()
        });

        let origin_server_ts = raw
            .origin_server_ts
            .and_then(|ms| js_int::UInt::try_from(ms).ok())
            .map(MilliSecondsSinceUnixEpoch)
            .unwrap_or_else(MilliSecondsSinceUnixEpoch::now);

        Event {
            event_id: raw.event_id.unwrap_or_default(),
            room_id: room_id.to_owned(),
            event_type: raw.event_type,
            sender_id: raw.sender.unwrap_or_default(),
            origin_server_ts,
            content: raw.content,
            unsigned: raw.unsigned,
            state_key: raw.state_key,
            prev_content,
            status,
            sort_order,
        }
    }

    /// Whether this event has been redacted (`unsigned.redacted_because` is set).
    pub fn is_redacted(&self) -> bool {
        self.unsigned.contains_key("redacted_because")
    }

    /// Applies a redaction: records `redaction`'s JSON in `unsigned.redacted_because`, clears
    /// `prev_content`, and trims `content` down to this event type's whitelist.
    pub fn set_redaction_event(&mut self, redaction: &Event) {
        let redaction_json = serde_json::json!({
            "type": redaction.event_type,
            "event_id": redaction.event_id,
            "sender": redaction.sender_id,
            "content": redaction.content,
            "origin_server_ts": redaction.origin_server_ts.get(),
        });
        self.unsigned.insert("redacted_because".to_owned(), redaction_json);
        self.prev_content = None;

        let keep = redaction_whitelist_for(&self.event_type);
        self.content.retain(|key, _| keep.contains(&key.as_str()));
    }

    /// The relation type of this event's `m.relates_to`, if any (`m.replace`, `m.annotation`,
    /// `m.in_reply_to`).
    pub fn relationship_type(&self) -> Option<&str> {
        let relates_to = self.content.get("m.relates_to")?.as_object()?;
        if let Some(rel_type) = relates_to.get("rel_type").and_then(JsonValue::as_str) {
            return Some(rel_type);
        }
        if relates_to.get("m.in_reply_to").and_then(JsonValue::as_object).is_some() {
            return Some("m.in_reply_to");
        }
        None
    }

    /// The event ID this event relates to, if any.
    pub fn relationship_event_id(&self) -> Option<&str> {
        let relates_to = self.content.get("m.relates_to")?.as_object()?;
        if let Some(event_id) = relates_to.get("event_id").and_then(JsonValue::as_str) {
            return Some(event_id);
        }
        relates_to
            .get("m.in_reply_to")
            .and_then(JsonValue::as_object)
            .and_then(|reply| reply.get("event_id"))
            .and_then(JsonValue::as_str)
    }

    /// The message's `msgtype`, or `m.sticker` for stickers, or `m.text` as a fallback.
    pub fn message_type(&self) -> &str {
        if self.event_type == "m.sticker" {
            return "m.sticker";
        }
        self.content.get("msgtype").and_then(JsonValue::as_str).unwrap_or("m.text")
    }

    /// The event's display body: `"Redacted"`, the message body/formatted body, or the event
    /// type as a last resort.
    pub fn body(&self) -> String {
        if self.is_redacted() {
            return "Redacted".to_owned();
        }
        if let Some(body) = self.content.get("body").and_then(JsonValue::as_str) {
            if !body.is_empty() {
                return body.to_owned();
            }
        }
        if let Some(body) = self.content.get("formatted_body").and_then(JsonValue::as_str) {
            if !body.is_empty() {
                return body.to_owned();
            }
        }
        self.event_type.clone()
    }

    /// Resolves this event's display form against `timeline`'s aggregation index: if one or more
    /// `m.replace` edits from the original sender are recorded for this event, returns a copy with
    /// `content` replaced by the latest edit's `m.new_content`.
    pub fn get_display_event(&self, timeline: &Timeline) -> Event {
        let Some(edits) = timeline.aggregated_events(&self.event_id, "m.replace") else {
            return self.clone();
        };

        let mut edits: Vec<&Event> = edits
            .iter()
            .filter(|e| e.sender_id == self.sender_id && e.event_type == "m.room.message")
            .collect();
        edits.sort_by(|a, b| a.sort_order.partial_cmp(&b.sort_order).unwrap());

        let Some(latest) = edits.last() else {
            return self.clone();
        };

        let mut resolved = self.clone();
        if let Some(new_content) = latest.content.get("m.new_content").and_then(JsonValue::as_object) {
            resolved.content = new_content.clone();
        }
        resolved
    }

    /// Renders a localized, human-readable summary of this event, for use in a room-list preview
    /// or notification body.
    ///
    /// `sender_name`/`target_name` are the already-resolved display names of the sender and (for
    /// membership events) the target; `own_user_id` lets the renderer say "you" for the local
    /// user's own actions.
    #[allow(clippy::too_many_arguments)]
    pub fn localized_summary(
        &self,
        localizations: &dyn MatrixLocalizations,
        sender_name: &str,
        target_name: Option<&str>,
        room_list_preview: bool,
        own_user_id: Option<&str>,
    ) -> String {
        match self.event_type.as_str() {
            "m.room.member" => {
                let old = self
                    .prev_content
                    .as_ref()
                    .and_then(|c| c.get("membership"))
                    .and_then(JsonValue::as_str);
                let new = self.content.get("membership").and_then(JsonValue::as_str).unwrap_or("leave");
                let target = self.state_key.as_deref().unwrap_or_default();
                let is_own_action = Some(target) == own_user_id;
                let change = localization::classify_membership_change(old, new, is_own_action, false, false);
                localizations.membership_change(change, sender_name, target_name.unwrap_or(target))
            }
            "m.room.name" => {
                let name = self.content.get("name").and_then(JsonValue::as_str).unwrap_or_default();
                localizations.room_name_changed(sender_name, name)
            }
            "m.room.topic" => {
                let topic = self.content.get("topic").and_then(JsonValue::as_str).unwrap_or_default();
                localizations.room_topic_changed(sender_name, topic)
            }
            "m.room.avatar" => localizations.room_avatar_changed(sender_name),
            "m.room.message" | "m.sticker" => {
                let msgtype = self.message_type();
                let body = self.body();
                let stripped = localization::strip_reply_fallback(&body);
                if room_list_preview
                    && matches!(msgtype, "m.text" | "m.notice" | "m.emote" | "m.none")
                {
                    let sender_is_self = own_user_id == Some(self.sender_id.as_str());
                    localizations.message_preview(sender_name, sender_is_self, stripped)
                } else {
                    stripped.to_owned()
                }
            }
            other => localizations.unknown_event(other),
        }
    }
}

/// An error from resolving or decrypting a message attachment.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum AttachmentError {
    /// The event has no attachment-bearing content (`url`/`file`).
    #[error("event has no attachment")]
    NoAttachment,
    /// The event is not a type that carries attachments (`m.room.message`/`m.sticker`).
    #[error("event type does not carry attachments")]
    WrongEventType,
    /// The attachment is encrypted but no [`crate::encryption::Encryption`] capability was
    /// configured.
    #[error("encryption is disabled; cannot decrypt attachment")]
    EncryptionDisabled,
    /// The attachment's encryption envelope is missing the operations needed to decrypt it.
    #[error("encrypted file info is missing decrypt key material")]
    KeyOpsMissingDecrypt,
    /// The download itself failed.
    #[error("download failed: {0}")]
    Download(String),
    /// The decryption subsystem rejected the ciphertext.
    #[error(transparent)]
    Encryption(#[from] crate::encryption::EncryptionError),
}

/// An injected capability that fetches raw bytes for a resolved media URL.
///
/// Kept separate from [`crate::api::MatrixApi`] because downloads are frequently routed through a
/// plain HTTP GET rather than the authenticated JSON API client.
#[async_trait]
pub trait AttachmentDownloader: Send + Sync {
    /// Downloads the bytes at `url`.
    async fn download(&self, url: &str) -> Result<Vec<u8>, AttachmentError>;
}

impl Event {
    /// Returns the content-URI and (if encrypted) decryption envelope for this event's
    /// attachment, or an error if the event has none.
    fn attachment_descriptor(&self, thumbnail: bool) -> Result<(String, Option<JsonValue>), AttachmentError> {
        if !matches!(self.event_type.as_str(), "m.room.message" | "m.sticker") {
            return Err(AttachmentError::WrongEventType);
        }

        let info_key = if thumbnail { "thumbnail_url" } else { "url" };
        let encrypted_key = if thumbnail { "thumbnail_file" } else { "file" };

        if let Some(file) = self.content.get(encrypted_key).and_then(JsonValue::as_object) {
            let url = file.get("url").and_then(JsonValue::as_str).ok_or(AttachmentError::NoAttachment)?;
            if file.get("key").is_none() || file.get("iv").is_none() {
                return Err(AttachmentError::KeyOpsMissingDecrypt);
            }
            return Ok((url.to_owned(), Some(JsonValue::Object(file.clone()))));
        }

        if let Some(url) = self.content.get(info_key).and_then(JsonValue::as_str) {
            return Ok((url.to_owned(), None));
        }

        Err(AttachmentError::NoAttachment)
    }

    /// Downloads (and, if encrypted, decrypts) this event's attachment.
    ///
    /// Resolution order: the local file cache (keyed by content URI), then `downloader`; the
    /// downloaded bytes (still ciphertext, for encrypted attachments) are what's cached back into
    /// the store when under the database's reported `max_file_size` — decryption is applied after
    /// every fetch, cached or not, so the store never holds E2EE plaintext.
    pub async fn fetch_attachment(
        &self,
        homeserver: &str,
        thumbnail: Option<(u32, u32, crate::identifiers::ThumbnailMethod)>,
        database: Option<&dyn crate::db::Database>,
        encryption: &dyn crate::encryption::Encryption,
        downloader: &dyn AttachmentDownloader,
    ) -> Result<Vec<u8>, AttachmentError> {
        let (mxc_uri, envelope) = self.attachment_descriptor(thumbnail.is_some())?;
        let mxc = <&ruma_common::MxcUri>::from(mxc_uri.as_str());

        let bytes = if let Some(db) = database {
            match db.get_file(&mxc_uri).await {
                Ok(Some(cached)) => cached,
                _ => {
                    let url = match thumbnail {
                        Some((w, h, method)) => {
                            crate::identifiers::mxc_to_thumbnail_url(mxc, homeserver, w, h, method)
                        }
                        None => crate::identifiers::mxc_to_download_url(mxc, homeserver),
                    }
                    .ok_or(AttachmentError::NoAttachment)?;

                    let downloaded = downloader.download(&url).await?;
                    if downloaded.len() as u64 <= db.max_file_size() {
                        let now = MilliSecondsSinceUnixEpoch::now().get().into();
                        let _ = db.store_file(&mxc_uri, &downloaded, now).await;
                    }
                    downloaded
                }
            }
        } else {
            let url = match thumbnail {
                Some((w, h, method)) => crate::identifiers::mxc_to_thumbnail_url(mxc, homeserver, w, h, method),
                None => crate::identifiers::mxc_to_download_url(mxc, homeserver),
            }
            .ok_or(AttachmentError::NoAttachment)?;

            downloader.download(&url).await?
        };

        match envelope {
            Some(envelope) => {
                if !encryption.enabled() {
                    return Err(AttachmentError::EncryptionDisabled);
                }
                Ok(encryption.decrypt_file(&bytes, &envelope).await?)
            }
            None => Ok(bytes),
        }
    }
}

/// A table of timeline event IDs observed so far, used to resolve `m.room.member` display names
/// referenced by an event's `state_key` without needing a synchronous room lookup.
pub type DisplayNameCache = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(event_type: &str, content: serde_json::Value) -> RawEvent {
        RawEvent {
            event_type: event_type.to_owned(),
            content: content.as_object().cloned().unwrap_or_default(),
            sender: Some("@mod:example.org".to_owned()),
            event_id: Some("$redacted:example.org".to_owned()),
            state_key: None,
            origin_server_ts: Some(1_700_000_000_000),
            unsigned: JsonObject::new(),
            room_id: Some("!room:example.org".to_owned()),
            prev_content: None,
        }
    }

    #[test]
    fn prev_content_is_hoisted_from_unsigned() {
        let mut event = raw("m.room.topic", serde_json::json!({"topic": "new"}));
        event.unsigned.insert(
            "prev_content".to_owned(),
            serde_json::json!({"topic": "old"}),
        );
        let event = Event::from_raw(event, "!room:example.org", 1.0, EventStatus::Timeline);
        assert_eq!(
            event.prev_content.unwrap().get("topic").and_then(JsonValue::as_str),
            Some("old")
        );
    }

    #[test]
    fn redaction_of_power_levels_keeps_only_whitelisted_keys() {
        let pl = raw(
            "m.room.power_levels",
            serde_json::json!({"ban": 50, "kick": 50, "users": {"@a:example.org": 100}, "custom": "keep-me"}),
        );
        let mut pl = Event::from_raw(pl, "!room:example.org", 1.0, EventStatus::RoomState);
        pl.state_key = Some(String::new());

        let redaction = raw("m.room.redaction", serde_json::json!({}));
        let redaction = Event::from_raw(redaction, "!room:example.org", 2.0, EventStatus::Timeline);

        pl.set_redaction_event(&redaction);

        assert_eq!(pl.content.len(), 3);
        assert!(pl.content.contains_key("ban"));
        assert!(pl.content.contains_key("kick"));
        assert!(pl.content.contains_key("users"));
        assert!(!pl.content.contains_key("custom"));
        assert!(pl.prev_content.is_none());
        assert_eq!(
            pl.unsigned.get("redacted_because").and_then(|v| v.get("type")).and_then(JsonValue::as_str),
            Some("m.room.redaction")
        );
    }

    #[test]
    fn redaction_of_unlisted_type_clears_everything() {
        let msg = raw("m.room.message", serde_json::json!({"body": "hi", "msgtype": "m.text"}));
        let mut msg = Event::from_raw(msg, "!room:example.org", 1.0, EventStatus::Timeline);
        let redaction = raw("m.room.redaction", serde_json::json!({}));
        let redaction = Event::from_raw(redaction, "!room:example.org", 2.0, EventStatus::Timeline);
        msg.set_redaction_event(&redaction);
        assert!(msg.content.is_empty());
        assert_eq!(msg.body(), "Redacted");
    }

    #[test]
    fn relationship_reads_rel_type_and_event_id() {
        let ev = raw(
            "m.room.message",
            serde_json::json!({
                "body": "edit",
                "m.new_content": {"body": "new"},
                "m.relates_to": {"rel_type": "m.replace", "event_id": "$orig:example.org"},
            }),
        );
        let ev = Event::from_raw(ev, "!room:example.org", 1.0, EventStatus::Timeline);
        assert_eq!(ev.relationship_type(), Some("m.replace"));
        assert_eq!(ev.relationship_event_id(), Some("$orig:example.org"));
    }

    #[test]
    fn relationship_falls_back_to_in_reply_to() {
        let ev = raw(
            "m.room.message",
            serde_json::json!({
                "body": "> quote\n\nreply",
                "m.relates_to": {"m.in_reply_to": {"event_id": "$orig:example.org"}},
            }),
        );
        let ev = Event::from_raw(ev, "!room:example.org", 1.0, EventStatus::Timeline);
        assert_eq!(ev.relationship_type(), Some("m.in_reply_to"));
        assert_eq!(ev.relationship_event_id(), Some("$orig:example.org"));
    }

    #[test]
    fn message_type_defaults_to_text() {
        let ev = raw("m.room.message", serde_json::json!({"body": "hi"}));
        let ev = Event::from_raw(ev, "!room:example.org", 1.0, EventStatus::Timeline);
        assert_eq!(ev.message_type(), "m.text");
    }

    #[test]
    fn sticker_is_always_sticker_type() {
        let ev = raw("m.sticker", serde_json::json!({"body": "sticker"}));
        let ev = Event::from_raw(ev, "!room:example.org", 1.0, EventStatus::Timeline);
        assert_eq!(ev.message_type(), "m.sticker");
    }
}
