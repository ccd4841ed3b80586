//! Localized, human-readable event summaries.
//!
//! String rendering is delegated to a pluggable [`MatrixLocalizations`] implementor so this crate
//! never hardcodes user-facing language; the regexes below (reply-fallback stripping, emoji
//! detection) are genuinely protocol-level rather than translatable strings, so they live here
//! rather than behind the trait.

use once_cell::sync::Lazy;
use regex::Regex;

/// Strips one leading quoted "reply fallback" block (the `> <@user> ...` lines a client prepends
/// to a reply's plain-text body) from the front of `body`.
static REPLY_FALLBACK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^>(?: \*)? <[^>]+>[^\n\r]+\r?\n(?:> [^\n]*\r?\n)*\r?\n").unwrap()
});

/// Matches a run that consists only of emoji code points (plus whitespace), used to decide whether
/// a message should be rendered "big" the way emoji-only chat bubbles are.
static EMOJI_ONLY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^(?:
            \s
          | [\u{00A9}\u{00AE}\u{2000}-\u{3300}]
          | [\u{1F000}-\u{1FFFF}]
          | [\u{FE00}-\u{FE0F}]
        )+$",
    )
    .unwrap()
});

/// Matches individual emoji code points, for counting.
static EMOJI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
            [\u{00A9}\u{00AE}\u{2000}-\u{3300}]
          | [\u{1F000}-\u{1FFFF}]
        ",
    )
    .unwrap()
});

/// Matches a custom-emote image tag (`data-mx-emote` / `data-mx-emoticon`) in formatted HTML.
static CUSTOM_EMOTE_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<img[^>]*data-mx-emot(?:e|icon)[^>]*>"#).unwrap()
});

/// Removes a leading reply-fallback block from a plain-text message body, if present.
pub fn strip_reply_fallback(body: &str) -> &str {
    match REPLY_FALLBACK_RE.find(body) {
        Some(m) if m.start() == 0 => &body[m.end()..],
        _ => body,
    }
}

/// Returns `true` if `text` consists solely of emoji (and optional custom-emote tags when
/// `is_formatted` is set), once any reply fallback has been stripped.
pub fn is_only_emotes(text: &str, is_formatted: bool) -> bool {
    let stripped = strip_reply_fallback(text);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return false;
    }

    if is_formatted {
        let without_tags = CUSTOM_EMOTE_TAG_RE.replace_all(trimmed, "");
        let without_tags = without_tags.trim();
        if without_tags.is_empty() {
            return true;
        }
        return EMOJI_ONLY_RE.is_match(without_tags);
    }

    EMOJI_ONLY_RE.is_match(trimmed)
}

/// Counts the emoji code points in `text`.
pub fn number_emotes(text: &str) -> usize {
    EMOJI_RE.find_iter(text).count()
}

/// A membership transition, as interpreted for a localized summary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipChange {
    /// `invite` -> `join`.
    InvitationAccepted,
    /// `invite` -> `leave`, by the invitee themselves.
    InvitationRejected,
    /// `invite` -> `leave`, by someone else.
    InvitationWithdrawn,
    /// `leave` -> `join`.
    Joined,
    /// `join` -> `ban`.
    KickedAndBanned,
    /// `join` -> `leave`, by someone else.
    Kicked,
    /// `join` -> `leave`, by the member themselves.
    Left,
    /// `invite`/`leave` -> `ban`.
    Banned,
    /// `ban` -> `leave`.
    Unbanned,
    /// `*` -> `invite`.
    Invited,
    /// No membership transition; the event updated profile fields.
    ProfileChanged { display_name_changed: bool, avatar_changed: bool },
}

/// Classifies a membership transition from `old` to `new`, given whether the actor is acting on
/// themselves (`is_own_action`), matching the table in the sync engine's per-event handling.
pub fn classify_membership_change(
    old: Option<&str>,
    new: &str,
    is_own_action: bool,
    profile_display_name_changed: bool,
    profile_avatar_changed: bool,
) -> MembershipChange {
    match (old, new) {
        (Some("invite"), "join") => MembershipChange::InvitationAccepted,
        (Some("invite"), "leave") if is_own_action => MembershipChange::InvitationRejected,
        (Some("invite"), "leave") => MembershipChange::InvitationWithdrawn,
        (Some("leave") | None, "join") => MembershipChange::Joined,
        (Some("join"), "ban") => MembershipChange::KickedAndBanned,
        (Some("join"), "leave") if is_own_action => MembershipChange::Left,
        (Some("join"), "leave") => MembershipChange::Kicked,
        (Some("invite") | Some("leave"), "ban") => MembershipChange::Banned,
        (Some("ban"), "leave") => MembershipChange::Unbanned,
        (_, "invite") => MembershipChange::Invited,
        (Some("join"), "join") => MembershipChange::ProfileChanged {
            display_name_changed: profile_display_name_changed,
            avatar_changed: profile_avatar_changed,
        },
        _ => MembershipChange::ProfileChanged {
            display_name_changed: profile_display_name_changed,
            avatar_changed: profile_avatar_changed,
        },
    }
}

/// A pluggable provider of localized strings for event summaries.
///
/// Implementations own the actual translation catalog; this crate only calls the methods below
/// with the structured facts a summary needs, the way the source SDK's `MatrixLocalizations`
/// parameter works.
pub trait MatrixLocalizations: Send + Sync {
    /// Renders a membership-change sentence.
    fn membership_change(
        &self,
        change: MembershipChange,
        sender_name: &str,
        target_name: &str,
    ) -> String;

    /// Renders a room-name-change sentence.
    fn room_name_changed(&self, sender_name: &str, new_name: &str) -> String;

    /// Renders a room-topic-change sentence.
    fn room_topic_changed(&self, sender_name: &str, new_topic: &str) -> String;

    /// Renders a room-avatar-change sentence.
    fn room_avatar_changed(&self, sender_name: &str) -> String;

    /// Renders a plain-text/notice/emote message for a room-list preview, prefixing the sender
    /// unless `sender_is_self` (in which case the caller's own pronoun is used).
    fn message_preview(&self, sender_name: &str, sender_is_self: bool, body: &str) -> String;

    /// Renders a fallback sentence for an event type this provider has no specific phrasing for.
    fn unknown_event(&self, event_type: &str) -> String;
}

/// The built-in English-language [`MatrixLocalizations`].
#[derive(Clone, Copy, Debug, Default)]
pub struct EnglishLocalizations;

impl MatrixLocalizations for EnglishLocalizations {
    fn membership_change(
        &self,
        change: MembershipChange,
        sender_name: &str,
        target_name: &str,
    ) -> String {
        match change {
            MembershipChange::InvitationAccepted => format!("{target_name} accepted the invitation"),
            MembershipChange::InvitationRejected => format!("{target_name} rejected the invitation"),
            MembershipChange::InvitationWithdrawn => {
                format!("{sender_name} withdrew {target_name}'s invitation")
            }
            MembershipChange::Joined => format!("{target_name} joined the room"),
            MembershipChange::KickedAndBanned => {
                format!("{sender_name} kicked and banned {target_name}")
            }
            MembershipChange::Kicked => format!("{sender_name} kicked {target_name}"),
            MembershipChange::Left => format!("{target_name} left the room"),
            MembershipChange::Banned => format!("{sender_name} banned {target_name}"),
            MembershipChange::Unbanned => format!("{sender_name} unbanned {target_name}"),
            MembershipChange::Invited => format!("{sender_name} invited {target_name}"),
            MembershipChange::ProfileChanged { display_name_changed, avatar_changed } => {
                match (display_name_changed, avatar_changed) {
                    (true, true) => format!("{target_name} changed their name and avatar"),
                    (true, false) => format!("{target_name} changed their name"),
                    (false, true) => format!("{target_name} changed their avatar"),
                    (false, false) => format!("{target_name} updated their profile"),
                }
            }
        }
    }

    fn room_name_changed(&self, sender_name: &str, new_name: &str) -> String {
        format!("{sender_name} changed the room name to \"{new_name}\"")
    }

    fn room_topic_changed(&self, sender_name: &str, new_topic: &str) -> String {
        format!("{sender_name} changed the topic to \"{new_topic}\"")
    }

    fn room_avatar_changed(&self, sender_name: &str) -> String {
        format!("{sender_name} changed the room avatar")
    }

    fn message_preview(&self, sender_name: &str, sender_is_self: bool, body: &str) -> String {
        if sender_is_self {
            format!("You: {body}")
        } else {
            format!("{sender_name}: {body}")
        }
    }

    fn unknown_event(&self, event_type: &str) -> String {
        format!("sent a {event_type} event")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_reply_fallback() {
        let body = "> <@alice:example.org> original message\n> second line\n\nthe actual reply";
        assert_eq!(strip_reply_fallback(body), "the actual reply");
    }

    #[test]
    fn leaves_body_without_fallback_untouched() {
        let body = "just a normal message";
        assert_eq!(strip_reply_fallback(body), body);
    }

    #[test]
    fn detects_emoji_only_plain_text() {
        assert!(is_only_emotes("\u{1F600}\u{1F601}", false));
        assert!(!is_only_emotes("hello \u{1F600}", false));
    }

    #[test]
    fn detects_emoji_only_with_custom_emote_tag() {
        let html = r#"<img src="mxc://x/y" data-mx-emoticon alt=":wave:">"#;
        assert!(is_only_emotes(html, true));
    }

    #[test]
    fn counts_emotes() {
        assert_eq!(number_emotes("\u{1F600} hi \u{1F601}"), 2);
    }

    #[test]
    fn classifies_join_after_invite() {
        let change = classify_membership_change(Some("invite"), "join", true, false, false);
        assert_eq!(change, MembershipChange::InvitationAccepted);
    }

    #[test]
    fn classifies_self_leave_after_join() {
        let change = classify_membership_change(Some("join"), "leave", true, false, false);
        assert_eq!(change, MembershipChange::Left);
    }

    #[test]
    fn classifies_kick_after_join() {
        let change = classify_membership_change(Some("join"), "leave", false, false, false);
        assert_eq!(change, MembershipChange::Kicked);
    }
}
