//! The client session: the persisted identity of one logged-in device.

use ruma_common::{OwnedDeviceId, OwnedUserId};

/// A logged-in session's identifying fields, hydrated from and persisted to the configured
/// [`crate::db::Database`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    /// A locally chosen identifier for this client instance, used as the database row key and as
    /// the prefix of generated transaction IDs.
    pub client_id: String,
    /// A human-readable name for this client (e.g. the application name).
    pub client_name: String,
    /// The homeserver base URL.
    pub homeserver: Option<String>,
    /// The access token for this session, once logged in.
    pub access_token: Option<String>,
    /// The authenticated user.
    pub user_id: Option<OwnedUserId>,
    /// This session's device ID.
    pub device_id: Option<OwnedDeviceId>,
    /// This session's device display name.
    pub device_name: Option<String>,
    /// The last sync `next_batch`/`prev_batch` token observed.
    pub prev_batch: Option<String>,
}

impl Session {
    /// Creates an empty, not-yet-logged-in session for the given client identity.
    pub fn new(client_id: impl Into<String>, client_name: impl Into<String>) -> Self {
        Session { client_id: client_id.into(), client_name: client_name.into(), ..Default::default() }
    }

    /// Whether this session currently has a valid access token.
    pub fn is_logged_in(&self) -> bool {
        self.access_token.is_some()
    }

    /// Clears every field set by a successful login, keeping the client identity and homeserver.
    pub fn clear(&mut self) {
        self.access_token = None;
        self.user_id = None;
        self.device_id = None;
        self.device_name = None;
        self.prev_batch = None;
    }
}
