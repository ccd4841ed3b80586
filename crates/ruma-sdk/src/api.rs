//! The [`MatrixApi`] capability: the homeserver-facing surface the sync engine and client façade
//! are written against.
//!
//! The concrete HTTP transport and wire codec live outside this crate, the same way
//! `ruma_client`'s `HttpClient` trait lets callers plug in `hyper`, `isahc` or `reqwest` without
//! the request-building logic knowing which one is in use. Here the boundary is drawn one layer
//! higher: implementors speak in terms of the already-typed shapes below rather than raw HTTP.

use std::collections::BTreeMap;

use async_trait::async_trait;
use ruma_common::{OwnedDeviceId, OwnedServerName, OwnedUserId};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::event::RawEvent;

/// A capability giving access to the Matrix Client-Server API endpoints the core needs.
///
/// Implementations are expected to be cheaply cloneable handles (an `Arc`-wrapped HTTP client and
/// homeserver URL, typically) since the [`crate::Client`] keeps one for its entire lifetime.
#[async_trait]
pub trait MatrixApi: Send + Sync {
    /// Performs one `/sync` request.
    async fn sync(&self, request: SyncRequest) -> Result<SyncResponse, MatrixApiError>;

    /// Logs in with the given credentials.
    async fn login(&self, request: LoginRequest) -> Result<LoginResponse, MatrixApiError>;

    /// Registers a new account.
    async fn register(&self, request: RegisterRequest) -> Result<LoginResponse, MatrixApiError>;

    /// Invalidates the current session's access token.
    async fn logout(&self) -> Result<(), MatrixApiError>;

    /// Invalidates all of the user's access tokens across all devices.
    async fn logout_all(&self) -> Result<(), MatrixApiError>;

    /// Sends one to-device message of `event_type` to the given per-user, per-device payloads.
    async fn send_to_device(
        &self,
        event_type: &str,
        transaction_id: &str,
        messages: BTreeMap<OwnedUserId, BTreeMap<String, JsonValue>>,
    ) -> Result<(), MatrixApiError>;

    /// Queries device keys (and cross-signing keys) for the given users.
    async fn request_device_keys(
        &self,
        users: &[OwnedUserId],
        timeout_ms: u64,
    ) -> Result<DeviceKeysQueryResponse, MatrixApiError>;

    /// Fetches a user's profile (display name, avatar).
    async fn request_profile(&self, user_id: &OwnedUserId) -> Result<ProfileResponse, MatrixApiError>;

    /// Fetches the Matrix versions and unstable features the homeserver advertises.
    async fn request_supported_versions(&self) -> Result<SupportedVersionsResponse, MatrixApiError>;

    /// Fetches the login flows the homeserver supports.
    async fn request_login_types(&self) -> Result<LoginTypesResponse, MatrixApiError>;

    /// Uploads a content blob, returning its `mxc://` URI.
    async fn upload(&self, bytes: Vec<u8>, content_type: Option<String>) -> Result<String, MatrixApiError>;

    /// Sets the caller's avatar to the given content URI.
    async fn set_avatar_url(&self, mxc_uri: &str) -> Result<(), MatrixApiError>;

    /// Enables or disables one push rule.
    async fn enable_push_rule(
        &self,
        scope: &str,
        kind: &str,
        rule_id: &str,
        enabled: bool,
    ) -> Result<(), MatrixApiError>;

    /// Writes one global account-data entry.
    async fn set_account_data(&self, event_type: &str, content: JsonValue) -> Result<(), MatrixApiError>;

    /// Changes the account password, optionally re-authenticating with User-Interactive Auth.
    async fn change_password(
        &self,
        new_password: &str,
        auth: Option<JsonValue>,
    ) -> Result<(), MatrixApiError>;

    /// Redacts an event.
    async fn redact_event(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
        transaction_id: &str,
    ) -> Result<(), MatrixApiError>;
}

/// Parameters for one `/sync` call.
#[derive(Clone, Debug)]
pub struct SyncRequest {
    /// The sync filter, serialized to the filter JSON object or a previously uploaded filter ID.
    pub filter: Option<JsonValue>,
    /// The `since` pagination token, or `None` for an initial sync.
    pub since: Option<String>,
    /// Long-poll timeout; `None` for a zero-timeout one-shot sync (used for [`archive`][1]).
    ///
    /// [1]: crate::Client::archive
    pub timeout_ms: Option<u64>,
}

/// The deserialized shape of a `/sync` response.
///
/// Event payloads below are intentionally left as [`RawEvent`] / [`JsonValue`]: the wire format is
/// open-schema and typed access happens at the edges (see [`crate::event`]).
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct SyncResponse {
    /// Pagination token for the next sync.
    pub next_batch: String,
    /// Updates to rooms the user is joined to, keyed by room ID.
    #[serde(default)]
    pub joined_rooms: BTreeMap<String, JoinedRoomUpdate>,
    /// Updates to rooms the user is invited to, keyed by room ID.
    #[serde(default)]
    pub invited_rooms: BTreeMap<String, InvitedRoomUpdate>,
    /// Updates to rooms the user has left, keyed by room ID.
    #[serde(default)]
    pub left_rooms: BTreeMap<String, LeftRoomUpdate>,
    /// To-device events delivered since the last sync.
    #[serde(default)]
    pub to_device: Vec<RawEvent>,
    /// Presence events.
    #[serde(default)]
    pub presence: Vec<RawEvent>,
    /// Global account-data events.
    #[serde(default)]
    pub account_data: Vec<RawEvent>,
    /// Hints about which users' device lists may have changed.
    #[serde(default)]
    pub device_lists: DeviceListsUpdate,
    /// Count of remaining one-time keys by algorithm.
    #[serde(default)]
    pub device_one_time_keys_count: BTreeMap<String, u64>,
}

/// One joined room's delta for a sync response.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct JoinedRoomUpdate {
    /// Token to resume pagination from the start of this update.
    pub prev_batch: Option<String>,
    /// Whether the server omitted part of the timeline (a gap requiring `reset_sort_order`).
    #[serde(default)]
    pub limited_timeline: bool,
    /// Number of unread messages that match a highlight push rule.
    #[serde(default)]
    pub highlight_count: u64,
    /// Number of unread notifications.
    #[serde(default)]
    pub notification_count: u64,
    /// Current-state deltas (sent only on an initial sync, or with lazy-loading).
    #[serde(default)]
    pub state: Vec<RawEvent>,
    /// New timeline events.
    #[serde(default)]
    pub timeline: Vec<RawEvent>,
    /// Backfilled timeline events, applied with `sort_at_the_end` semantics.
    #[serde(default)]
    pub history: Vec<RawEvent>,
    /// Ephemeral events (typing notifications, receipts).
    #[serde(default)]
    pub ephemeral: Vec<RawEvent>,
    /// Room-scoped account-data events.
    #[serde(default)]
    pub account_data: Vec<RawEvent>,
    /// Room summary fields (heroes, counts).
    #[serde(default)]
    pub summary: Option<RoomSummaryUpdate>,
}

/// One invited room's delta.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct InvitedRoomUpdate {
    /// The stripped state events describing the invite.
    #[serde(default)]
    pub invite_state: Vec<RawEvent>,
}

/// One left (or rejected/kicked) room's delta.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct LeftRoomUpdate {
    /// Token to resume pagination from.
    pub prev_batch: Option<String>,
    /// Final timeline events leading up to the leave.
    #[serde(default)]
    pub timeline: Vec<RawEvent>,
    /// Room-scoped account-data events.
    #[serde(default)]
    pub account_data: Vec<RawEvent>,
    /// Final state events.
    #[serde(default)]
    pub state: Vec<RawEvent>,
}

/// Room summary fields carried on a sync update.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct RoomSummaryUpdate {
    /// `m.heroes`: user IDs to display when the room has no name/canonical alias.
    #[serde(default)]
    pub heroes: Vec<String>,
    /// `m.joined_member_count`.
    pub joined_member_count: Option<u64>,
    /// `m.invited_member_count`.
    pub invited_member_count: Option<u64>,
}

/// Device-list change hints from a sync response.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct DeviceListsUpdate {
    /// Users whose device lists may have changed and should be re-queried.
    #[serde(default)]
    pub changed: Vec<OwnedUserId>,
    /// Users who left all shared encrypted rooms; tracking can stop.
    #[serde(default)]
    pub left: Vec<OwnedUserId>,
}

/// Login or registration parameters.
#[derive(Clone, Debug)]
pub struct LoginRequest {
    /// The user identifier (full MXID or localpart).
    pub identifier: String,
    /// The account password.
    pub password: String,
    /// Requested device ID; the server assigns one if absent.
    pub device_id: Option<OwnedDeviceId>,
    /// Human-readable device display name.
    pub initial_device_display_name: Option<String>,
}

/// Registration parameters.
#[derive(Clone, Debug, Default)]
pub struct RegisterRequest {
    /// Desired localpart; the server generates one if absent (guest registration).
    pub username: Option<String>,
    /// The account password.
    pub password: Option<String>,
    /// Requested device display name.
    pub initial_device_display_name: Option<String>,
}

/// A successful login or registration response.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct LoginResponse {
    /// The newly issued access token.
    pub access_token: String,
    /// The fully-qualified user ID that was authenticated.
    pub user_id: OwnedUserId,
    /// The device ID associated with this session.
    pub device_id: OwnedDeviceId,
}

/// Result of a device-key query.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct DeviceKeysQueryResponse {
    /// Per-user, per-device key payloads (raw JSON; shape is validated in
    /// [`crate::device_keys`]).
    #[serde(default)]
    pub device_keys: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, JsonValue>>,
    /// Per-user cross-signing key payloads, keyed by usage (`master`, `self_signing`,
    /// `user_signing`).
    #[serde(default)]
    pub master_keys: BTreeMap<OwnedUserId, JsonValue>,
    #[serde(default)]
    pub self_signing_keys: BTreeMap<OwnedUserId, JsonValue>,
    #[serde(default)]
    pub user_signing_keys: BTreeMap<OwnedUserId, JsonValue>,
    /// Homeservers that failed to respond, keyed by domain.
    #[serde(default)]
    pub failures: BTreeMap<OwnedServerName, JsonValue>,
}

/// A user's profile.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct ProfileResponse {
    /// The user's display name, if set.
    pub displayname: Option<String>,
    /// The user's avatar content URI, if set.
    pub avatar_url: Option<String>,
}

/// The homeserver's advertised API versions.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct SupportedVersionsResponse {
    /// Supported spec versions, e.g. `"r0.6.0"`.
    #[serde(default)]
    pub versions: Vec<String>,
    /// Enabled unstable feature flags.
    #[serde(default)]
    pub unstable_features: BTreeMap<String, bool>,
}

/// The homeserver's advertised login flows.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct LoginTypesResponse {
    /// `type` fields of the supported login flows, e.g. `"m.login.password"`.
    #[serde(default)]
    pub flows: Vec<String>,
}

/// An error surfaced by a [`MatrixApi`] implementation.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum MatrixApiError {
    /// A transport-level failure (DNS, TLS, connection reset, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// A typed `errcode` + `error` response from the homeserver, as defined by the Client-Server
    /// API's standard error response body.
    #[error("{errcode}: {error}")]
    Protocol {
        /// The machine-readable Matrix error code, e.g. `M_FORBIDDEN`.
        errcode: String,
        /// The human-readable error message.
        error: String,
        /// For `M_LIMIT_EXCEEDED`, how long to wait before retrying.
        retry_after_ms: Option<u64>,
        /// For a 401 requiring User-Interactive Auth, the session token and available flows.
        session: Option<UiaaSession>,
    },
}

/// A User-Interactive Authentication session, as returned by a 401 response.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct UiaaSession {
    /// The opaque session identifier to echo back on the retried request.
    pub session: String,
    /// The authentication flows the server will accept, each a list of required stage names.
    pub flows: Vec<Vec<String>>,
}
