//! The [`Database`] capability: the persistent-store boundary.
//!
//! The on-disk schema is out of scope for this crate (see the module docs on
//! [`crate`]); this module only pins down the operations the sync engine and client façade issue
//! against it.

use async_trait::async_trait;
use ruma_common::{OwnedDeviceId, OwnedRoomId, OwnedUserId};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::{
    device_keys::{CrossSigningKey, DeviceKeys},
    event::{Event, EventUpdate},
    room::RoomUpdate,
};

/// Read/write operations available both outside and inside a transaction.
///
/// Split out from [`Database`] so that [`DatabaseTransaction`] can re-expose the same surface
/// without duplicating method signatures.
#[async_trait]
pub trait DatabaseWrite: Send + Sync {
    /// Persists the session row for `client_id`, creating it if absent.
    async fn upsert_client(&self, client_id: &str, fields: ClientRow) -> Result<(), DatabaseError>;

    /// Updates just the `prev_batch` column for `client_id`.
    async fn store_prev_batch(&self, client_id: &str, prev_batch: &str) -> Result<(), DatabaseError>;

    /// Upserts one global account-data entry.
    async fn store_account_data(
        &self,
        client_id: &str,
        event_type: &str,
        content: JsonValue,
    ) -> Result<(), DatabaseError>;

    /// Persists a room-level update (membership, counters, summary, `prev_batch`).
    async fn store_room_update(&self, client_id: &str, update: &RoomUpdate) -> Result<(), DatabaseError>;

    /// Persists one event update (state, timeline, room account-data; never ephemeral).
    async fn store_event_update(&self, client_id: &str, update: &EventUpdate) -> Result<(), DatabaseError>;

    /// Caches a downloaded file under `mxc_uri`, stamped with the current time.
    async fn store_file(
        &self,
        mxc_uri: &str,
        bytes: &[u8],
        stored_at_ms: u64,
    ) -> Result<(), DatabaseError>;

    /// Deletes cached files stored before `before_ms`.
    async fn delete_old_files(&self, before_ms: u64) -> Result<(), DatabaseError>;

    /// Stores or replaces one device key.
    async fn store_user_device_key(
        &self,
        user_id: &OwnedUserId,
        device_id: &OwnedDeviceId,
        keys: &DeviceKeys,
    ) -> Result<(), DatabaseError>;

    /// Deletes a device key no longer present server-side.
    async fn remove_user_device_key(
        &self,
        user_id: &OwnedUserId,
        device_id: &OwnedDeviceId,
    ) -> Result<(), DatabaseError>;

    /// Records whether `user_id`'s device list is due for a refresh.
    async fn store_user_device_keys_info(
        &self,
        user_id: &OwnedUserId,
        outdated: bool,
    ) -> Result<(), DatabaseError>;

    /// Stores or replaces one cross-signing key.
    async fn store_user_cross_signing_key(
        &self,
        user_id: &OwnedUserId,
        key: &CrossSigningKey,
    ) -> Result<(), DatabaseError>;

    /// Deletes one timeline event, e.g. after a server-confirmed redaction of a local-only echo.
    async fn remove_event(&self, client_id: &str, room_id: &OwnedRoomId, event_id: &str) -> Result<(), DatabaseError>;
}

/// The persistent-store capability consumed by [`crate::Client`].
#[async_trait]
pub trait Database: DatabaseWrite {
    /// Looks up a previously stored session by client name.
    async fn get_client(&self, client_name: &str) -> Result<Option<ClientRow>, DatabaseError>;

    /// The largest attachment size, in bytes, this store is willing to cache.
    fn max_file_size(&self) -> u64;

    /// Fetches a cached file by content URI, if present.
    async fn get_file(&self, mxc_uri: &str) -> Result<Option<Vec<u8>>, DatabaseError>;

    /// Loads the device-key lists for every tracked user of `client_id`.
    async fn get_user_device_keys(
        &self,
        client_id: &str,
    ) -> Result<Vec<(OwnedUserId, Vec<DeviceKeys>, Vec<CrossSigningKey>, bool)>, DatabaseError>;

    /// Loads the room list for `client_id`, optionally restricted to left rooms (used by
    /// [`crate::Client::archive`]).
    async fn get_room_list(&self, client_id: &str, only_left: bool) -> Result<Vec<OwnedRoomId>, DatabaseError>;

    /// Loads all global account-data for `client_id`.
    async fn get_account_data(&self, client_id: &str) -> Result<Vec<(String, JsonValue)>, DatabaseError>;

    /// Looks up a stored `m.room.member` event for `user_id` in `room_id`, used to hydrate member
    /// state the server omitted from a lazy-loaded timeline.
    async fn get_user(
        &self,
        client_id: &str,
        user_id: &str,
        room_id: &str,
    ) -> Result<Option<Event>, DatabaseError>;

    /// Drops all stored state for `client_id` (called from [`crate::Client::clear`]).
    async fn clear(&self, client_id: &str) -> Result<(), DatabaseError>;

    /// Drops cached files and profiles for `client_id`, keeping the session row.
    async fn clear_cache(&self, client_id: &str) -> Result<(), DatabaseError>;

    /// Begins a transaction; mutations issued through it are only visible once
    /// [`DatabaseTransaction::commit`] is called.
    async fn begin_transaction(&self) -> Result<Box<dyn DatabaseTransaction>, DatabaseError>;

    /// Closes the underlying storage handle.
    async fn close(&self) -> Result<(), DatabaseError>;
}

/// A single in-flight database transaction.
///
/// Modeled as a boxed trait object (rather than an associated type on [`Database`]) so that
/// `Database` remains object-safe — the sync engine holds it as `Box<dyn Database>` alongside the
/// other two capabilities.
#[async_trait]
pub trait DatabaseTransaction: DatabaseWrite {
    /// Commits all writes issued through this transaction.
    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    /// Discards all writes issued through this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// The persisted fields of one client session row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientRow {
    /// The homeserver base URL.
    pub homeserver: Option<String>,
    /// The current access token.
    pub access_token: Option<String>,
    /// The authenticated user ID.
    pub user_id: Option<String>,
    /// This session's device ID.
    pub device_id: Option<String>,
    /// This session's device display name.
    pub device_name: Option<String>,
    /// The last `prev_batch`/`next_batch` token observed.
    pub prev_batch: Option<String>,
    /// The pickled (opaque, serialized) encryption account, if encryption is enabled.
    pub pickled_olm_account: Option<String>,
}

/// An error surfaced by a [`Database`] implementation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DatabaseError {
    /// The underlying storage engine reported a failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored row could not be decoded into the expected shape.
    #[error("corrupt row: {0}")]
    Decode(String),
}
