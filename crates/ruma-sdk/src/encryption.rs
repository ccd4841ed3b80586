//! The [`Encryption`] capability: the end-to-end crypto boundary.
//!
//! Olm/Megolm session management and key-verification flows are out of scope for this crate (see
//! the module docs on [`crate`]); the sync engine only needs the narrow interface below to weave
//! encryption into the sync loop at the right points.

use async_trait::async_trait;
use ruma_common::{OwnedDeviceId, OwnedUserId};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::event::{EventUpdate, RawEvent};

/// The decrypted plaintext and algorithm produced by decrypting a to-device event.
#[derive(Clone, Debug)]
pub struct DecryptedToDeviceEvent {
    /// The event type after decryption.
    pub event_type: String,
    /// The decrypted content.
    pub content: JsonValue,
    /// Device fingerprint key that produced the ciphertext, if verifiable.
    pub sender_key: Option<String>,
}

/// An end-to-end encryption subsystem, injected into [`crate::Client`].
///
/// A no-op implementation (one that always reports `enabled() == false`) is a valid way to run
/// the SDK without encryption support.
#[async_trait]
pub trait Encryption: Send + Sync {
    /// Loads (or creates, if `pickled_account` is `None`) the account this subsystem will use.
    async fn init(&mut self, pickled_account: Option<String>) -> Result<(), EncryptionError>;

    /// Releases any resources held by this subsystem. Called after the current sync's in-flight
    /// database transaction (if any) has completed.
    async fn dispose(&mut self);

    /// Called once per completed sync pass, after all events in that pass have been handled.
    async fn on_sync(&mut self) -> Result<(), EncryptionError>;

    /// The current account, serialized for persistence.
    fn pickled_olm_account(&self) -> Option<String>;

    /// This device's Curve25519 identity key.
    fn identity_key(&self) -> Option<String>;

    /// This device's Ed25519 fingerprint key.
    fn fingerprint_key(&self) -> Option<String>;

    /// Whether encryption is active for this client (`false` disables all of the calls below).
    fn enabled(&self) -> bool;

    /// Decrypts one `m.room.encrypted` to-device event.
    async fn decrypt_to_device_event(
        &mut self,
        event: &RawEvent,
    ) -> Result<DecryptedToDeviceEvent, EncryptionError>;

    /// Decrypts one `m.room.encrypted` room event (Megolm), as opposed to the Olm-encrypted
    /// to-device messages handled by [`Self::decrypt_to_device_event`].
    async fn decrypt_room_event(
        &mut self,
        event: &RawEvent,
    ) -> Result<DecryptedToDeviceEvent, EncryptionError>;

    /// Encrypts one to-device message for each of the given `(user, device)` pairs.
    async fn encrypt_to_device_message(
        &mut self,
        devices: &[(OwnedUserId, OwnedDeviceId)],
        event_type: &str,
        message: JsonValue,
    ) -> Result<BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, JsonValue>>, EncryptionError>;

    /// Notifies the subsystem of a (possibly already-decrypted) to-device event, e.g. to advance
    /// key-verification or room-key-request state machines.
    async fn handle_to_device_event(&mut self, event: &RawEvent);

    /// Notifies the subsystem of a persisted room event update, e.g. to ingest inbound room keys.
    async fn handle_event_update(&mut self, update: &EventUpdate);

    /// Notifies the subsystem of the server's remaining one-time-key counts, so it can top up the
    /// pool if needed.
    async fn handle_device_one_time_keys_count(&mut self, counts: &BTreeMap<String, u64>);

    /// Decrypts a downloaded attachment given its envelope (key, IV, SHA-256 hash).
    async fn decrypt_file(&self, ciphertext: &[u8], envelope: &JsonValue) -> Result<Vec<u8>, EncryptionError>;
}

/// An error surfaced by an [`Encryption`] implementation.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum EncryptionError {
    /// The to-device Olm/Megolm channel could not be decrypted (session mismatch, replay, MAC
    /// failure).
    #[error("encrypted channel corrupted")]
    ChannelCorrupted,

    /// Encryption was requested but this subsystem is not enabled.
    #[error("encryption is not enabled for this client")]
    NotEnabled,

    /// The event names an algorithm this subsystem does not implement.
    #[error("unknown encryption algorithm: {0}")]
    UnknownAlgorithm(String),

    /// No inbound session exists for this message's session ID.
    #[error("unknown megolm session")]
    UnknownSession,
}
