//! Device-key tracking for end-to-end encryption.
//!
//! The actual Olm/Megolm cryptography lives behind [`crate::encryption::Encryption`]; this module
//! only maintains the bookkeeping needed to know which users' device lists are stale and to merge
//! freshly queried keys without ever silently rotating a device's public key.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::{Duration, Instant},
};

use ruma_common::{OwnedDeviceId, OwnedUserId};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{api::MatrixApi, db::DatabaseWrite, error::Error};

/// How long a per-domain device-key query failure is remembered before that domain's users become
/// eligible for a refresh again.
pub const DOMAIN_FAILURE_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// One device's identity and verification state.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceKeys {
    /// The device ID these keys belong to.
    pub device_id: OwnedDeviceId,
    /// The owning user.
    pub user_id: OwnedUserId,
    /// This device's Ed25519 signing key. Must never silently change once observed.
    pub ed25519_key: String,
    /// This device's Curve25519 identity key.
    pub curve25519_key: String,
    /// Signatures attached to the device-keys payload.
    pub signatures: JsonValue,
    /// Whether the local user has directly verified this device.
    pub direct_verified: bool,
    /// Whether this device has been explicitly blocked.
    pub blocked: bool,
    /// Whether this device's signatures were valid the last time they were checked.
    pub valid_signatures: bool,
}

/// A cross-signing key's declared usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CrossSigningUsage {
    /// The top-level identity key, signs the other two.
    Master,
    /// Signs this user's own devices.
    SelfSigning,
    /// Signs other users' master keys, establishing trust between users.
    UserSigning,
}

/// One cross-signing key.
#[derive(Clone, Debug, PartialEq)]
pub struct CrossSigningKey {
    /// The owning user.
    pub user_id: OwnedUserId,
    /// The declared usage of this key.
    pub usage: CrossSigningUsage,
    /// The public key material, keyed by its own identifier (e.g. `ed25519:<base64 key>`).
    pub public_key: String,
    /// Signatures attached to the key payload.
    pub signatures: JsonValue,
    /// Whether the local user has directly verified this key.
    pub direct_verified: bool,
}

/// One user's full device-key picture.
#[derive(Clone, Debug, Default)]
pub struct DeviceKeysList {
    /// This user's devices, keyed by device ID.
    pub device_keys: HashMap<OwnedDeviceId, DeviceKeys>,
    /// This user's cross-signing keys, keyed by public key.
    pub cross_signing_keys: HashMap<String, CrossSigningKey>,
    /// Whether this user's device list is known to be stale and due for a refresh.
    pub outdated: bool,
}

fn parse_device_keys(user_id: &OwnedUserId, device_id: &OwnedDeviceId, payload: &JsonValue) -> Option<DeviceKeys> {
    let keys = payload.get("keys")?.as_object()?;
    let ed25519_key = keys
        .iter()
        .find(|(k, _)| k.starts_with("ed25519:"))
        .and_then(|(_, v)| v.as_str())?
        .to_owned();
    let curve25519_key = keys
        .iter()
        .find(|(k, _)| k.starts_with("curve25519:"))
        .and_then(|(_, v)| v.as_str())?
        .to_owned();

    Some(DeviceKeys {
        device_id: device_id.clone(),
        user_id: user_id.clone(),
        ed25519_key,
        curve25519_key,
        signatures: payload.get("signatures").cloned().unwrap_or(JsonValue::Null),
        direct_verified: false,
        blocked: false,
        valid_signatures: true,
    })
}

fn parse_cross_signing_key(
    user_id: &OwnedUserId,
    usage: CrossSigningUsage,
    payload: &JsonValue,
) -> Option<CrossSigningKey> {
    let keys = payload.get("keys")?.as_object()?;
    let (_, public_key) = keys.iter().next()?;
    let public_key = public_key.as_str()?.to_owned();

    Some(CrossSigningKey {
        user_id: user_id.clone(),
        usage,
        public_key,
        signatures: payload.get("signatures").cloned().unwrap_or(JsonValue::Null),
        direct_verified: false,
    })
}

/// Maintains the device-key lists for every user tracked by a [`crate::Client`].
#[derive(Debug, Default)]
pub struct DeviceKeyTracker {
    users: HashMap<OwnedUserId, DeviceKeysList>,
    domain_failures: HashMap<String, Instant>,
}

impl DeviceKeyTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// The device-key list for `user_id`, if tracked.
    pub fn get(&self, user_id: &OwnedUserId) -> Option<&DeviceKeysList> {
        self.users.get(user_id)
    }

    /// Drops every tracked user not present in `keep`.
    pub fn retain_tracked(&mut self, keep: &HashSet<OwnedUserId>) {
        self.users.retain(|user_id, _| keep.contains(user_id));
    }

    /// Marks `user_id`'s device list outdated, inserting an empty entry if not yet tracked.
    pub fn mark_outdated(&mut self, user_id: &OwnedUserId) {
        self.users.entry(user_id.clone()).or_default().outdated = true;
    }

    /// Stops tracking `user_id` entirely (the device-list `left` hint from sync).
    pub fn stop_tracking(&mut self, user_id: &OwnedUserId) {
        self.users.remove(user_id);
    }

    /// Computes the set of tracked users whose `outdated` flag is set and whose homeserver domain
    /// is not currently in a failure backoff window.
    pub fn due_for_refresh(&self, now: Instant) -> HashSet<OwnedUserId> {
        self.users
            .iter()
            .filter(|(_, list)| list.outdated)
            .filter(|(user_id, _)| {
                let domain = user_id.server_name().as_str().to_owned();
                match self.domain_failures.get(&domain) {
                    Some(failed_at) => now.duration_since(*failed_at) >= DOMAIN_FAILURE_BACKOFF,
                    None => true,
                }
            })
            .map(|(user_id, _)| user_id.clone())
            .collect()
    }

    /// Runs one device-key refresh pass: computes the outdated set, queries it via `api`, merges
    /// the results (preserving verification state and rejecting silent public-key rotation), and
    /// persists the result through `database` if configured.
    pub async fn update(
        &mut self,
        api: &dyn MatrixApi,
        database: Option<&dyn DatabaseWrite>,
        tracked_user_ids: &HashSet<OwnedUserId>,
        own_user_id: &OwnedUserId,
        own_fingerprint_key: Option<&str>,
        now: Instant,
    ) -> Result<(), Error> {
        self.retain_tracked(tracked_user_ids);

        let outdated = self.due_for_refresh(now);
        if outdated.is_empty() {
            return Ok(());
        }

        let users: Vec<OwnedUserId> = outdated.into_iter().collect();
        let response = api.request_device_keys(&users, 10_000).await?;

        for (user_id, devices) in &response.device_keys {
            self.merge_device_keys(user_id, devices, own_user_id, own_fingerprint_key, database).await?;
        }

        self.merge_cross_signing(&response.master_keys, CrossSigningUsage::Master, database).await?;
        self.merge_cross_signing(&response.self_signing_keys, CrossSigningUsage::SelfSigning, database).await?;
        self.merge_cross_signing(&response.user_signing_keys, CrossSigningUsage::UserSigning, database).await?;

        for domain in response.failures.keys() {
            self.domain_failures.insert(domain.as_str().to_owned(), now);
        }

        Ok(())
    }

    async fn merge_device_keys(
        &mut self,
        user_id: &OwnedUserId,
        devices: &BTreeMap<OwnedDeviceId, JsonValue>,
        own_user_id: &OwnedUserId,
        own_fingerprint_key: Option<&str>,
        database: Option<&dyn DatabaseWrite>,
    ) -> Result<(), Error> {
        let entry = self.users.entry(user_id.clone()).or_default();
        let old_keys = std::mem::take(&mut entry.device_keys);
        let mut removed: Vec<OwnedDeviceId> = old_keys.keys().cloned().collect();

        for (device_id, payload) in devices {
            let Some(mut parsed) = parse_device_keys(user_id, device_id, payload) else {
                warn!(%user_id, %device_id, "skipping malformed device keys payload");
                continue;
            };

            removed.retain(|id| id != device_id);

            match old_keys.get(device_id) {
                Some(old) if old.ed25519_key == parsed.ed25519_key => {
                    parsed.direct_verified = old.direct_verified;
                    parsed.blocked = old.blocked;
                    parsed.valid_signatures = old.valid_signatures;
                }
                Some(old) => {
                    warn!(
                        %user_id, %device_id,
                        "refusing to silently rotate device ed25519 key; keeping prior key"
                    );
                    entry.device_keys.insert(device_id.clone(), old.clone());
                    continue;
                }
                None => {}
            }

            if user_id == own_user_id && Some(parsed.ed25519_key.as_str()) == own_fingerprint_key {
                parsed.direct_verified = true;
            }

            if let Some(db) = database {
                db.store_user_device_key(user_id, device_id, &parsed).await?;
            }

            entry.device_keys.insert(device_id.clone(), parsed);
        }

        if let Some(db) = database {
            for device_id in &removed {
                db.remove_user_device_key(user_id, device_id).await?;
            }
            db.store_user_device_keys_info(user_id, false).await?;
        }

        entry.outdated = false;
        Ok(())
    }

    async fn merge_cross_signing(
        &mut self,
        keys: &BTreeMap<OwnedUserId, JsonValue>,
        usage: CrossSigningUsage,
        database: Option<&dyn DatabaseWrite>,
    ) -> Result<(), Error> {
        for (user_id, payload) in keys {
            let Some(mut parsed) = parse_cross_signing_key(user_id, usage, payload) else {
                warn!(%user_id, ?usage, "skipping malformed cross-signing key payload");
                continue;
            };

            let entry = self.users.entry(user_id.clone()).or_default();
            if let Some(old) = entry.cross_signing_keys.get(&parsed.public_key) {
                parsed.direct_verified = old.direct_verified;
            }

            if let Some(db) = database {
                db.store_user_cross_signing_key(user_id, &parsed).await?;
            }

            entry.cross_signing_keys.insert(parsed.public_key.clone(), parsed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn due_for_refresh_respects_domain_backoff() {
        let mut tracker = DeviceKeyTracker::new();
        let user = ruma_common::user_id!("@v:server.tld").to_owned();
        tracker.mark_outdated(&user);

        let t0 = Instant::now();
        tracker.domain_failures.insert("server.tld".to_owned(), t0);

        assert!(tracker.due_for_refresh(t0 + Duration::from_secs(120)).is_empty());
        assert!(tracker.due_for_refresh(t0 + Duration::from_secs(360)).contains(&user));
    }

    #[test]
    fn retain_tracked_drops_untracked_users() {
        let mut tracker = DeviceKeyTracker::new();
        let kept = ruma_common::user_id!("@a:example.org").to_owned();
        let dropped = ruma_common::user_id!("@b:example.org").to_owned();
        tracker.mark_outdated(&kept);
        tracker.mark_outdated(&dropped);

        let mut keep = HashSet::new();
        keep.insert(kept.clone());
        tracker.retain_tracked(&keep);

        assert!(tracker.get(&kept).is_some());
        assert!(tracker.get(&dropped).is_none());
    }

    #[tokio::test]
    async fn merge_device_keys_accepts_unchanged_key_and_rejects_rotation() {
        let mut tracker = DeviceKeyTracker::new();
        let user = ruma_common::user_id!("@v:example.org").to_owned();
        let device = ruma_common::device_id!("DEVICE1").to_owned();

        let mut first = BTreeMap::new();
        first.insert(
            device.clone(),
            serde_json::json!({
                "keys": {
                    "ed25519:DEVICE1": "original-ed25519-key",
                    "curve25519:DEVICE1": "original-curve25519-key",
                },
                "signatures": {},
            }),
        );
        tracker.merge_device_keys(&user, &first, &user, None, None).await.unwrap();
        tracker.users.get_mut(&user).unwrap().device_keys.get_mut(&device).unwrap().direct_verified = true;

        // Same server response again (e.g. a second query before anything changed): the key
        // matches, so verification state must survive the merge.
        tracker.merge_device_keys(&user, &first, &user, None, None).await.unwrap();
        assert!(tracker.get(&user).unwrap().device_keys[&device].direct_verified);

        // The homeserver now reports a different ed25519 key under the same device ID. This must
        // be rejected rather than silently trusted, and the previously verified key kept.
        let mut rotated = BTreeMap::new();
        rotated.insert(
            device.clone(),
            serde_json::json!({
                "keys": {
                    "ed25519:DEVICE1": "attacker-supplied-key",
                    "curve25519:DEVICE1": "original-curve25519-key",
                },
                "signatures": {},
            }),
        );
        tracker.merge_device_keys(&user, &rotated, &user, None, None).await.unwrap();

        let kept = &tracker.get(&user).unwrap().device_keys[&device];
        assert_eq!(kept.ed25519_key, "original-ed25519-key");
        assert!(kept.direct_verified);
    }
}
