//! The client façade: session lifecycle, the room list, broadcast streams, and the small
//! convenience wrappers (profile cache, ignore list, archive fetch, password change) built on top
//! of the sync engine in [`crate::sync`].

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex as StdMutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use ruma_common::{OwnedDeviceId, OwnedUserId};
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify};
use tracing::{info, instrument, warn};

use crate::{
    api::{LoginResponse, MatrixApi, ProfileResponse, RegisterRequest, SupportedVersionsResponse},
    db::Database,
    device_keys::DeviceKeyTracker,
    encryption::Encryption,
    error::Error,
    event::EventUpdate,
    room::{Membership, Room, RoomUpdate},
    session::Session,
};

mod builder;

pub use self::builder::ClientBuilder;

/// The default delay applied between sync passes after a failure.
pub const DEFAULT_SYNC_ERROR_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether the client's session is currently authenticated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginState {
    /// A valid access token is set.
    LoggedIn,
    /// No access token is set (never logged in, or logged out/cleared).
    LoggedOut,
}

/// A lightweight, cloneable summary of an [`Error`] suitable for broadcasting to many
/// subscribers (the full [`Error`] type is not `Clone` because some of its variants wrap
/// non-cloneable upstream error types).
#[derive(Clone, Debug)]
pub struct SyncErrorEvent {
    /// The rendered error message.
    pub message: String,
    /// The Matrix `errcode`, if this was a protocol-level error.
    pub errcode: Option<String>,
}

impl From<&Error> for SyncErrorEvent {
    fn from(err: &Error) -> Self {
        SyncErrorEvent { message: err.to_string(), errcode: err.errcode().map(ToOwned::to_owned) }
    }
}

/// A to-device event that failed decryption, preserved as ciphertext for diagnostics.
#[derive(Clone, Debug)]
pub struct OlmErrorEvent {
    /// The failure reason.
    pub message: String,
    /// The original (still encrypted) to-device event.
    pub event: crate::event::RawEvent,
}

/// One room- or client-scoped account-data update.
#[derive(Clone, Debug)]
pub struct AccountDataUpdate {
    /// The room this update applies to, or `None` for client-scoped account data.
    pub room_id: Option<String>,
    /// The account-data event type.
    pub event_type: String,
    /// The event content.
    pub content: JsonValue,
}

/// Room-sort configuration consumed by [`Client::sort_rooms`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RoomSortConfig {
    /// Sort rooms with unread notifications ahead of read ones, within each favourite class.
    pub pin_unread_rooms: bool,
}

/// The in-memory, ordered room list.
#[derive(Default)]
pub(crate) struct RoomStore {
    order: Vec<String>,
    rooms: HashMap<String, Room>,
}

impl RoomStore {
    pub(crate) fn insert_front(&mut self, room: Room) {
        self.order.insert(0, room.room_id.clone());
        self.rooms.insert(room.room_id.clone(), room);
    }

    pub(crate) fn insert_back(&mut self, room: Room) {
        self.order.push(room.room_id.clone());
        self.rooms.insert(room.room_id.clone(), room);
    }

    pub(crate) fn remove(&mut self, room_id: &str) {
        self.order.retain(|id| id != room_id);
        self.rooms.remove(room_id);
    }

    pub(crate) fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub(crate) fn get_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    pub(crate) fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.rooms.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    /// Iterates rooms in their current display order.
    pub(crate) fn iter_ordered(&self) -> impl Iterator<Item = &Room> {
        self.order.iter().filter_map(move |id| self.rooms.get(id))
    }

    /// Sorts the room list: favourites first; then (if configured) higher `notification_count`
    /// first; then more recently created rooms first.
    fn sort(&mut self, config: RoomSortConfig) {
        let rooms = &self.rooms;
        self.order.sort_by(|a, b| {
            let a = &rooms[a];
            let b = &rooms[b];
            let fav_a = a.is_favourite();
            let fav_b = b.is_favourite();
            fav_b
                .cmp(&fav_a)
                .then_with(|| {
                    if config.pin_unread_rooms {
                        b.notification_count.cmp(&a.notification_count)
                    } else {
                        std::cmp::Ordering::Equal
                    }
                })
                .then_with(|| b.time_created.cmp(&a.time_created))
        });
    }
}

pub(crate) struct Broadcasts {
    pub(crate) on_event: broadcast::Sender<EventUpdate>,
    pub(crate) on_room_update: broadcast::Sender<RoomUpdate>,
    pub(crate) on_to_device_event: broadcast::Sender<crate::event::RawEvent>,
    pub(crate) on_login_state_changed: broadcast::Sender<LoginState>,
    pub(crate) on_error: broadcast::Sender<SyncErrorEvent>,
    pub(crate) on_sync_error: broadcast::Sender<SyncErrorEvent>,
    pub(crate) on_olm_error: broadcast::Sender<OlmErrorEvent>,
    pub(crate) on_first_sync: broadcast::Sender<()>,
    pub(crate) on_sync: broadcast::Sender<crate::api::SyncResponse>,
    pub(crate) on_presence: broadcast::Sender<crate::event::RawEvent>,
    pub(crate) on_account_data: broadcast::Sender<AccountDataUpdate>,
    pub(crate) on_call_invite: broadcast::Sender<crate::event::RawEvent>,
    pub(crate) on_call_hangup: broadcast::Sender<crate::event::RawEvent>,
    pub(crate) on_call_candidates: broadcast::Sender<crate::event::RawEvent>,
    pub(crate) on_call_answer: broadcast::Sender<crate::event::RawEvent>,
    pub(crate) on_room_key_request: broadcast::Sender<crate::event::RawEvent>,
    pub(crate) on_key_verification_request: broadcast::Sender<crate::event::RawEvent>,
}

const BROADCAST_CAPACITY: usize = 256;

impl Default for Broadcasts {
    fn default() -> Self {
        Broadcasts {
            on_event: broadcast::channel(BROADCAST_CAPACITY).0,
            on_room_update: broadcast::channel(BROADCAST_CAPACITY).0,
            on_to_device_event: broadcast::channel(BROADCAST_CAPACITY).0,
            on_login_state_changed: broadcast::channel(16).0,
            on_error: broadcast::channel(BROADCAST_CAPACITY).0,
            on_sync_error: broadcast::channel(BROADCAST_CAPACITY).0,
            on_olm_error: broadcast::channel(BROADCAST_CAPACITY).0,
            on_first_sync: broadcast::channel(1).0,
            on_sync: broadcast::channel(16).0,
            on_presence: broadcast::channel(BROADCAST_CAPACITY).0,
            on_account_data: broadcast::channel(BROADCAST_CAPACITY).0,
            on_call_invite: broadcast::channel(32).0,
            on_call_hangup: broadcast::channel(32).0,
            on_call_candidates: broadcast::channel(32).0,
            on_call_answer: broadcast::channel(32).0,
            on_room_key_request: broadcast::channel(32).0,
            on_key_verification_request: broadcast::channel(32).0,
        }
    }
}

/// The SDK's client façade.
///
/// `Client` is a cheap `Arc`-backed handle: clone it freely to hand out to the task driving the
/// background sync loop and to consumers subscribing to its broadcast streams.
#[derive(Clone)]
pub struct Client(std::sync::Arc<ClientInner>);

pub(crate) struct ClientInner {
    pub(crate) session: StdMutex<Session>,
    pub(crate) api: Box<dyn MatrixApi>,
    pub(crate) database: Option<Box<dyn Database>>,
    pub(crate) encryption: AsyncMutex<Box<dyn Encryption>>,
    pub(crate) rooms: AsyncMutex<RoomStore>,
    pub(crate) account_data: AsyncMutex<HashMap<String, JsonValue>>,
    pub(crate) device_keys: AsyncMutex<DeviceKeyTracker>,
    pub(crate) ignored_users: AsyncMutex<HashSet<OwnedUserId>>,
    pub(crate) profile_cache: AsyncMutex<HashMap<OwnedUserId, ProfileResponse>>,
    pub(crate) sync_filters: JsonValue,
    pub(crate) background_sync: bool,
    pub(crate) sort_config: RoomSortConfig,
    pub(crate) sync_error_timeout: Duration,
    pub(crate) disposed: AtomicBool,
    pub(crate) first_sync_done: AtomicBool,
    pub(crate) sync_in_flight: AtomicBool,
    pub(crate) sync_notify: Notify,
    pub(crate) txn_counter: AtomicU64,
    pub(crate) broadcasts: Broadcasts,
}

/// The default sync filter: lazy-load room members' state.
pub fn default_sync_filters() -> JsonValue {
    serde_json::json!({ "room": { "state": { "lazy_load_members": true } } })
}

/// The filter used by [`Client::archive`]: include left rooms with a short timeline.
pub fn archive_filters() -> JsonValue {
    serde_json::json!({ "room": { "include_leave": true, "timeline": { "limit": 10 } } })
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

impl Client {
    /// Starts building a new [`Client`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Generates a fresh, monotone transaction ID of the form `"{client_name}-{counter}-{now_ms}"`.
    pub fn generate_transaction_id(&self) -> String {
        let counter = self.0.txn_counter.fetch_add(1, Ordering::Relaxed);
        let client_name = self.0.session.lock().unwrap().client_name.clone();
        format!("{client_name}-{counter}-{}", now_ms())
    }

    pub(crate) fn inner(&self) -> &ClientInner {
        &self.0
    }

    /// Whether `dispose()` has been called on this client.
    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::Acquire)
    }

    /// Whether this session currently holds a valid access token.
    pub fn is_logged_in(&self) -> bool {
        self.0.session.lock().unwrap().is_logged_in()
    }

    /// A copy of the current session's identifying fields.
    pub fn session(&self) -> Session {
        self.0.session.lock().unwrap().clone()
    }

    /// Subscribes to persisted event updates (state, timeline, account-data, ephemeral).
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventUpdate> {
        self.0.broadcasts.on_event.subscribe()
    }

    /// Subscribes to room membership/counter/summary updates.
    pub fn subscribe_room_updates(&self) -> broadcast::Receiver<RoomUpdate> {
        self.0.broadcasts.on_room_update.subscribe()
    }

    /// Subscribes to raw to-device events (after any decryption attempt).
    pub fn subscribe_to_device_events(&self) -> broadcast::Receiver<crate::event::RawEvent> {
        self.0.broadcasts.on_to_device_event.subscribe()
    }

    /// Subscribes to login/logout transitions.
    pub fn subscribe_login_state(&self) -> broadcast::Receiver<LoginState> {
        self.0.broadcasts.on_login_state_changed.subscribe()
    }

    /// Subscribes to protocol-level sync errors.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<SyncErrorEvent> {
        self.0.broadcasts.on_error.subscribe()
    }

    /// Subscribes to non-protocol sync errors.
    pub fn subscribe_sync_errors(&self) -> broadcast::Receiver<SyncErrorEvent> {
        self.0.broadcasts.on_sync_error.subscribe()
    }

    /// Subscribes to to-device decryption failures.
    pub fn subscribe_olm_errors(&self) -> broadcast::Receiver<OlmErrorEvent> {
        self.0.broadcasts.on_olm_error.subscribe()
    }

    /// Subscribes to the one-shot "first sync since connect completed" notification.
    pub fn subscribe_first_sync(&self) -> broadcast::Receiver<()> {
        self.0.broadcasts.on_first_sync.subscribe()
    }

    /// Subscribes to raw sync responses, after all per-event processing has completed.
    pub fn subscribe_raw_sync(&self) -> broadcast::Receiver<crate::api::SyncResponse> {
        self.0.broadcasts.on_sync.subscribe()
    }

    /// Subscribes to account-data updates (room-scoped and client-scoped).
    pub fn subscribe_account_data(&self) -> broadcast::Receiver<AccountDataUpdate> {
        self.0.broadcasts.on_account_data.subscribe()
    }

    /// Checks that `url` is a homeserver advertising a login/registration flow this SDK can use,
    /// normalizing the URL (trimmed, no trailing slash) first.
    #[instrument(skip(api))]
    pub async fn check_server(api: &dyn MatrixApi, url: &str) -> Result<String, Error> {
        let normalized = url.trim().trim_end_matches('/').to_owned();
        let versions = api.request_supported_versions().await?;
        let login_types = api.request_login_types().await?;

        if !supports_required_version(&versions) {
            return Err(Error::Validation(format!(
                "{normalized} does not advertise a supported Matrix version"
            )));
        }
        if !login_types.flows.iter().any(|f| f == "m.login.password") {
            return Err(Error::Validation(format!(
                "{normalized} does not support m.login.password"
            )));
        }

        Ok(normalized)
    }

    /// Logs in with a username/password, then [`connect`][Self::connect]s.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<(), Error> {
        let request = crate::api::LoginRequest {
            identifier: identifier.to_owned(),
            password: password.to_owned(),
            device_id: None,
            initial_device_display_name: None,
        };
        let response = self.0.api.login(request).await?;
        self.apply_login_response(response).await?;
        self.connect().await
    }

    /// Registers a new account, then [`connect`][Self::connect]s.
    pub async fn register(&self, username: Option<&str>, password: &str) -> Result<(), Error> {
        let request = RegisterRequest {
            username: username.map(ToOwned::to_owned),
            password: Some(password.to_owned()),
            initial_device_display_name: None,
        };
        let response = self.0.api.register(request).await?;
        self.apply_login_response(response).await?;
        self.connect().await
    }

    async fn apply_login_response(&self, response: LoginResponse) -> Result<(), Error> {
        let mut session = self.0.session.lock().unwrap();
        session.access_token = Some(response.access_token);
        session.user_id = Some(response.user_id);
        session.device_id = Some(response.device_id);
        Ok(())
    }

    /// Hydrates the session from the store (if configured), (re)initializes encryption, persists
    /// the session row, and starts the background sync loop if configured to do so.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), Error> {
        let mut pickled_account = None;
        if let Some(db) = &self.0.database {
            let client_id = self.0.session.lock().unwrap().client_id.clone();
            if let Some(row) = db.get_client(&client_id).await? {
                let mut session = self.0.session.lock().unwrap();
                if session.access_token.is_none() {
                    session.access_token = row.access_token;
                }
                session.prev_batch = row.prev_batch;
                pickled_account = row.pickled_olm_account;
            }
        }

        {
            let mut encryption = self.0.encryption.lock().await;
            encryption.init(pickled_account).await?;
        }

        self.persist_session_row().await?;

        self.0.broadcasts.on_login_state_changed.send(LoginState::LoggedIn).ok();

        if self.0.background_sync {
            let client = self.clone();
            tokio::spawn(async move {
                client.run_background_sync().await;
            });
        }

        Ok(())
    }

    async fn persist_session_row(&self) -> Result<(), Error> {
        let Some(db) = &self.0.database else { return Ok(()) };
        let session = self.0.session.lock().unwrap().clone();
        db.upsert_client(
            &session.client_id,
            crate::db::ClientRow {
                homeserver: session.homeserver,
                access_token: session.access_token,
                user_id: session.user_id.map(|id| id.to_string()),
                device_id: session.device_id.map(|id| id.to_string()),
                device_name: session.device_name,
                prev_batch: session.prev_batch,
                pickled_olm_account: self.0.encryption.lock().await.pickled_olm_account(),
            },
        )
        .await?;
        Ok(())
    }

    async fn run_background_sync(&self) {
        loop {
            if self.is_disposed() || !self.is_logged_in() {
                return;
            }
            if let Err(err) = self.one_shot_sync().await {
                warn!(error = %err, "sync pass failed, backing off");
                tokio::time::sleep(self.0.sync_error_timeout).await;
            }
        }
    }

    /// Logs out this session (invalidating its access token), then [`clear`][Self::clear]s
    /// regardless of whether the API call succeeded.
    pub async fn logout(&self) -> Result<(), Error> {
        let result = self.0.api.logout().await;
        self.clear().await?;
        result.map_err(Error::from)
    }

    /// Logs out every device on this account, then [`clear`][Self::clear]s.
    pub async fn logout_all(&self) -> Result<(), Error> {
        let result = self.0.api.logout_all().await;
        self.clear().await?;
        result.map_err(Error::from)
    }

    /// Drops session state in memory and in the store, disposes encryption, and emits
    /// [`LoginState::LoggedOut`].
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), Error> {
        let client_id = {
            let mut session = self.0.session.lock().unwrap();
            session.clear();
            session.client_id.clone()
        };

        if let Some(db) = &self.0.database {
            db.clear(&client_id).await?;
        }

        self.0.rooms.lock().await.clear();
        self.0.account_data.lock().await.clear();
        self.0.encryption.lock().await.dispose().await;

        self.0.broadcasts.on_login_state_changed.send(LoginState::LoggedOut).ok();
        info!("session cleared");
        Ok(())
    }

    /// Sets the `disposed` flag, preventing further sync iterations from starting, and tears down
    /// encryption after any in-flight work completes.
    pub async fn dispose(&self) {
        self.0.disposed.store(true, Ordering::Release);
        while self.0.sync_in_flight.load(Ordering::Acquire) {
            self.0.sync_notify.notified().await;
        }
        self.0.encryption.lock().await.dispose().await;
    }

    /// The local user's own profile, derived from room membership state if every joined room
    /// agrees, otherwise fetched from the homeserver.
    pub async fn own_profile(&self) -> Result<ProfileResponse, Error> {
        let own_user_id = self.require_user_id()?;
        self.get_profile(&own_user_id, true).await
    }

    /// Fetches `user_id`'s profile, optionally deriving it from known room membership state
    /// first, falling back to a per-session cache, falling back to the API.
    pub async fn get_profile(&self, user_id: &OwnedUserId, try_from_rooms: bool) -> Result<ProfileResponse, Error> {
        if try_from_rooms {
            if let Some(profile) = self.profile_from_rooms(user_id).await {
                return Ok(profile);
            }
        }

        if let Some(cached) = self.0.profile_cache.lock().await.get(user_id).cloned() {
            return Ok(cached);
        }

        let profile = self.0.api.request_profile(user_id).await?;
        self.0.profile_cache.lock().await.insert(user_id.clone(), profile.clone());
        Ok(profile)
    }

    async fn profile_from_rooms(&self, user_id: &OwnedUserId) -> Option<ProfileResponse> {
        let rooms = self.0.rooms.lock().await;
        let mut found: Option<ProfileResponse> = None;
        for room in rooms.iter_ordered() {
            let Some(member) = room.get_state("m.room.member", user_id.as_str()) else { continue };
            if member.content.get("membership").and_then(JsonValue::as_str) != Some("join") {
                continue;
            }
            let profile = ProfileResponse {
                displayname: member.content.get("displayname").and_then(JsonValue::as_str).map(String::from),
                avatar_url: member.content.get("avatar_url").and_then(JsonValue::as_str).map(String::from),
            };
            match &found {
                Some(existing) if existing.displayname != profile.displayname || existing.avatar_url != profile.avatar_url => {
                    return None;
                }
                _ => found = Some(profile),
            }
        }
        found
    }

    /// Performs a one-shot, zero-timeout sync including left rooms, and returns the resulting
    /// rooms without mutating the live room list.
    pub async fn archive(&self) -> Result<Vec<Room>, Error> {
        let since = self.0.session.lock().unwrap().prev_batch.clone();
        let response = self
            .0
            .api
            .sync(crate::api::SyncRequest { filter: Some(archive_filters()), since, timeout_ms: None })
            .await?;

        let mut archived = Vec::new();
        for (room_id, update) in response.left_rooms {
            let mut room = Room::new(room_id, Membership::Leave, 0);
            for raw in update.state {
                let sort_order = room.next_new_sort_order();
                let event = crate::event::Event::from_raw(raw, &room.room_id, sort_order, crate::event::EventStatus::RoomState);
                room.set_state(event);
            }
            for raw in update.timeline {
                let sort_order = room.next_new_sort_order();
                let event = crate::event::Event::from_raw(raw, &room.room_id, sort_order, crate::event::EventStatus::Timeline);
                room.timeline.push(event);
            }
            archived.push(room);
        }
        Ok(archived)
    }

    /// Adds `user_id` to `m.ignored_user_list` account-data and clears the local message cache.
    pub async fn ignore_user(&self, user_id: &str) -> Result<(), Error> {
        let user_id = crate::identifiers::parse_user_id(user_id)?;
        self.update_ignore_list(|set| {
            set.insert(user_id.clone());
        })
        .await
    }

    /// Removes `user_id` from `m.ignored_user_list` account-data and clears the local message
    /// cache.
    pub async fn unignore_user(&self, user_id: &str) -> Result<(), Error> {
        let user_id = crate::identifiers::parse_user_id(user_id)?;
        self.update_ignore_list(|set| {
            set.remove(&user_id);
        })
        .await
    }

    async fn update_ignore_list(&self, mutate: impl FnOnce(&mut HashSet<OwnedUserId>)) -> Result<(), Error> {
        let mut ignored = self.0.ignored_users.lock().await;
        mutate(&mut ignored);
        let content = serde_json::json!({
            "ignored_users": ignored.iter().map(|id| (id.to_string(), serde_json::json!({}))).collect::<serde_json::Map<_, _>>(),
        });
        drop(ignored);

        self.0.api.set_account_data("m.ignored_user_list", content).await?;
        self.0.profile_cache.lock().await.clear();
        Ok(())
    }

    /// Re-sorts the live room list in place using the configured [`RoomSortConfig`].
    ///
    /// A no-op before the first sync has completed, or while fewer than two rooms are tracked.
    pub async fn sort_rooms(&self) {
        if !self.0.first_sync_done.load(Ordering::Acquire) {
            return;
        }
        let mut rooms = self.0.rooms.lock().await;
        if rooms.len() < 2 {
            return;
        }
        rooms.sort(self.0.sort_config);
    }

    /// Sends one to-device message of `event_type` to every device of each of `user_ids`.
    pub async fn send_to_devices_of_user_ids(
        &self,
        user_ids: &[OwnedUserId],
        event_type: &str,
        message: JsonValue,
        transaction_id: Option<String>,
    ) -> Result<(), Error> {
        let txn_id = transaction_id.unwrap_or_else(|| self.generate_transaction_id());
        let mut messages = std::collections::BTreeMap::new();
        for user_id in user_ids {
            let mut per_device = std::collections::BTreeMap::new();
            per_device.insert("*".to_owned(), message.clone());
            messages.insert(user_id.clone(), per_device);
        }
        self.0.api.send_to_device(event_type, &txn_id, messages).await?;
        Ok(())
    }

    /// Sends one to-device message to specific `(user, device)` pairs, encrypting it for each
    /// device and filtering out blocked devices, this client's own device, and (if
    /// `only_verified`) unverified devices.
    pub async fn send_to_device_encrypted(
        &self,
        devices: &[(OwnedUserId, OwnedDeviceId)],
        event_type: &str,
        message: JsonValue,
        transaction_id: Option<String>,
        only_verified: bool,
    ) -> Result<(), Error> {
        let own_device_id = self.0.session.lock().unwrap().device_id.clone();
        let tracker = self.0.device_keys.lock().await;
        let filtered: Vec<(OwnedUserId, OwnedDeviceId)> = devices
            .iter()
            .filter(|(user_id, device_id)| {
                if Some(device_id) == own_device_id.as_ref() {
                    return false;
                }
                let Some(list) = tracker.get(user_id) else { return true };
                let Some(keys) = list.device_keys.get(device_id) else { return true };
                if keys.blocked {
                    return false;
                }
                !only_verified || keys.direct_verified
            })
            .cloned()
            .collect();
        drop(tracker);

        let txn_id = transaction_id.unwrap_or_else(|| self.generate_transaction_id());
        let encrypted = {
            let mut encryption = self.0.encryption.lock().await;
            encryption.encrypt_to_device_message(&filtered, event_type, message).await?
        };
        let messages = encrypted
            .into_iter()
            .map(|(user_id, per_device)| {
                let per_device =
                    per_device.into_iter().map(|(device_id, payload)| (device_id.to_string(), payload)).collect();
                (user_id, per_device)
            })
            .collect();
        self.0.api.send_to_device("m.room.encrypted", &txn_id, messages).await?;
        Ok(())
    }

    /// Changes the account password. When `old_password` is supplied, retries once with the
    /// server-issued UIA session if the server requires exactly an `m.login.password` stage.
    pub async fn change_password(&self, new_password: &str, old_password: Option<&str>) -> Result<(), Error> {
        let auth = old_password.map(|password| {
            serde_json::json!({ "type": "m.login.password", "password": password })
        });

        match self.0.api.change_password(new_password, auth.clone()).await {
            Ok(()) => Ok(()),
            Err(crate::api::MatrixApiError::Protocol { session: Some(session), .. })
                if session.flows.iter().any(|flow| flow.len() == 1 && flow[0] == "m.login.password") =>
            {
                let retried_auth = old_password.map(|password| {
                    serde_json::json!({
                        "type": "m.login.password",
                        "password": password,
                        "session": session.session,
                    })
                });
                self.0.api.change_password(new_password, retried_auth).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) fn require_user_id(&self) -> Result<OwnedUserId, Error> {
        self.0
            .session
            .lock()
            .unwrap()
            .user_id
            .clone()
            .ok_or_else(|| Error::State("not logged in".to_owned()))
    }
}

fn supports_required_version(versions: &SupportedVersionsResponse) -> bool {
    versions.versions.iter().any(|v| v == "r0.5.0" || v == "r0.6.0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_sort_prefers_favourites_then_unread_then_recency() {
        let mut store = RoomStore::default();
        let mut a = Room::new("!a:example.org", Membership::Join, 1);
        a.notification_count = 1;
        let mut b = Room::new("!b:example.org", Membership::Join, 2);
        b.notification_count = 5;
        let c = Room::new("!c:example.org", Membership::Join, 3);

        store.insert_back(a);
        store.insert_back(b);
        store.insert_back(c);

        store.sort(RoomSortConfig { pin_unread_rooms: true });
        let order: Vec<&str> = store.iter_ordered().map(|r| r.room_id.as_str()).collect();
        assert_eq!(order, vec!["!b:example.org", "!a:example.org", "!c:example.org"]);
    }

    #[test]
    fn room_sort_without_pin_unread_falls_back_to_recency() {
        let mut store = RoomStore::default();
        let mut a = Room::new("!a:example.org", Membership::Join, 1);
        a.notification_count = 100;
        let b = Room::new("!b:example.org", Membership::Join, 5);
        store.insert_back(a);
        store.insert_back(b);

        store.sort(RoomSortConfig { pin_unread_rooms: false });
        let order: Vec<&str> = store.iter_ordered().map(|r| r.room_id.as_str()).collect();
        assert_eq!(order, vec!["!b:example.org", "!a:example.org"]);
    }
}
