//! In-memory fakes for [`MatrixApi`], [`Database`], and [`Encryption`], driving [`Client`]
//! end-to-end through [`Client::handle_sync`] and [`Client::one_shot_sync`] without a network or a
//! real storage engine.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex as StdMutex},
};

use async_trait::async_trait;
use ruma_common::{OwnedDeviceId, OwnedUserId};
use serde_json::Value as JsonValue;

use crate::{
    api::{
        DeviceKeysQueryResponse, LoginRequest, LoginResponse, LoginTypesResponse, MatrixApi, MatrixApiError,
        ProfileResponse, RegisterRequest, SupportedVersionsResponse, SyncRequest, SyncResponse,
    },
    db::{ClientRow, Database, DatabaseError, DatabaseTransaction, DatabaseWrite},
    device_keys::{CrossSigningKey, DeviceKeys},
    encryption::{DecryptedToDeviceEvent, Encryption, EncryptionError},
    event::{Event, EventStatus, EventUpdate},
    room::RoomUpdate,
};

#[derive(Default)]
struct FakeStore {
    clients: HashMap<String, ClientRow>,
    account_data: HashMap<String, HashMap<String, JsonValue>>,
    room_updates: HashMap<String, Vec<RoomUpdate>>,
    members: HashMap<(String, String, String), Event>,
    device_keys: HashMap<(OwnedUserId, OwnedDeviceId), DeviceKeys>,
}

async fn store_event(store: &StdMutex<FakeStore>, client_id: &str, update: &EventUpdate) {
    let mut store = store.lock().unwrap();
    if update.content.event_type == "m.room.member" {
        if let (Some(room_id), Some(state_key)) = (&update.room_id, &update.content.state_key) {
            let event = Event::from_raw(update.content.clone(), room_id, 0.0, EventStatus::RoomState);
            store.members.insert((client_id.to_owned(), room_id.clone(), state_key.clone()), event);
        }
    }
}

/// A fully in-memory [`Database`], backed by a handful of [`HashMap`]s behind one lock.
///
/// Transactions write straight through to the same store; this fake has no rollback log, since
/// none of the scenarios below exercise rolling one back.
#[derive(Clone, Default)]
pub(crate) struct FakeDatabase {
    store: Arc<StdMutex<FakeStore>>,
}

impl FakeDatabase {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatabaseWrite for FakeDatabase {
    async fn upsert_client(&self, client_id: &str, fields: ClientRow) -> Result<(), DatabaseError> {
        self.store.lock().unwrap().clients.insert(client_id.to_owned(), fields);
        Ok(())
    }

    async fn store_prev_batch(&self, client_id: &str, prev_batch: &str) -> Result<(), DatabaseError> {
        self.store.lock().unwrap().clients.entry(client_id.to_owned()).or_default().prev_batch =
            Some(prev_batch.to_owned());
        Ok(())
    }

    async fn store_account_data(
        &self,
        client_id: &str,
        event_type: &str,
        content: JsonValue,
    ) -> Result<(), DatabaseError> {
        self.store
            .lock()
            .unwrap()
            .account_data
            .entry(client_id.to_owned())
            .or_default()
            .insert(event_type.to_owned(), content);
        Ok(())
    }

    async fn store_room_update(&self, client_id: &str, update: &RoomUpdate) -> Result<(), DatabaseError> {
        self.store.lock().unwrap().room_updates.entry(client_id.to_owned()).or_default().push(update.clone());
        Ok(())
    }

    async fn store_event_update(&self, client_id: &str, update: &EventUpdate) -> Result<(), DatabaseError> {
        store_event(&self.store, client_id, update).await;
        Ok(())
    }

    async fn store_file(&self, _mxc_uri: &str, _bytes: &[u8], _stored_at_ms: u64) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn delete_old_files(&self, _before_ms: u64) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn store_user_device_key(
        &self,
        user_id: &OwnedUserId,
        device_id: &OwnedDeviceId,
        keys: &DeviceKeys,
    ) -> Result<(), DatabaseError> {
        self.store.lock().unwrap().device_keys.insert((user_id.clone(), device_id.clone()), keys.clone());
        Ok(())
    }

    async fn remove_user_device_key(
        &self,
        user_id: &OwnedUserId,
        device_id: &OwnedDeviceId,
    ) -> Result<(), DatabaseError> {
        self.store.lock().unwrap().device_keys.remove(&(user_id.clone(), device_id.clone()));
        Ok(())
    }

    async fn store_user_device_keys_info(&self, _user_id: &OwnedUserId, _outdated: bool) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn store_user_cross_signing_key(
        &self,
        _user_id: &OwnedUserId,
        _key: &CrossSigningKey,
    ) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn remove_event(
        &self,
        _client_id: &str,
        _room_id: &ruma_common::OwnedRoomId,
        _event_id: &str,
    ) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[async_trait]
impl Database for FakeDatabase {
    async fn get_client(&self, client_name: &str) -> Result<Option<ClientRow>, DatabaseError> {
        Ok(self.store.lock().unwrap().clients.get(client_name).cloned())
    }

    fn max_file_size(&self) -> u64 {
        10 * 1024 * 1024
    }

    async fn get_file(&self, _mxc_uri: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
        Ok(None)
    }

    async fn get_user_device_keys(
        &self,
        _client_id: &str,
    ) -> Result<Vec<(OwnedUserId, Vec<DeviceKeys>, Vec<CrossSigningKey>, bool)>, DatabaseError> {
        Ok(Vec::new())
    }

    async fn get_room_list(&self, client_id: &str, only_left: bool) -> Result<Vec<ruma_common::OwnedRoomId>, DatabaseError> {
        let store = self.store.lock().unwrap();
        let Some(updates) = store.room_updates.get(client_id) else { return Ok(Vec::new()) };
        let ids = updates
            .iter()
            .filter(|u| !only_left || u.membership == crate::room::Membership::Leave)
            .filter_map(|u| ruma_common::RoomId::parse(&u.room_id).ok())
            .collect();
        Ok(ids)
    }

    async fn get_account_data(&self, client_id: &str) -> Result<Vec<(String, JsonValue)>, DatabaseError> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .account_data
            .get(client_id)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn get_user(&self, client_id: &str, user_id: &str, room_id: &str) -> Result<Option<Event>, DatabaseError> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .members
            .get(&(client_id.to_owned(), room_id.to_owned(), user_id.to_owned()))
            .cloned())
    }

    async fn clear(&self, client_id: &str) -> Result<(), DatabaseError> {
        let mut store = self.store.lock().unwrap();
        store.clients.remove(client_id);
        store.account_data.remove(client_id);
        store.room_updates.remove(client_id);
        Ok(())
    }

    async fn clear_cache(&self, _client_id: &str) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn DatabaseTransaction>, DatabaseError> {
        Ok(Box::new(FakeTransaction { store: self.store.clone() }))
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

struct FakeTransaction {
    store: Arc<StdMutex<FakeStore>>,
}

#[async_trait]
impl DatabaseWrite for FakeTransaction {
    async fn upsert_client(&self, client_id: &str, fields: ClientRow) -> Result<(), DatabaseError> {
        self.store.lock().unwrap().clients.insert(client_id.to_owned(), fields);
        Ok(())
    }

    async fn store_prev_batch(&self, client_id: &str, prev_batch: &str) -> Result<(), DatabaseError> {
        self.store.lock().unwrap().clients.entry(client_id.to_owned()).or_default().prev_batch =
            Some(prev_batch.to_owned());
        Ok(())
    }

    async fn store_account_data(
        &self,
        client_id: &str,
        event_type: &str,
        content: JsonValue,
    ) -> Result<(), DatabaseError> {
        self.store
            .lock()
            .unwrap()
            .account_data
            .entry(client_id.to_owned())
            .or_default()
            .insert(event_type.to_owned(), content);
        Ok(())
    }

    async fn store_room_update(&self, client_id: &str, update: &RoomUpdate) -> Result<(), DatabaseError> {
        self.store.lock().unwrap().room_updates.entry(client_id.to_owned()).or_default().push(update.clone());
        Ok(())
    }

    async fn store_event_update(&self, client_id: &str, update: &EventUpdate) -> Result<(), DatabaseError> {
        store_event(&self.store, client_id, update).await;
        Ok(())
    }

    async fn store_file(&self, _mxc_uri: &str, _bytes: &[u8], _stored_at_ms: u64) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn delete_old_files(&self, _before_ms: u64) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn store_user_device_key(
        &self,
        user_id: &OwnedUserId,
        device_id: &OwnedDeviceId,
        keys: &DeviceKeys,
    ) -> Result<(), DatabaseError> {
        self.store.lock().unwrap().device_keys.insert((user_id.clone(), device_id.clone()), keys.clone());
        Ok(())
    }

    async fn remove_user_device_key(
        &self,
        user_id: &OwnedUserId,
        device_id: &OwnedDeviceId,
    ) -> Result<(), DatabaseError> {
        self.store.lock().unwrap().device_keys.remove(&(user_id.clone(), device_id.clone()));
        Ok(())
    }

    async fn store_user_device_keys_info(&self, _user_id: &OwnedUserId, _outdated: bool) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn store_user_cross_signing_key(
        &self,
        _user_id: &OwnedUserId,
        _key: &CrossSigningKey,
    ) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn remove_event(
        &self,
        _client_id: &str,
        _room_id: &ruma_common::OwnedRoomId,
        _event_id: &str,
    ) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[async_trait]
impl DatabaseTransaction for FakeTransaction {
    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        Ok(())
    }
}

/// A scripted [`MatrixApi`]: `/sync` returns a queue of canned responses (or the configured
/// error), every other endpoint is unreachable in the scenarios that need this fake.
#[derive(Default)]
pub(crate) struct FakeMatrixApi {
    sync_responses: StdMutex<std::collections::VecDeque<Result<SyncResponse, MatrixApiError>>>,
    device_keys_response: StdMutex<Option<DeviceKeysQueryResponse>>,
}

impl FakeMatrixApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_sync_response(&self, response: SyncResponse) {
        self.sync_responses.lock().unwrap().push_back(Ok(response));
    }

    pub(crate) fn push_sync_error(&self, error: MatrixApiError) {
        self.sync_responses.lock().unwrap().push_back(Err(error));
    }
}

#[async_trait]
impl MatrixApi for FakeMatrixApi {
    async fn sync(&self, _request: SyncRequest) -> Result<SyncResponse, MatrixApiError> {
        self.sync_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SyncResponse { next_batch: "s0".to_owned(), ..Default::default() }))
    }

    async fn login(&self, _request: LoginRequest) -> Result<LoginResponse, MatrixApiError> {
        unimplemented!("not exercised by these scenarios")
    }

    async fn register(&self, _request: RegisterRequest) -> Result<LoginResponse, MatrixApiError> {
        unimplemented!("not exercised by these scenarios")
    }

    async fn logout(&self) -> Result<(), MatrixApiError> {
        Ok(())
    }

    async fn logout_all(&self) -> Result<(), MatrixApiError> {
        Ok(())
    }

    async fn send_to_device(
        &self,
        _event_type: &str,
        _transaction_id: &str,
        _messages: BTreeMap<OwnedUserId, BTreeMap<String, JsonValue>>,
    ) -> Result<(), MatrixApiError> {
        Ok(())
    }

    async fn request_device_keys(
        &self,
        _users: &[OwnedUserId],
        _timeout_ms: u64,
    ) -> Result<DeviceKeysQueryResponse, MatrixApiError> {
        Ok(self.device_keys_response.lock().unwrap().clone().unwrap_or_default())
    }

    async fn request_profile(&self, _user_id: &OwnedUserId) -> Result<ProfileResponse, MatrixApiError> {
        Ok(ProfileResponse::default())
    }

    async fn request_supported_versions(&self) -> Result<SupportedVersionsResponse, MatrixApiError> {
        unimplemented!("not exercised by these scenarios")
    }

    async fn request_login_types(&self) -> Result<LoginTypesResponse, MatrixApiError> {
        unimplemented!("not exercised by these scenarios")
    }

    async fn upload(&self, _bytes: Vec<u8>, _content_type: Option<String>) -> Result<String, MatrixApiError> {
        unimplemented!("not exercised by these scenarios")
    }

    async fn set_avatar_url(&self, _mxc_uri: &str) -> Result<(), MatrixApiError> {
        Ok(())
    }

    async fn enable_push_rule(
        &self,
        _scope: &str,
        _kind: &str,
        _rule_id: &str,
        _enabled: bool,
    ) -> Result<(), MatrixApiError> {
        Ok(())
    }

    async fn set_account_data(&self, _event_type: &str, _content: JsonValue) -> Result<(), MatrixApiError> {
        Ok(())
    }

    async fn change_password(&self, _new_password: &str, _auth: Option<JsonValue>) -> Result<(), MatrixApiError> {
        Ok(())
    }

    async fn redact_event(
        &self,
        _room_id: &str,
        _event_id: &str,
        _reason: Option<&str>,
        _transaction_id: &str,
    ) -> Result<(), MatrixApiError> {
        Ok(())
    }
}

/// A no-op [`Encryption`]: `enabled()` is always `false`, so the sync engine never calls the
/// decrypt/encrypt methods below (left as `unimplemented!()` to catch a scenario that should have
/// configured a real fake instead).
#[derive(Default)]
pub(crate) struct NullEncryption;

#[async_trait]
impl Encryption for NullEncryption {
    async fn init(&mut self, _pickled_account: Option<String>) -> Result<(), EncryptionError> {
        Ok(())
    }

    async fn dispose(&mut self) {}

    async fn on_sync(&mut self) -> Result<(), EncryptionError> {
        Ok(())
    }

    fn pickled_olm_account(&self) -> Option<String> {
        None
    }

    fn identity_key(&self) -> Option<String> {
        None
    }

    fn fingerprint_key(&self) -> Option<String> {
        None
    }

    fn enabled(&self) -> bool {
        false
    }

    async fn decrypt_to_device_event(
        &mut self,
        _event: &crate::event::RawEvent,
    ) -> Result<DecryptedToDeviceEvent, EncryptionError> {
        unimplemented!("encryption disabled in this fake")
    }

    async fn decrypt_room_event(
        &mut self,
        _event: &crate::event::RawEvent,
    ) -> Result<DecryptedToDeviceEvent, EncryptionError> {
        unimplemented!("encryption disabled in this fake")
    }

    async fn encrypt_to_device_message(
        &mut self,
        _devices: &[(OwnedUserId, OwnedDeviceId)],
        _event_type: &str,
        _message: JsonValue,
    ) -> Result<BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, JsonValue>>, EncryptionError> {
        unimplemented!("encryption disabled in this fake")
    }

    async fn handle_to_device_event(&mut self, _event: &crate::event::RawEvent) {}

    async fn handle_event_update(&mut self, _update: &EventUpdate) {}

    async fn handle_device_one_time_keys_count(&mut self, _counts: &BTreeMap<String, u64>) {}

    async fn decrypt_file(&self, _ciphertext: &[u8], _envelope: &JsonValue) -> Result<Vec<u8>, EncryptionError> {
        unimplemented!("encryption disabled in this fake")
    }
}

fn test_client(api: FakeMatrixApi, database: FakeDatabase) -> crate::Client {
    crate::Client::builder()
        .client_id("test-client")
        .client_name("ruma-sdk-tests")
        .homeserver_url("https://example.org")
        .api(api)
        .database(database)
        .encryption(NullEncryption)
        .background_sync(false)
        .build()
}

fn raw_event(event_type: &str, content: JsonValue, state_key: Option<&str>, event_id: &str) -> crate::event::RawEvent {
    crate::event::RawEvent {
        event_type: event_type.to_owned(),
        content: content.as_object().cloned().unwrap_or_default(),
        sender: Some("@alice:example.org".to_owned()),
        event_id: Some(event_id.to_owned()),
        state_key: state_key.map(ToOwned::to_owned),
        origin_server_ts: Some(1_700_000_000_000),
        ..Default::default()
    }
}

fn joined_sync(room_id: &str, next_batch: &str, build: impl FnOnce(&mut crate::api::JoinedRoomUpdate)) -> SyncResponse {
    let mut room_update = crate::api::JoinedRoomUpdate::default();
    build(&mut room_update);
    let mut joined_rooms = BTreeMap::new();
    joined_rooms.insert(room_id.to_owned(), room_update);
    SyncResponse { next_batch: next_batch.to_owned(), joined_rooms, ..Default::default() }
}

#[tokio::test]
async fn redaction_clears_whitelisted_state_fields() {
    let client = test_client(FakeMatrixApi::new(), FakeDatabase::new());

    let seed = joined_sync("!room:example.org", "s1", |room| {
        room.state = vec![raw_event(
            "m.room.power_levels",
            serde_json::json!({"ban": 50, "custom": "drop-me"}),
            Some(""),
            "$pl",
        )];
    });
    client.handle_sync(&seed).await.unwrap();

    let redact = joined_sync("!room:example.org", "s2", |room| {
        room.timeline = vec![raw_event("m.room.redaction", serde_json::json!({"redacts": "$pl"}), None, "$red")];
    });
    client.handle_sync(&redact).await.unwrap();

    let rooms = client.inner().rooms.lock().await;
    let room = rooms.get("!room:example.org").unwrap();
    let power_levels = room.get_state("m.room.power_levels", "").unwrap();
    assert!(!power_levels.content.contains_key("custom"));
    assert!(power_levels.content.contains_key("ban"));
}

#[tokio::test]
async fn encryption_algorithm_cannot_be_silently_downgraded() {
    let client = test_client(FakeMatrixApi::new(), FakeDatabase::new());

    let seed = joined_sync("!room:example.org", "s1", |room| {
        room.state = vec![raw_event(
            "m.room.encryption",
            serde_json::json!({"algorithm": "m.megolm.v1.aes-sha2"}),
            Some(""),
            "$enc1",
        )];
    });
    client.handle_sync(&seed).await.unwrap();

    let downgrade = joined_sync("!room:example.org", "s2", |room| {
        room.state = vec![raw_event("m.room.encryption", serde_json::json!({"algorithm": "m.weaker.v0"}), Some(""), "$enc2")];
    });
    client.handle_sync(&downgrade).await.unwrap();

    let rooms = client.inner().rooms.lock().await;
    let room = rooms.get("!room:example.org").unwrap();
    assert_eq!(room.encryption_algorithm(), Some("m.megolm.v1.aes-sha2"));
}

#[tokio::test]
async fn message_edit_is_aggregated_under_its_target() {
    let client = test_client(FakeMatrixApi::new(), FakeDatabase::new());

    let sync = joined_sync("!room:example.org", "s1", |room| {
        room.timeline = vec![
            raw_event("m.room.message", serde_json::json!({"body": "hello"}), None, "$orig"),
            raw_event(
                "m.room.message",
                serde_json::json!({
                    "body": "* world",
                    "m.new_content": {"body": "world"},
                    "m.relates_to": {"rel_type": "m.replace", "event_id": "$orig"},
                }),
                None,
                "$edit",
            ),
        ];
    });
    client.handle_sync(&sync).await.unwrap();

    let rooms = client.inner().rooms.lock().await;
    let room = rooms.get("!room:example.org").unwrap();
    let edits = room.timeline.aggregated_events("$orig", "m.replace").unwrap();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].event_id, "$edit");
}

#[tokio::test]
async fn ephemeral_receipts_are_flattened_to_a_user_keyed_map() {
    let client = test_client(FakeMatrixApi::new(), FakeDatabase::new());

    let sync = joined_sync("!room:example.org", "s1", |room| {
        room.ephemeral = vec![raw_event(
            "m.receipt",
            serde_json::json!({
                "$msg": {"m.read": {"@bob:example.org": {"ts": 1234}}},
            }),
            None,
            "",
        )];
    });
    client.handle_sync(&sync).await.unwrap();

    let rooms = client.inner().rooms.lock().await;
    let room = rooms.get("!room:example.org").unwrap();
    let receipts = room.room_account_data.get("m.receipt").unwrap();
    let bob = receipts.content.get("@bob:example.org").unwrap();
    assert_eq!(bob.get("event_id").unwrap(), "$msg");
}

#[tokio::test]
async fn unknown_token_sync_failure_clears_the_session() {
    let api = FakeMatrixApi::new();
    api.push_sync_error(MatrixApiError::Protocol {
        errcode: "M_UNKNOWN_TOKEN".to_owned(),
        error: "invalid token".to_owned(),
        retry_after_ms: None,
        session: None,
    });
    let client = test_client(api, FakeDatabase::new());
    client.inner().session.lock().unwrap().access_token = Some("stale".to_owned());

    let mut login_states = client.subscribe_login_state();

    assert!(client.one_shot_sync().await.is_err());

    assert!(!client.is_logged_in());
    assert_eq!(login_states.recv().await.unwrap(), crate::client::LoginState::LoggedOut);
}
