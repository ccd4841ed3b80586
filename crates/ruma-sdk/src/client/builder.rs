use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use serde_json::Value as JsonValue;
use tokio::sync::{Mutex as AsyncMutex, Notify};

use super::{default_sync_filters, Broadcasts, Client, ClientInner, RoomSortConfig, DEFAULT_SYNC_ERROR_TIMEOUT};
use crate::{api::MatrixApi, db::Database, encryption::Encryption, session::Session};

/// A [`Client`] builder.
///
/// This type can be used to construct a `Client` through a few method calls. [`api`][Self::api]
/// and [`encryption`][Self::encryption] must be set before calling [`build()`][Self::build];
/// [`database`][Self::database] is optional (omitting it runs the client purely in-memory, with
/// no session persisted across restarts).
pub struct ClientBuilder {
    client_id: Option<String>,
    client_name: String,
    homeserver_url: Option<String>,
    access_token: Option<String>,
    api: Option<Box<dyn MatrixApi>>,
    database: Option<Box<dyn Database>>,
    encryption: Option<Box<dyn Encryption>>,
    sync_filters: JsonValue,
    background_sync: bool,
    sort_config: RoomSortConfig,
    sync_error_timeout: Duration,
}

impl ClientBuilder {
    pub(super) fn new() -> Self {
        Self {
            client_id: None,
            client_name: "ruma-sdk".to_owned(),
            homeserver_url: None,
            access_token: None,
            api: None,
            database: None,
            encryption: None,
            sync_filters: default_sync_filters(),
            background_sync: true,
            sort_config: RoomSortConfig::default(),
            sync_error_timeout: DEFAULT_SYNC_ERROR_TIMEOUT,
        }
    }

    /// Sets the local client identifier used as the database row key and transaction-ID prefix.
    ///
    /// Defaults to the homeserver URL if not set, so that a single database can hold one session
    /// per homeserver without collisions.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the human-readable client name (e.g. the application name), used as this device's
    /// initial display name and included in generated transaction IDs.
    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    /// Sets the homeserver base URL.
    pub fn homeserver_url(mut self, url: impl Into<String>) -> Self {
        self.homeserver_url = Some(url.into());
        self
    }

    /// Sets a previously issued access token, restoring a session without calling
    /// [`Client::login`].
    pub fn access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    /// Sets the [`MatrixApi`] implementation this client will issue requests through. Required.
    pub fn api(mut self, api: impl MatrixApi + 'static) -> Self {
        self.api = Some(Box::new(api));
        self
    }

    /// Sets the [`Database`] implementation this client will persist sessions, rooms, and events
    /// to. Omit to run purely in-memory.
    pub fn database(mut self, database: impl Database + 'static) -> Self {
        self.database = Some(Box::new(database));
        self
    }

    /// Sets the [`Encryption`] subsystem this client will delegate end-to-end crypto to. Required;
    /// pass a no-op implementation (one whose `enabled()` always returns `false`) to run without
    /// encryption support.
    pub fn encryption(mut self, encryption: impl Encryption + 'static) -> Self {
        self.encryption = Some(Box::new(encryption));
        self
    }

    /// Overrides the default sync filter (lazy-loaded room members).
    pub fn sync_filters(mut self, filters: JsonValue) -> Self {
        self.sync_filters = filters;
        self
    }

    /// Whether [`Client::connect`] spawns a background task looping [`Client::one_shot_sync`].
    /// Defaults to `true`; set `false` to drive syncing manually.
    pub fn background_sync(mut self, background_sync: bool) -> Self {
        self.background_sync = background_sync;
        self
    }

    /// Sets the room-list sort configuration used by [`Client::sort_rooms`].
    pub fn sort_config(mut self, sort_config: RoomSortConfig) -> Self {
        self.sort_config = sort_config;
        self
    }

    /// Sets the delay applied between background sync passes after a failure.
    pub fn sync_error_timeout(mut self, timeout: Duration) -> Self {
        self.sync_error_timeout = timeout;
        self
    }

    /// Finishes building the [`Client`].
    ///
    /// # Panics
    ///
    /// Panics if [`api`][Self::api] or [`encryption`][Self::encryption] was never set.
    pub fn build(self) -> Client {
        let api = self.api.expect("api() must be set before calling build()");
        let encryption = self.encryption.expect("encryption() must be set before calling build()");
        let homeserver_url = self.homeserver_url;
        let client_id = self.client_id.or_else(|| homeserver_url.clone()).unwrap_or_else(|| self.client_name.clone());

        let mut session = Session::new(client_id, self.client_name);
        session.homeserver = homeserver_url;
        session.access_token = self.access_token;

        Client(Arc::new(ClientInner {
            session: StdMutex::new(session),
            api,
            database: self.database,
            encryption: AsyncMutex::new(encryption),
            rooms: AsyncMutex::new(Default::default()),
            account_data: AsyncMutex::new(HashMap::new()),
            device_keys: AsyncMutex::new(Default::default()),
            ignored_users: AsyncMutex::new(HashSet::new()),
            profile_cache: AsyncMutex::new(HashMap::new()),
            sync_filters: self.sync_filters,
            background_sync: self.background_sync,
            sort_config: self.sort_config,
            sync_error_timeout: self.sync_error_timeout,
            disposed: AtomicBool::new(false),
            first_sync_done: AtomicBool::new(false),
            sync_in_flight: AtomicBool::new(false),
            sync_notify: Notify::new(),
            txn_counter: AtomicU64::new(0),
            broadcasts: Broadcasts::default(),
        }))
    }
}
