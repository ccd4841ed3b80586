#![doc(html_favicon_url = "https://ruma.dev/favicon.ico")]
#![doc(html_logo_url = "https://ruma.dev/images/logo.png")]
//! A client-side SDK for [Matrix](https://matrix.org/)-family chat protocols.
//!
//! # Usage
//!
//! This crate does not speak HTTP itself. [`Client`] is built from three injected capabilities —
//! a [`MatrixApi`](api::MatrixApi) (the homeserver-facing transport), an optional
//! [`Database`](db::Database) (persistence), and an [`Encryption`](encryption::Encryption)
//! subsystem (end-to-end crypto, or a no-op if encryption isn't needed) — the same way
//! `ruma-client`'s generic `HttpClient` parameter lets callers plug in `hyper`, `isahc`, or
//! `reqwest` without the request-building logic knowing which one is in use. Here the boundary is
//! drawn one layer higher: the core only ever sees the already-typed shapes in [`api`], [`db`],
//! and [`encryption`].
//!
//! ```ignore
//! let client = Client::builder()
//!     .homeserver_url("https://example.com".to_owned())
//!     .api(my_matrix_api)
//!     .database(my_database)
//!     .encryption(my_encryption)
//!     .build();
//!
//! client.login("@alice:example.com", "secret").await?;
//!
//! let mut events = client.subscribe_events();
//! tokio::spawn(async move {
//!     while let Ok(update) = events.recv().await {
//!         println!("{:?}", update);
//!     }
//! });
//! ```
//!
//! [`Client::login`] and [`Client::connect`] start a background sync loop (unless
//! `background_sync(false)` was set on the builder) that drives [`Client::one_shot_sync`] in a
//! loop, backing off by [`client::DEFAULT_SYNC_ERROR_TIMEOUT`] between failed passes. Consumers
//! observe the results entirely through the broadcast streams returned by the `subscribe_*`
//! methods on [`Client`]; there is no polling API.
//!
//! # Design
//!
//! - [`event`] and [`room`] hold the client-side data model: current room state, the bounded
//!   per-room [`timeline::Timeline`], and relation (edit/reaction/reply) resolution.
//! - [`sync`] is the engine that turns a [`api::SyncResponse`] into updates against that model.
//! - [`device_keys`] tracks which users' device lists are stale and merges freshly queried keys
//!   without ever silently rotating a device's public key.
//! - [`session`] is the small, `Clone`-able identity/session-token record; [`db::ClientRow`] is
//!   its persisted form.

#![warn(missing_docs)]

pub mod api;
mod client;
pub mod db;
pub mod device_keys;
pub mod encryption;
mod error;
pub mod event;
pub mod identifiers;
pub mod localization;
mod push_rules;
pub mod room;
pub mod session;
mod sync;
pub mod timeline;

#[cfg(test)]
mod testing;

pub use self::{
    client::{
        default_sync_filters, AccountDataUpdate, Client, ClientBuilder, LoginState, OlmErrorEvent,
        RoomSortConfig, SyncErrorEvent,
    },
    error::Error,
};
