//! The incremental sync engine: one `/sync` pass, fanned out into room/event/to-device handling,
//! device-key refresh, and the broadcast streams in [`crate::client`].
//!
//! [`Client::handle_sync`] is the deterministic core: it takes an already-received
//! [`SyncResponse`][crate::api::SyncResponse] and applies it to the in-memory room store, without
//! itself touching the network. [`Client::one_shot_sync`] wraps it with the network round-trip,
//! the database transaction, and the bookkeeping ([`crate::device_keys`] refresh, stale-file
//! pruning) that only makes sense once per pass. [`Client::run_background_sync`] (in
//! [`crate::client`]) just loops [`Client::one_shot_sync`] until disposed or logged out.

use std::{collections::HashSet, sync::atomic::Ordering, time::Instant};

use ruma_common::OwnedUserId;
use serde_json::Value as JsonValue;
use tracing::{instrument, warn};

use crate::{
    api::{
        InvitedRoomUpdate, JoinedRoomUpdate, LeftRoomUpdate, MatrixApiError, RoomSummaryUpdate, SyncRequest,
        SyncResponse,
    },
    client::{now_ms, AccountDataUpdate, Client, OlmErrorEvent, SyncErrorEvent},
    db::DatabaseWrite,
    error::Error,
    event::{Event, EventStatus, EventUpdate, EventUpdateKind, RawEvent},
    room::{Membership, Room, RoomSummary, RoomUpdate},
};

/// Long-poll timeout used once this client has a `since` token to resume from.
const SYNC_TIMEOUT_MS: u64 = 30_000;

/// How long a downloaded attachment may sit in the cache before a sync pass prunes it.
const FILE_CACHE_MAX_AGE_MS: u64 = 30 * 24 * 60 * 60 * 1000;

impl Client {
    /// Performs one blocking `/sync` round-trip and applies the result.
    ///
    /// Re-entrant-safe: if a pass is already in flight on this client (e.g. the background loop
    /// is mid-sync and a caller also invokes this directly), this call waits for it to finish and
    /// returns `Ok(())` without starting a second pass.
    #[instrument(skip(self))]
    pub async fn one_shot_sync(&self) -> Result<(), Error> {
        if self.is_disposed() || !self.is_logged_in() {
            return Ok(());
        }

        if self.0.sync_in_flight.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            self.0.sync_notify.notified().await;
            return Ok(());
        }

        let result = self.run_one_sync_pass().await;

        self.0.sync_in_flight.store(false, Ordering::Release);
        self.0.sync_notify.notify_waiters();

        if let Err(err) = &result {
            self.route_sync_failure(err).await;
        }

        result
    }

    /// Represents repeated [`Client::one_shot_sync`] passes as a stream, yielding once after each
    /// pass is applied.
    ///
    /// This is an alternative to [`Client::run_background_sync`] for callers who want to drive the
    /// sync loop from their own task rather than have this crate spawn one, e.g. to interleave it
    /// with other `select!` branches. The stream ends the first time this client is disposed.
    ///
    /// ```no_run
    /// # use futures_util::StreamExt as _;
    /// # async fn run(client: ruma_sdk::Client) -> Result<(), ruma_sdk::Error> {
    /// let mut passes = Box::pin(client.sync_stream());
    /// while let Some(result) = passes.next().await {
    ///     result?;
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn sync_stream(&self) -> impl futures_core::stream::Stream<Item = Result<(), Error>> + '_ {
        async_stream::try_stream! {
            while !self.is_disposed() {
                self.one_shot_sync().await?;
                yield ();
            }
        }
    }

    async fn run_one_sync_pass(&self) -> Result<(), Error> {
        let since = self.0.session.lock().unwrap().prev_batch.clone();
        let timeout_ms = since.as_ref().map(|_| SYNC_TIMEOUT_MS);
        let request = SyncRequest { filter: Some(self.0.sync_filters.clone()), since, timeout_ms };

        let response = self.0.api.sync(request).await?;

        self.handle_sync(&response).await?;

        if let Some(db) = &self.0.database {
            let before = now_ms().saturating_sub(FILE_CACHE_MAX_AGE_MS);
            if let Err(err) = db.delete_old_files(before).await {
                warn!(error = %err, "failed to prune stale cached files");
            }
        }

        self.refresh_device_keys().await?;

        {
            let mut encryption = self.0.encryption.lock().await;
            if encryption.enabled() {
                encryption.on_sync().await?;
            }
        }

        Ok(())
    }

    async fn route_sync_failure(&self, err: &Error) {
        if err.is_unknown_token() {
            let _ = self.clear().await;
            return;
        }

        match err {
            Error::Api(MatrixApiError::Protocol { .. }) => {
                self.0.broadcasts.on_error.send(SyncErrorEvent::from(err)).ok();
            }
            _ => {
                self.0.broadcasts.on_sync_error.send(SyncErrorEvent::from(err)).ok();
            }
        }
    }

    /// Applies an already-received sync response to the in-memory room store, current-state
    /// tables, timelines, device-key hints, and account data, dispatching every broadcast stream
    /// a consumer of this pass would expect.
    ///
    /// This is the engine's deterministic core: it never touches the network. Tests drive it
    /// directly with a hand-built [`SyncResponse`].
    #[instrument(skip(self, response), fields(next_batch = %response.next_batch))]
    pub async fn handle_sync(&self, response: &SyncResponse) -> Result<(), Error> {
        match &self.0.database {
            Some(db) => {
                let tx = db.begin_transaction().await?;
                let writer: &dyn DatabaseWrite = tx.as_ref();
                match self.handle_sync_inner(response, Some(writer)).await {
                    Ok(()) => {
                        tx.commit().await?;
                        Ok(())
                    }
                    Err(err) => {
                        tx.rollback().await?;
                        Err(err)
                    }
                }
            }
            None => self.handle_sync_inner(response, None).await,
        }
    }

    async fn handle_sync_inner(
        &self,
        response: &SyncResponse,
        writer: Option<&dyn DatabaseWrite>,
    ) -> Result<(), Error> {
        let client_id = self.0.session.lock().unwrap().client_id.clone();

        let prev_batch_changed =
            self.0.session.lock().unwrap().prev_batch.as_deref() != Some(response.next_batch.as_str());
        if prev_batch_changed {
            if let Some(writer) = writer {
                writer.store_prev_batch(&client_id, &response.next_batch).await?;
            }
        }

        for raw in &response.to_device {
            self.handle_to_device_event(raw).await;
        }

        for (room_id, update) in &response.joined_rooms {
            self.handle_joined_room(&client_id, room_id, update, writer).await?;
        }
        for (room_id, update) in &response.invited_rooms {
            self.handle_invited_room(&client_id, room_id, update, writer).await?;
        }
        for (room_id, update) in &response.left_rooms {
            self.handle_left_room(&client_id, room_id, update, writer).await?;
        }

        self.sort_rooms().await;

        for raw in &response.presence {
            self.0.broadcasts.on_presence.send(raw.clone()).ok();
        }

        for raw in &response.account_data {
            self.apply_global_account_data(&client_id, raw, writer).await?;
        }

        {
            let mut tracker = self.0.device_keys.lock().await;
            for user_id in &response.device_lists.changed {
                tracker.mark_outdated(user_id);
            }
            for user_id in &response.device_lists.left {
                tracker.stop_tracking(user_id);
            }
        }

        {
            let mut encryption = self.0.encryption.lock().await;
            encryption.handle_device_one_time_keys_count(&response.device_one_time_keys_count).await;
        }

        self.0.session.lock().unwrap().prev_batch = Some(response.next_batch.clone());

        if !self.0.first_sync_done.swap(true, Ordering::AcqRel) {
            self.sort_rooms().await;
            self.0.broadcasts.on_first_sync.send(()).ok();
        }

        self.0.broadcasts.on_sync.send(response.clone()).ok();

        Ok(())
    }

    async fn handle_to_device_event(&self, raw: &RawEvent) {
        let mut event = raw.clone();

        if raw.event_type == "m.room.encrypted" {
            let mut encryption = self.0.encryption.lock().await;
            if encryption.enabled() {
                match encryption.decrypt_to_device_event(raw).await {
                    Ok(decrypted) => {
                        event.event_type = decrypted.event_type;
                        event.content = decrypted.content.as_object().cloned().unwrap_or_default();
                    }
                    Err(err) => {
                        drop(encryption);
                        self.0
                            .broadcasts
                            .on_olm_error
                            .send(OlmErrorEvent { message: err.to_string(), event: raw.clone() })
                            .ok();
                        self.0.encryption.lock().await.handle_to_device_event(raw).await;
                        self.0.broadcasts.on_to_device_event.send(raw.clone()).ok();
                        return;
                    }
                }
            }
        }

        self.0.encryption.lock().await.handle_to_device_event(&event).await;
        self.0.broadcasts.on_to_device_event.send(event).ok();
    }

    async fn upsert_room(&self, room_id: &str, membership: Membership, update: RoomUpdate) {
        {
            let mut rooms = self.0.rooms.lock().await;
            if !rooms.contains(room_id) {
                let room = Room::new(room_id, membership, now_ms());
                match membership {
                    Membership::Invite => rooms.insert_front(room),
                    _ => rooms.insert_back(room),
                }
            }
            if let Some(room) = rooms.get_mut(room_id) {
                room.membership = membership;
                room.prev_batch = update.prev_batch.clone();
                room.highlight_count = update.highlight_count;
                room.notification_count = update.notification_count;
                if let Some(summary) = &update.summary {
                    room.summary = summary.clone();
                }
            }
        }
        self.0.broadcasts.on_room_update.send(update).ok();
    }

    async fn is_direct_room(&self, room_id: &str) -> bool {
        let account_data = self.0.account_data.lock().await;
        let Some(direct) = account_data.get("m.direct").and_then(JsonValue::as_object) else {
            return false;
        };
        direct.values().any(|rooms| {
            rooms.as_array().is_some_and(|list| list.iter().any(|r| r.as_str() == Some(room_id)))
        })
    }

    async fn handle_joined_room(
        &self,
        client_id: &str,
        room_id: &str,
        update: &JoinedRoomUpdate,
        writer: Option<&dyn DatabaseWrite>,
    ) -> Result<(), Error> {
        let room_update = RoomUpdate {
            room_id: room_id.to_owned(),
            membership: Membership::Join,
            prev_batch: update.prev_batch.clone(),
            highlight_count: update.highlight_count,
            notification_count: update.notification_count,
            summary: update.summary.as_ref().map(convert_room_summary),
        };

        if let Some(writer) = writer {
            writer.store_room_update(client_id, &room_update).await?;
        }

        self.upsert_room(room_id, Membership::Join, room_update).await;

        if update.limited_timeline {
            let mut rooms = self.0.rooms.lock().await;
            if let Some(room) = rooms.get_mut(room_id) {
                room.reset_sort_order();
            }
        }

        let is_direct = self.is_direct_room(room_id).await;

        for raw in &update.state {
            self.handle_room_event(client_id, room_id, raw.clone(), EventUpdateKind::State, false, is_direct, writer)
                .await?;
        }
        for raw in &update.timeline {
            self.handle_room_event(
                client_id,
                room_id,
                raw.clone(),
                EventUpdateKind::Timeline,
                false,
                is_direct,
                writer,
            )
            .await?;
        }
        for raw in &update.history {
            self.handle_room_event(client_id, room_id, raw.clone(), EventUpdateKind::History, true, is_direct, writer)
                .await?;
        }
        for raw in &update.ephemeral {
            self.handle_room_event(
                client_id,
                room_id,
                raw.clone(),
                EventUpdateKind::Ephemeral,
                false,
                is_direct,
                writer,
            )
            .await?;
        }
        for raw in &update.account_data {
            self.handle_room_event(
                client_id,
                room_id,
                raw.clone(),
                EventUpdateKind::AccountData,
                false,
                is_direct,
                writer,
            )
            .await?;
        }

        Ok(())
    }

    async fn handle_invited_room(
        &self,
        client_id: &str,
        room_id: &str,
        update: &InvitedRoomUpdate,
        writer: Option<&dyn DatabaseWrite>,
    ) -> Result<(), Error> {
        let room_update = RoomUpdate {
            room_id: room_id.to_owned(),
            membership: Membership::Invite,
            prev_batch: None,
            highlight_count: 0,
            notification_count: 0,
            summary: None,
        };

        if let Some(writer) = writer {
            writer.store_room_update(client_id, &room_update).await?;
        }

        self.upsert_room(room_id, Membership::Invite, room_update).await;

        for raw in &update.invite_state {
            self.handle_room_event(
                client_id,
                room_id,
                raw.clone(),
                EventUpdateKind::InviteState,
                false,
                false,
                writer,
            )
            .await?;
        }

        Ok(())
    }

    async fn handle_left_room(
        &self,
        client_id: &str,
        room_id: &str,
        update: &LeftRoomUpdate,
        writer: Option<&dyn DatabaseWrite>,
    ) -> Result<(), Error> {
        let room_update = RoomUpdate {
            room_id: room_id.to_owned(),
            membership: Membership::Leave,
            prev_batch: update.prev_batch.clone(),
            highlight_count: 0,
            notification_count: 0,
            summary: None,
        };

        if let Some(writer) = writer {
            writer.store_room_update(client_id, &room_update).await?;
        }

        self.upsert_room(room_id, Membership::Leave, room_update).await;

        let is_direct = self.is_direct_room(room_id).await;

        for raw in &update.timeline {
            self.handle_room_event(
                client_id,
                room_id,
                raw.clone(),
                EventUpdateKind::Timeline,
                false,
                is_direct,
                writer,
            )
            .await?;
        }
        for raw in &update.account_data {
            self.handle_room_event(
                client_id,
                room_id,
                raw.clone(),
                EventUpdateKind::AccountData,
                false,
                is_direct,
                writer,
            )
            .await?;
        }
        for raw in &update.state {
            self.handle_room_event(client_id, room_id, raw.clone(), EventUpdateKind::State, false, is_direct, writer)
                .await?;
        }

        self.0.rooms.lock().await.remove(room_id);

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_room_event(
        &self,
        client_id: &str,
        room_id: &str,
        mut raw: RawEvent,
        kind: EventUpdateKind,
        backfilling: bool,
        is_direct: bool,
        writer: Option<&dyn DatabaseWrite>,
    ) -> Result<(), Error> {
        if raw.event_type == "m.room.encryption" {
            let rooms = self.0.rooms.lock().await;
            if let Some(current) = rooms.get(room_id).and_then(Room::encryption_algorithm) {
                let incoming = raw.content.get("algorithm").and_then(JsonValue::as_str);
                if incoming != Some(current) {
                    warn!(room_id, current, ?incoming, "dropping m.room.encryption downgrade attempt");
                    return Ok(());
                }
            }
        }

        if raw.event_type == "m.room.encrypted" && !matches!(kind, EventUpdateKind::Ephemeral) {
            let mut encryption = self.0.encryption.lock().await;
            if encryption.enabled() {
                match encryption.decrypt_room_event(&raw).await {
                    Ok(decrypted) => {
                        raw.event_type = decrypted.event_type;
                        raw.content = decrypted.content.as_object().cloned().unwrap_or_default();
                    }
                    Err(err) => {
                        warn!(room_id, event_id = ?raw.event_id, error = %err, "failed to decrypt room event");
                    }
                }
            }
        }

        if raw.event_type == "m.room.message" && !is_direct {
            let sender_known = {
                let rooms = self.0.rooms.lock().await;
                rooms.get(room_id).is_some_and(|room| {
                    raw.sender.as_deref().is_some_and(|sender| room.get_state("m.room.member", sender).is_some())
                })
            };
            if !sender_known {
                if let (Some(db), Some(sender)) = (&self.0.database, raw.sender.as_deref()) {
                    if let Ok(Some(member)) = db.get_user(client_id, sender, room_id).await {
                        if let Some(room) = self.0.rooms.lock().await.get_mut(room_id) {
                            room.set_state(member);
                        }
                    }
                }
            }
        }

        let is_ephemeral = matches!(kind, EventUpdateKind::Ephemeral);

        if is_ephemeral && raw.event_type == "m.receipt" {
            self.reconcile_receipts(client_id, room_id, &raw, writer).await?;
        }

        let sort_order = if is_ephemeral {
            0.0
        } else {
            let mut rooms = self.0.rooms.lock().await;
            let Some(room) = rooms.get_mut(room_id) else { return Ok(()) };
            if backfilling {
                room.next_old_sort_order()
            } else {
                room.next_new_sort_order()
            }
        };

        let status = match kind {
            EventUpdateKind::State | EventUpdateKind::InviteState => EventStatus::RoomState,
            _ => EventStatus::Timeline,
        };
        let event = Event::from_raw(raw.clone(), room_id, sort_order, status);

        if event.event_type == "m.room.redaction" {
            if let Some(redacts) = event.content.get("redacts").and_then(JsonValue::as_str) {
                let mut rooms = self.0.rooms.lock().await;
                if let Some(room) = rooms.get_mut(room_id) {
                    room.apply_state_redaction(redacts, &event);
                    room.timeline.apply_redaction(redacts, &event);
                }
            }
        } else if event.state_key.is_some() {
            let mut rooms = self.0.rooms.lock().await;
            if let Some(room) = rooms.get_mut(room_id) {
                room.set_state(event.clone());
            }
        }

        match kind {
            EventUpdateKind::Timeline | EventUpdateKind::History => {
                let mut rooms = self.0.rooms.lock().await;
                if let Some(room) = rooms.get_mut(room_id) {
                    room.timeline.push(event.clone());
                }
            }
            EventUpdateKind::AccountData => {
                let mut rooms = self.0.rooms.lock().await;
                if let Some(room) = rooms.get_mut(room_id) {
                    room.room_account_data.insert(event.event_type.clone(), event.clone());
                }
            }
            EventUpdateKind::Ephemeral => {
                let mut rooms = self.0.rooms.lock().await;
                if let Some(room) = rooms.get_mut(room_id) {
                    room.ephemerals.insert(event.event_type.clone(), event.clone());
                }
            }
            _ => {}
        }

        let update = EventUpdate { room_id: Some(room_id.to_owned()), kind, content: raw };

        if !is_ephemeral {
            if let Some(writer) = writer {
                writer.store_event_update(client_id, &update).await?;
            }
        }

        self.0.encryption.lock().await.handle_event_update(&update).await;

        if matches!(kind, EventUpdateKind::Timeline) && self.0.first_sync_done.load(Ordering::Acquire) {
            match event.event_type.as_str() {
                "m.call.invite" => {
                    self.0.broadcasts.on_call_invite.send(update.content.clone()).ok();
                }
                "m.call.hangup" => {
                    self.0.broadcasts.on_call_hangup.send(update.content.clone()).ok();
                }
                "m.call.answer" => {
                    self.0.broadcasts.on_call_answer.send(update.content.clone()).ok();
                }
                "m.call.candidates" => {
                    self.0.broadcasts.on_call_candidates.send(update.content.clone()).ok();
                }
                _ => {}
            }
        }

        self.0.broadcasts.on_event.send(update).ok();

        Ok(())
    }

    /// Folds an ephemeral `m.receipt` delta (`{event_id: {"m.read": {user_id: {...}}}}`) into the
    /// flat, user-keyed form this engine treats as authoritative, stores it as synthesized
    /// room-account-data under the same event type, and broadcasts the result.
    async fn reconcile_receipts(
        &self,
        client_id: &str,
        room_id: &str,
        raw: &RawEvent,
        writer: Option<&dyn DatabaseWrite>,
    ) -> Result<(), Error> {
        let mut rooms = self.0.rooms.lock().await;
        let Some(room) = rooms.get_mut(room_id) else { return Ok(()) };

        let mut flat = room.room_account_data.get("m.receipt").map(|e| e.content.clone()).unwrap_or_default();

        for (event_id, per_type) in &raw.content {
            let Some(read_users) = per_type.get("m.read").and_then(JsonValue::as_object) else { continue };
            for (user_id, receipt) in read_users {
                let ts = receipt.get("ts").cloned().unwrap_or(JsonValue::Null);
                flat.insert(user_id.clone(), serde_json::json!({ "event_id": event_id, "ts": ts }));
            }
        }

        let content = JsonValue::Object(flat.clone());
        let synthetic_raw = RawEvent {
            event_type: "m.receipt".to_owned(),
            content: flat,
            room_id: Some(room_id.to_owned()),
            ..Default::default()
        };
        let synthetic = Event::from_raw(synthetic_raw.clone(), room_id, 0.0, EventStatus::Timeline);
        room.room_account_data.insert("m.receipt".to_owned(), synthetic);
        drop(rooms);

        if let Some(writer) = writer {
            let update =
                EventUpdate { room_id: Some(room_id.to_owned()), kind: EventUpdateKind::AccountData, content: synthetic_raw };
            writer.store_event_update(client_id, &update).await?;
        }

        self.0
            .broadcasts
            .on_account_data
            .send(AccountDataUpdate { room_id: Some(room_id.to_owned()), event_type: "m.receipt".to_owned(), content })
            .ok();

        Ok(())
    }

    async fn apply_global_account_data(
        &self,
        client_id: &str,
        raw: &RawEvent,
        writer: Option<&dyn DatabaseWrite>,
    ) -> Result<(), Error> {
        let content = JsonValue::Object(raw.content.clone());
        self.0.account_data.lock().await.insert(raw.event_type.clone(), content.clone());

        if let Some(writer) = writer {
            writer.store_account_data(client_id, &raw.event_type, content.clone()).await?;
        }

        self.0
            .broadcasts
            .on_account_data
            .send(AccountDataUpdate { room_id: None, event_type: raw.event_type.clone(), content })
            .ok();

        Ok(())
    }

    /// Refreshes device keys for every user visible in an encrypted room plus the local user,
    /// batching the query and the resulting database writes under one transaction.
    async fn refresh_device_keys(&self) -> Result<(), Error> {
        let Some(own_user_id) = self.0.session.lock().unwrap().user_id.clone() else {
            return Ok(());
        };

        let tracked = self.tracked_device_key_users(&own_user_id).await;
        let own_fingerprint = self.0.encryption.lock().await.fingerprint_key();

        let mut tracker = self.0.device_keys.lock().await;
        match &self.0.database {
            Some(db) => {
                let tx = db.begin_transaction().await?;
                let writer: &dyn DatabaseWrite = tx.as_ref();
                let result = tracker
                    .update(self.0.api.as_ref(), Some(writer), &tracked, &own_user_id, own_fingerprint.as_deref(), Instant::now())
                    .await;
                match result {
                    Ok(()) => tx.commit().await?,
                    Err(err) => {
                        tx.rollback().await?;
                        return Err(err);
                    }
                }
            }
            None => {
                tracker
                    .update(self.0.api.as_ref(), None, &tracked, &own_user_id, own_fingerprint.as_deref(), Instant::now())
                    .await?;
            }
        }

        Ok(())
    }

    async fn tracked_device_key_users(&self, own_user_id: &OwnedUserId) -> HashSet<OwnedUserId> {
        let rooms = self.0.rooms.lock().await;
        let mut tracked = HashSet::new();
        tracked.insert(own_user_id.clone());

        for room in rooms.iter_ordered() {
            if room.encryption_algorithm().is_none() {
                continue;
            }
            for state in room.iter_states() {
                if state.event_type != "m.room.member" {
                    continue;
                }
                let membership = state.content.get("membership").and_then(JsonValue::as_str);
                if !matches!(membership, Some("join") | Some("invite")) {
                    continue;
                }
                let Some(state_key) = &state.state_key else { continue };
                if let Ok(user_id) = crate::identifiers::parse_user_id(state_key) {
                    tracked.insert(user_id);
                }
            }
        }

        tracked
    }
}

fn convert_room_summary(summary: &RoomSummaryUpdate) -> RoomSummary {
    RoomSummary {
        heroes: summary.heroes.clone(),
        joined_member_count: summary.joined_member_count,
        invited_member_count: summary.invited_member_count,
    }
}
