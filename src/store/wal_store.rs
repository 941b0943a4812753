use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::{Wal, encode_record};

use super::{BookingRepository, StatusChange, StoreError, VenueLookup, VenueState};

pub type SharedVenueState = Arc<RwLock<VenueState>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Commit the whole batch with a single fsync.
/// 4. Answer each sender with its own event's outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let results = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, results);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

/// Encode every event, then commit the encodable ones as a single fsynced
/// unit. Each sender gets its own event's outcome; an event that fails to
/// encode is left out, and a failed commit leaves none of the batch on disk.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> Vec<io::Result<()>> {
    let mut results = Vec::with_capacity(batch.len());
    let mut records = Vec::with_capacity(batch.len());
    for (event, _) in batch {
        match encode_record(event) {
            Ok(record) => {
                records.push(record);
                results.push(Ok(()));
            }
            Err(e) => {
                tracing::error!("WAL encode failed for venue {}: {e}", event.venue_id());
                results.push(Err(e));
            }
        }
    }

    if records.is_empty() {
        return results;
    }
    if let Err(e) = wal.commit_records(&records) {
        tracing::error!("WAL flush failed: {e}");
        for result in results.iter_mut().filter(|r| r.is_ok()) {
            *result = Err(io::Error::new(e.kind(), e.to_string()));
        }
    }
    results
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, results: Vec<io::Result<()>>) {
    for ((_, tx), result) in batch.into_iter().zip(results) {
        let _ = tx.send(result);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let batch = vec![(event, response)];
            let results = flush_batch(wal, &batch);
            respond_batch(batch, results);
        }
    }
}

/// Apply an event to a venue's state (no locking; caller holds the lock).
fn apply_to_venue(vs: &mut VenueState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::VenuePut { .. } => {
            if let Some(venue) = venue_from_event(event) {
                vs.venue = venue;
            }
        }
        Event::BookingCreated {
            id,
            venue_id,
            customer_id,
            span,
            total_amount,
            notes,
            created_at,
        } => {
            vs.insert_booking(Booking {
                id: *id,
                venue_id: *venue_id,
                customer_id: *customer_id,
                span: *span,
                status: BookingStatus::Pending,
                total_amount: *total_amount,
                notes: notes.clone(),
                payment: None,
                created_at: *created_at,
                updated_at: *created_at,
            });
            booking_index.insert(*id, *venue_id);
        }
        Event::BookingStatusChanged { id, to, at, payment, .. } => {
            if let Some(booking) = vs.booking_mut(id) {
                booking.status = *to;
                booking.updated_at = *at;
                if payment.is_some() {
                    booking.payment = payment.clone();
                }
            }
        }
    }
}

fn venue_from_event(event: &Event) -> Option<Venue> {
    match event {
        Event::VenuePut {
            id,
            owner_id,
            hourly_rate,
            hours,
            active,
        } => Some(Venue {
            id: *id,
            owner_id: *owner_id,
            hourly_rate: *hourly_rate,
            hours: *hours,
            active: *active,
        }),
        _ => None,
    }
}

fn venue_put(venue: &Venue) -> Event {
    Event::VenuePut {
        id: venue.id,
        owner_id: venue.owner_id,
        hourly_rate: venue.hourly_rate,
        hours: venue.hours,
        active: venue.active,
    }
}

/// Durable booking store: per-venue state in memory behind async RwLocks,
/// every mutation appended to the WAL before it becomes visible.
///
/// All writes to a venue happen under that venue's write lock, so the
/// overlap re-check in `insert` and the status check in `update_status`
/// cannot interleave with another writer.
pub struct WalStore {
    venues: DashMap<Ulid, SharedVenueState>,
    /// Reverse lookup: booking id → venue id
    booking_to_venue: DashMap<Ulid, Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
    notify: Arc<NotifyHub>,
    /// Serializes venue registration with compaction snapshots.
    admin: Mutex<()>,
}

impl WalStore {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            venues: DashMap::new(),
            booking_to_venue: DashMap::new(),
            wal_tx,
            notify,
            admin: Mutex::new(()),
        };

        // We're the sole owner of these Arcs during replay, so try_write never
        // contends. Never block here: this may run inside an async context.
        for event in &events {
            store.replay_event(event);
        }
        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            venues = store.venues.len(),
            bookings = store.booking_to_venue.len(),
            "WAL replayed"
        );

        Ok(store)
    }

    fn replay_event(&self, event: &Event) {
        let venue_id = event.venue_id();
        if !self.venues.contains_key(&venue_id) {
            match venue_from_event(event) {
                Some(venue) => {
                    self.venues.insert(venue_id, Arc::new(RwLock::new(VenueState::new(venue))));
                }
                None => tracing::warn!("replay: event for unknown venue {venue_id} skipped"),
            }
            return;
        }
        let Some(state) = self.state(&venue_id) else {
            return;
        };
        match state.try_write() {
            Ok(mut guard) => apply_to_venue(&mut guard, event, &self.booking_to_venue),
            Err(_) => tracing::warn!("replay: venue {venue_id} unexpectedly locked"),
        };
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// WAL-append + apply + notify in one call.
    async fn persist_and_apply(&self, vs: &mut VenueState, event: &Event) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_venue(vs, event, &self.booking_to_venue);
        self.notify.send(event);
        Ok(())
    }

    fn state(&self, venue_id: &Ulid) -> Option<SharedVenueState> {
        self.venues.get(venue_id).map(|e| e.value().clone())
    }

    /// Lookup booking → venue, acquire the venue's write lock.
    async fn write_venue_of(&self, booking_id: &Ulid) -> Result<OwnedRwLockWriteGuard<VenueState>, StoreError> {
        let venue_id = self
            .booking_to_venue
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(*booking_id))?;
        let state = self.state(&venue_id).ok_or(StoreError::NotFound(venue_id))?;
        Ok(state.write_owned().await)
    }

    pub fn venue_count(&self) -> usize {
        self.venues.len()
    }

    /// Register a venue or replace its record. Existing bookings are kept
    /// and keep the price they were created with.
    pub async fn put_venue(&self, venue: Venue) -> Result<(), StoreError> {
        let _admin = self.admin.lock().await;
        let event = venue_put(&venue);

        if let Some(state) = self.state(&venue.id) {
            let mut guard = state.write().await;
            return self.persist_and_apply(&mut guard, &event).await;
        }

        if self.venues.len() >= MAX_VENUES {
            return Err(StoreError::LimitExceeded("too many venues"));
        }
        self.wal_append(&event).await?;
        self.venues.insert(venue.id, Arc::new(RwLock::new(VenueState::new(venue))));
        self.notify.send(&event);
        Ok(())
    }

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state. Holds every venue's read lock for the duration so no commit
    /// can slip between the snapshot and the file swap.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _admin = self.admin.lock().await;
        let states: Vec<SharedVenueState> = self.venues.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(states.len());
        for state in states {
            guards.push(state.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(venue_put(&guard.venue));
            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    venue_id: b.venue_id,
                    customer_id: b.customer_id,
                    span: b.span,
                    total_amount: b.total_amount,
                    notes: b.notes.clone(),
                    created_at: b.created_at,
                });
                if b.status != BookingStatus::Pending {
                    events.push(Event::BookingStatusChanged {
                        id: b.id,
                        venue_id: b.venue_id,
                        from: BookingStatus::Pending,
                        to: b.status,
                        at: b.updated_at,
                        payment: b.payment.clone(),
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    fn snapshot_states(&self, venue_id: Option<Ulid>) -> Vec<SharedVenueState> {
        match venue_id {
            Some(id) => self.state(&id).into_iter().collect(),
            None => self.venues.iter().map(|e| e.value().clone()).collect(),
        }
    }
}

#[async_trait]
impl BookingRepository for WalStore {
    async fn find_active_overlapping(&self, venue_id: Ulid, span: Span) -> Result<Option<Booking>, StoreError> {
        let state = self.state(&venue_id).ok_or(StoreError::NotFound(venue_id))?;
        let guard = state.read().await;
        Ok(guard.first_active_overlapping(&span).cloned())
    }

    async fn insert(&self, booking: Booking) -> Result<Booking, StoreError> {
        let state = self
            .state(&booking.venue_id)
            .ok_or(StoreError::NotFound(booking.venue_id))?;
        let mut guard = state.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_VENUE {
            return Err(StoreError::LimitExceeded("too many bookings on venue"));
        }
        if self.booking_to_venue.contains_key(&booking.id) {
            return Err(StoreError::AlreadyExists(booking.id));
        }
        if let Some(existing) = guard.first_active_overlapping(&booking.span) {
            return Err(StoreError::Conflict(existing.id));
        }

        let event = Event::BookingCreated {
            id: booking.id,
            venue_id: booking.venue_id,
            customer_id: booking.customer_id,
            span: booking.span,
            total_amount: booking.total_amount,
            notes: booking.notes,
            created_at: booking.created_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .booking(&booking.id)
            .cloned()
            .ok_or(StoreError::NotFound(booking.id))
    }

    async fn update_status(&self, id: Ulid, change: StatusChange) -> Result<Booking, StoreError> {
        let mut guard = self.write_venue_of(&id).await?;
        let (actual, venue_id) = guard
            .booking(&id)
            .map(|b| (b.status, b.venue_id))
            .ok_or(StoreError::NotFound(id))?;
        if actual != change.expected {
            return Err(StoreError::StatusChanged { id, actual });
        }

        let event = Event::BookingStatusChanged {
            id,
            venue_id,
            from: change.expected,
            to: change.new,
            at: change.at,
            payment: change.payment,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.booking(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn find_by_id(&self, id: Ulid) -> Result<Booking, StoreError> {
        let venue_id = self
            .booking_to_venue
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(id))?;
        let state = self.state(&venue_id).ok_or(StoreError::NotFound(venue_id))?;
        let guard = state.read().await;
        guard.booking(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, filter: &BookingFilter) -> Result<Page<Booking>, StoreError> {
        let mut matched = Vec::new();
        for state in self.snapshot_states(filter.venue_id) {
            let guard = state.read().await;
            matched.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
        }

        match filter.order {
            ListOrder::CreatedDesc => {
                matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)))
            }
            ListOrder::StartDesc => {
                matched.sort_by(|a, b| b.span.start.cmp(&a.span.start).then_with(|| b.id.cmp(&a.id)))
            }
        }

        let total = matched.len();
        let skip = (filter.page.saturating_sub(1) as usize).saturating_mul(filter.page_size as usize);
        let items = matched
            .into_iter()
            .skip(skip)
            .take(filter.page_size as usize)
            .collect();
        Ok(Page {
            items,
            total,
            page: filter.page,
            page_size: filter.page_size,
        })
    }

    async fn active_spans(&self, venue_id: Ulid, window: Span) -> Result<Vec<Span>, StoreError> {
        let state = self.state(&venue_id).ok_or(StoreError::NotFound(venue_id))?;
        let guard = state.read().await;
        Ok(guard
            .overlapping(&window)
            .filter(|b| b.status.is_active())
            .map(|b| b.span)
            .collect())
    }

    async fn pending_created_before(&self, cutoff: Ms) -> Result<Vec<Booking>, StoreError> {
        let mut stale = Vec::new();
        for state in self.snapshot_states(None) {
            let guard = state.read().await;
            stale.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.status == BookingStatus::Pending && b.created_at < cutoff)
                    .cloned(),
            );
        }
        Ok(stale)
    }
}

#[async_trait]
impl VenueLookup for WalStore {
    async fn get_venue(&self, id: Ulid) -> Result<Venue, StoreError> {
        let state = self.state(&id).ok_or(StoreError::NotFound(id))?;
        let guard = state.read().await;
        Ok(guard.venue.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("courtbook_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn venue() -> Venue {
        Venue {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            hourly_rate: Money::from_major(200_000),
            hours: None,
            active: true,
        }
    }

    fn pending(venue_id: Ulid, start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            venue_id,
            customer_id: Ulid::new(),
            span: Span::new(start, end),
            status: BookingStatus::Pending,
            total_amount: Money::from_major(1),
            notes: None,
            payment: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    async fn store_with_venue(name: &str) -> (WalStore, Venue, PathBuf) {
        let path = test_wal_path(name);
        let store = WalStore::open(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        let v = venue();
        store.put_venue(v.clone()).await.unwrap();
        (store, v, path)
    }

    #[test]
    fn flush_batch_answers_each_sender() {
        let path = test_wal_path("flush_batch.wal");
        let mut wal = Wal::open(&path).unwrap();
        let v = venue();
        let events = vec![
            venue_put(&v),
            Event::BookingStatusChanged {
                id: Ulid::new(),
                venue_id: v.id,
                from: BookingStatus::Pending,
                to: BookingStatus::Confirmed,
                at: 1,
                payment: None,
            },
        ];
        let mut receivers = Vec::new();
        let batch: Vec<_> = events
            .iter()
            .map(|e| {
                let (tx, rx) = oneshot::channel();
                receivers.push(rx);
                (e.clone(), tx)
            })
            .collect();

        let results = flush_batch(&mut wal, &batch);
        assert!(results.iter().all(|r| r.is_ok()));
        respond_batch(batch, results);
        for mut rx in receivers {
            assert!(rx.try_recv().unwrap().is_ok());
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[tokio::test]
    async fn insert_rejects_overlap_at_commit() {
        let (store, v, _) = store_with_venue("insert_overlap.wal").await;
        let first = store.insert(pending(v.id, 9 * H, 11 * H)).await.unwrap();

        let result = store.insert(pending(v.id, 10 * H, 12 * H)).await;
        assert_eq!(result, Err(StoreError::Conflict(first.id)));

        // Touching boundary is fine
        store.insert(pending(v.id, 11 * H, 12 * H)).await.unwrap();
    }

    #[tokio::test]
    async fn insert_unknown_venue_fails() {
        let (store, _, _) = store_with_venue("insert_unknown.wal").await;
        let missing = Ulid::new();
        let result = store.insert(pending(missing, H, 2 * H)).await;
        assert_eq!(result, Err(StoreError::NotFound(missing)));
    }

    #[tokio::test]
    async fn insert_duplicate_id_fails() {
        let (store, v, _) = store_with_venue("insert_dup.wal").await;
        let b = pending(v.id, H, 2 * H);
        let mut again = b.clone();
        again.span = Span::new(5 * H, 6 * H);
        store.insert(b).await.unwrap();
        assert_eq!(store.insert(again.clone()).await, Err(StoreError::AlreadyExists(again.id)));
    }

    #[tokio::test]
    async fn update_status_is_compare_and_swap() {
        let (store, v, _) = store_with_venue("cas.wal").await;
        let b = store.insert(pending(v.id, H, 2 * H)).await.unwrap();

        let confirm = StatusChange {
            expected: BookingStatus::Pending,
            new: BookingStatus::Confirmed,
            at: 77,
            payment: Some(PaymentRef {
                method: "card".into(),
                transaction_id: "tx-1".into(),
            }),
        };
        let confirmed = store.update_status(b.id, confirm.clone()).await.unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.updated_at, 77);
        assert_eq!(confirmed.payment.as_ref().unwrap().transaction_id, "tx-1");

        let again = store.update_status(b.id, confirm).await;
        assert_eq!(
            again,
            Err(StoreError::StatusChanged {
                id: b.id,
                actual: BookingStatus::Confirmed
            })
        );
    }

    #[tokio::test]
    async fn update_status_unknown_booking() {
        let (store, _, _) = store_with_venue("cas_unknown.wal").await;
        let id = Ulid::new();
        let change = StatusChange {
            expected: BookingStatus::Pending,
            new: BookingStatus::Cancelled,
            at: 0,
            payment: None,
        };
        assert_eq!(store.update_status(id, change).await, Err(StoreError::NotFound(id)));
    }

    #[tokio::test]
    async fn cancelled_booking_frees_slot() {
        let (store, v, _) = store_with_venue("cancel_frees.wal").await;
        let b = store.insert(pending(v.id, H, 3 * H)).await.unwrap();
        store
            .update_status(
                b.id,
                StatusChange {
                    expected: BookingStatus::Pending,
                    new: BookingStatus::Cancelled,
                    at: 1,
                    payment: None,
                },
            )
            .await
            .unwrap();

        assert!(store.find_active_overlapping(v.id, Span::new(H, 3 * H)).await.unwrap().is_none());
        store.insert(pending(v.id, 2 * H, 3 * H)).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_inserts_admit_exactly_one() {
        let (store, v, _) = store_with_venue("concurrent_insert.wal").await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let venue_id = v.id;
            handles.push(tokio::spawn(async move {
                // Every window overlaps [10h, 11h)
                store.insert(pending(venue_id, 9 * H + i * 60_000, 11 * H)).await
            }));
        }

        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::Conflict(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn replay_restores_bookings_and_statuses() {
        let path = test_wal_path("replay_restore.wal");
        let v = venue();
        let (kept, cancelled) = {
            let store = WalStore::open(path.clone(), Arc::new(NotifyHub::new())).unwrap();
            store.put_venue(v.clone()).await.unwrap();
            let kept = store.insert(pending(v.id, H, 2 * H)).await.unwrap();
            let cancelled = store.insert(pending(v.id, 3 * H, 4 * H)).await.unwrap();
            store
                .update_status(
                    cancelled.id,
                    StatusChange {
                        expected: BookingStatus::Pending,
                        new: BookingStatus::Cancelled,
                        at: 5,
                        payment: None,
                    },
                )
                .await
                .unwrap();
            (kept, cancelled)
        };

        let store = WalStore::open(path, Arc::new(NotifyHub::new())).unwrap();
        assert_eq!(store.get_venue(v.id).await.unwrap(), v);
        assert_eq!(store.find_by_id(kept.id).await.unwrap(), kept);
        let restored = store.find_by_id(cancelled.id).await.unwrap();
        assert_eq!(restored.status, BookingStatus::Cancelled);
        assert_eq!(restored.updated_at, 5);
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compact_state.wal");
        let v = venue();
        let (confirmed_id, pending_id) = {
            let store = WalStore::open(path.clone(), Arc::new(NotifyHub::new())).unwrap();
            store.put_venue(v.clone()).await.unwrap();
            // Churn the venue record
            for _ in 0..10 {
                store.put_venue(v.clone()).await.unwrap();
            }
            let a = store.insert(pending(v.id, H, 2 * H)).await.unwrap();
            let b = store.insert(pending(v.id, 2 * H, 3 * H)).await.unwrap();
            store
                .update_status(
                    a.id,
                    StatusChange {
                        expected: BookingStatus::Pending,
                        new: BookingStatus::Confirmed,
                        at: 9,
                        payment: Some(PaymentRef {
                            method: "cash".into(),
                            transaction_id: "r-9".into(),
                        }),
                    },
                )
                .await
                .unwrap();
            assert!(store.wal_appends_since_compact().await >= 14);
            store.compact().await.unwrap();
            assert_eq!(store.wal_appends_since_compact().await, 0);
            (a.id, b.id)
        };

        let store = WalStore::open(path, Arc::new(NotifyHub::new())).unwrap();
        let a = store.find_by_id(confirmed_id).await.unwrap();
        assert_eq!(a.status, BookingStatus::Confirmed);
        assert_eq!(a.payment.unwrap().transaction_id, "r-9");
        assert_eq!(store.find_by_id(pending_id).await.unwrap().status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn list_filters_sorts_and_paginates() {
        let (store, v, _) = store_with_venue("list.wal").await;
        let customer = Ulid::new();
        for i in 0..5 {
            let mut b = pending(v.id, i * 2 * H, i * 2 * H + H);
            b.customer_id = customer;
            b.created_at = i;
            store.insert(b).await.unwrap();
        }
        store.insert(pending(v.id, 20 * H, 21 * H)).await.unwrap();

        let filter = BookingFilter {
            customer_id: Some(customer),
            page: 1,
            page_size: 2,
            ..BookingFilter::default()
        };
        let page = store.list(&filter).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].created_at, 4);
        assert_eq!(page.items[1].created_at, 3);

        let last = store.list(&BookingFilter { page: 3, ..filter }).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].created_at, 0);
    }

    #[tokio::test]
    async fn commits_are_broadcast() {
        let path = test_wal_path("broadcast.wal");
        let notify = Arc::new(NotifyHub::new());
        let store = WalStore::open(path, notify.clone()).unwrap();
        let v = venue();
        let mut rx = notify.subscribe(v.id);
        store.put_venue(v.clone()).await.unwrap();
        let b = store.insert(pending(v.id, H, 2 * H)).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), Event::VenuePut { .. }));
        match rx.recv().await.unwrap() {
            Event::BookingCreated { id, .. } => assert_eq!(id, b.id),
            other => panic!("expected BookingCreated, got {other:?}"),
        }
    }
}
