use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{STORE_FLUSH_BATCH_SIZE, STORE_FLUSH_DURATION_SECONDS};

use super::{BookingStore, NewBooking, StoreError, Wal};

/// Confirmed bookings of one resource, sorted by `span.start`.
type SharedBookings = Arc<RwLock<Vec<Booking>>>;

struct AppendRequest {
    event: Event,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the log and batches appends for group commit.
/// 1. Block until the first append arrives.
/// 2. Drain all immediately available appends (the batch window).
/// 3. Single flush_sync for the whole batch.
/// 4. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<AppendRequest>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(STORE_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(STORE_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!(path = %wal.path().display(), "booking log flush failed: {e}");
        }
        respond_batch(batch, &result);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[AppendRequest]) -> io::Result<()> {
    for req in batch {
        if let Err(e) = wal.append_buffered(&req.event) {
            // Nothing of this batch has been written yet.
            wal.discard_pending();
            return Err(e);
        }
    }
    wal.flush_sync()
}

fn respond_batch(batch: Vec<AppendRequest>, result: &io::Result<()>) {
    for req in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = req.response.send(r);
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Bookings whose span overlaps `query`. Skips everything starting at or
/// after `query.end` by binary search.
fn overlapping<'a>(bookings: &'a [Booking], query: &Span) -> impl Iterator<Item = &'a Booking> {
    let right_bound = bookings.partition_point(|b| b.span.start < query.end);
    let query_start = query.start;
    bookings[..right_bound]
        .iter()
        .filter(move |b| b.span.end > query_start)
}

fn insert_sorted(bookings: &mut Vec<Booking>, booking: Booking) {
    let pos = bookings.partition_point(|b| b.span.start <= booking.span.start);
    bookings.insert(pos, booking);
}

/// In-memory store with an optional append-only log for durability.
///
/// The overlap check and the insert happen under the resource's write lock,
/// so two concurrent inserts for overlapping spans cannot both succeed.
pub struct LogStore {
    customers: RwLock<HashMap<String, Customer>>,
    resources: DashMap<String, SharedBookings>,
    wal_tx: Option<mpsc::Sender<AppendRequest>>,
}

impl LogStore {
    /// A store that forgets everything on restart.
    pub fn in_memory() -> Self {
        Self {
            customers: RwLock::new(HashMap::new()),
            resources: DashMap::new(),
            wal_tx: None,
        }
    }

    /// Replay the log at `path` and keep appending to it.
    /// Must be called inside a tokio runtime (spawns the writer task).
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, events) = Wal::open_and_replay(path)?;

        let mut customers = HashMap::new();
        let mut by_resource: HashMap<String, Vec<Booking>> = HashMap::new();
        let replayed = events.len();
        for event in events {
            match event {
                Event::CustomerCreated(c) => {
                    customers.insert(email_key(&c.email), c);
                }
                Event::BookingConfirmed(b) => {
                    insert_sorted(by_resource.entry(b.resource.clone()).or_default(), b);
                }
            }
        }
        tracing::info!(path = %path.display(), events = replayed, "booking log replayed");

        let (wal_tx, wal_rx) = mpsc::channel(1024);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let resources = DashMap::new();
        for (resource, bookings) in by_resource {
            resources.insert(resource, Arc::new(RwLock::new(bookings)));
        }
        Ok(Self {
            customers: RwLock::new(customers),
            resources,
            wal_tx: Some(wal_tx),
        })
    }

    /// Write event to the log via the background group-commit writer.
    async fn append(&self, event: &Event) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(AppendRequest {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Log("log writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Log("log writer dropped response".into()))?
            .map_err(|e| StoreError::Log(e.to_string()))
    }

    fn resource(&self, resource: &str) -> SharedBookings {
        self.resources
            .entry(resource.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn all_resources(&self) -> Vec<SharedBookings> {
        self.resources.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl BookingStore for LogStore {
    async fn upsert_customer(&self, contact: &Contact) -> Result<Customer, StoreError> {
        let key = email_key(&contact.email);
        if let Some(existing) = self.customers.read().await.get(&key) {
            return Ok(existing.clone());
        }

        let mut guard = self.customers.write().await;
        // Re-check: another request may have created it while we waited.
        if let Some(existing) = guard.get(&key) {
            return Ok(existing.clone());
        }
        let customer = Customer {
            id: Ulid::new(),
            email: contact.email.trim().to_string(),
            name: contact.name.trim().to_string(),
            phone: contact.phone.trim().to_string(),
            created_at: now_ms(),
        };
        self.append(&Event::CustomerCreated(customer.clone())).await?;
        guard.insert(key, customer.clone());
        Ok(customer)
    }

    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking, StoreError> {
        let shared = self.resource(&booking.resource);
        let mut guard = shared.write().await;

        if let Some(existing) = overlapping(&guard, &booking.span).next() {
            return Err(StoreError::Overlap(existing.id));
        }

        let booking = Booking {
            id: Ulid::new(),
            customer_id: booking.customer_id,
            service_id: booking.service_id,
            resource: booking.resource,
            span: booking.span,
            price: booking.price,
            status: BookingStatus::Confirmed,
            created_at: now_ms(),
        };
        self.append(&Event::BookingConfirmed(booking.clone())).await?;
        insert_sorted(&mut guard, booking.clone());
        Ok(booking)
    }

    async fn booked_spans(&self, resource: &str, window: Span) -> Result<Vec<Span>, StoreError> {
        let Some(shared) = self.resources.get(resource).map(|e| e.value().clone()) else {
            return Ok(Vec::new());
        };
        let guard = shared.read().await;
        Ok(overlapping(&guard, &window).map(|b| b.span).collect())
    }

    async fn bookings(&self) -> Result<Vec<Booking>, StoreError> {
        let mut all = Vec::new();
        for shared in self.all_resources() {
            all.extend(shared.read().await.iter().cloned());
        }
        Ok(all)
    }

    async fn customers(&self) -> Result<Vec<Customer>, StoreError> {
        Ok(self.customers.read().await.values().cloned().collect())
    }
}
