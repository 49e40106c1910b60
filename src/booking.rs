//! Booking commit: last-moment availability check, the booking write, then
//! best-effort calendar mirroring and confirmation.
//!
//! A commit attempt moves through [`Stage`]s in order. Rejections happen only
//! before `Persisting` or at the write itself; once the store accepts the
//! booking the attempt has succeeded, whatever the side effects do.

use std::sync::Arc;

use chrono::NaiveDate;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::availability::{Preview, Resolver};
use crate::calendar::{BusyIntervals, Calendar, CalendarEvent};
use crate::catalog::Catalog;
use crate::error::BookingError;
use crate::limits::*;
use crate::model::*;
use crate::notify::{Confirmation, Notifier};
use crate::observability::{BOOKINGS_TOTAL, SIDE_EFFECT_FAILURES_TOTAL};
use crate::store::{BookingStore, NewBooking, StoreError};

/// Resource key used when no external calendar names one.
pub const DEFAULT_RESOURCE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    CheckingAvailability,
    Persisting,
    Persisted,
    NotifyingBestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub service_id: String,
    pub date: NaiveDate,
    pub time: String,
    pub customer: Contact,
}

/// Trim and check contact fields. Phone may be empty.
pub fn validate_contact(contact: &Contact) -> Result<Contact, BookingError> {
    let name = contact.name.trim();
    let email = contact.email.trim();
    let phone = contact.phone.trim();
    if name.is_empty() {
        return Err(BookingError::invalid_input("Customer name is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(BookingError::invalid_input("Customer name is too long"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(BookingError::invalid_input("Customer email is too long"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.contains('@') => {}
        _ => return Err(BookingError::invalid_input("Customer email is invalid")),
    }
    if phone.len() > MAX_PHONE_LEN {
        return Err(BookingError::invalid_input("Customer phone is too long"));
    }
    Ok(Contact {
        name: name.to_string(),
        email: email.to_string(),
        phone: phone.to_string(),
    })
}

/// Availability preview and booking commit over injected collaborators.
pub struct BookingService {
    catalog: Arc<Catalog>,
    resolver: Resolver,
    calendar: Arc<dyn Calendar>,
    store: Arc<dyn BookingStore>,
    notifier: Arc<dyn Notifier>,
    resource: String,
    business_name: String,
}

impl BookingService {
    pub fn new(
        catalog: Arc<Catalog>,
        tz: chrono_tz::Tz,
        calendar: Arc<dyn Calendar>,
        store: Arc<dyn BookingStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let resolver = Resolver::new(catalog.grid().clone(), tz);
        Self {
            catalog,
            resolver,
            calendar,
            store,
            notifier,
            resource: DEFAULT_RESOURCE.to_string(),
            business_name: String::new(),
        }
    }

    /// Key under which bookings are kept mutually exclusive.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_business_name(mut self, name: impl Into<String>) -> Self {
        self.business_name = name.into();
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn BookingStore> {
        &self.store
    }

    pub fn tz(&self) -> chrono_tz::Tz {
        self.resolver.tz()
    }

    /// Free slots for a non-committing display. Never fails on calendar
    /// trouble; see [`Resolver::preview`] for the policy.
    pub async fn availability(&self, date: NaiveDate, minutes: u32) -> Result<Preview, BookingError> {
        if minutes == 0 || minutes > MAX_SERVICE_MINUTES {
            return Err(BookingError::invalid_input(format!(
                "duration must be between 1 and {MAX_SERVICE_MINUTES} minutes"
            )));
        }
        let Some(window) = self.resolver.day_window(date, minutes) else {
            return Ok(Preview {
                slots: Vec::new(),
                subject_to_confirmation: false,
            });
        };
        let external = self.calendar.busy(window).await;
        let booked = self
            .store
            .booked_spans(&self.resource, window)
            .await
            .map_err(BookingError::Persistence)?;
        Ok(self.resolver.preview(date, minutes, &external, &booked))
    }

    #[tracing::instrument(
        name = "commit",
        skip(self, req),
        fields(service = %req.service_id, date = %req.date, time = %req.time)
    )]
    pub async fn commit(&self, req: BookingRequest) -> Result<Booking, BookingError> {
        let result = self.try_commit(req).await;
        let outcome = match &result {
            Ok(_) => "confirmed",
            Err(e) => {
                match e {
                    BookingError::Persistence(source) => tracing::error!("booking write failed: {source}"),
                    other => info!(outcome = other.outcome(), "booking rejected: {other}"),
                }
                e.outcome()
            }
        };
        counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_commit(&self, req: BookingRequest) -> Result<Booking, BookingError> {
        debug!(stage = ?Stage::Validating);
        let contact = validate_contact(&req.customer)?;
        let service = self
            .catalog
            .service(&req.service_id)
            .ok_or_else(|| BookingError::InvalidService(req.service_id.clone()))?;
        let slot = self
            .resolver
            .grid()
            .find(&req.time)
            .ok_or_else(|| BookingError::InvalidSlot(req.time.clone()))?;
        let span = self
            .resolver
            .slot_span(req.date, slot, service.duration_minutes)
            .ok_or_else(|| {
                BookingError::InvalidSlot(format!("{} does not exist on {}", slot.label(), req.date))
            })?;

        debug!(stage = ?Stage::CheckingAvailability);
        match self.calendar.busy(span).await {
            BusyIntervals::Unavailable(reason) => {
                warn!("calendar unavailable at commit, failing safe: {reason}");
                return Err(BookingError::AvailabilityUnknown);
            }
            BusyIntervals::Known(busy) => {
                if let Some(blocker) = busy.iter().find(|b| b.overlaps(&span)) {
                    debug!(busy_start = %blocker.start_utc(), busy_end = %blocker.end_utc(), "slot taken externally");
                    return Err(BookingError::SlotTaken);
                }
            }
            BusyIntervals::Unconstrained => {}
        }

        debug!(stage = ?Stage::Persisting);
        let customer = self
            .store
            .upsert_customer(&contact)
            .await
            .map_err(BookingError::Persistence)?;
        let booking = self
            .store
            .insert_booking(NewBooking {
                customer_id: customer.id,
                service_id: service.id.clone(),
                resource: self.resource.clone(),
                span,
                price: service.price_start,
            })
            .await
            .map_err(|e| match e {
                StoreError::Overlap(existing) => {
                    debug!(%existing, "slot taken by a concurrent booking");
                    BookingError::SlotTaken
                }
                other => BookingError::Persistence(other),
            })?;
        info!(stage = ?Stage::Persisted, booking = %booking.id, customer = %customer.id, "booking confirmed");

        debug!(stage = ?Stage::NotifyingBestEffort);
        self.mirror_to_calendar(&booking, service, &contact).await;
        self.send_confirmation(&booking, service, &contact).await;

        Ok(booking)
    }

    async fn mirror_to_calendar(&self, booking: &Booking, service: &Service, contact: &Contact) {
        let event = CalendarEvent {
            span: booking.span,
            summary: format!("{} - {}", contact.name, service.name),
            description: format!(
                "Phone: {}\nService: {}\nDuration: {}m",
                contact.phone, service.name, service.duration_minutes
            ),
            attendee: Some(contact.email.clone()),
        };
        match self.calendar.create_event(&event).await {
            Ok(id) => debug!(booking = %booking.id, event = ?id, "calendar event created"),
            Err(e) => {
                warn!(booking = %booking.id, "calendar sync failed: {e}");
                counter!(SIDE_EFFECT_FAILURES_TOTAL, "kind" => "calendar").increment(1);
            }
        }
    }

    async fn send_confirmation(&self, booking: &Booking, service: &Service, contact: &Contact) {
        let msg = Confirmation::new(
            &contact.email,
            &contact.name,
            &service.name,
            booking.span.start_utc(),
            self.resolver.tz(),
            &self.business_name,
        );
        if let Err(e) = self.notifier.send_confirmation(&msg).await {
            warn!(booking = %booking.id, "confirmation failed: {e}");
            counter!(SIDE_EFFECT_FAILURES_TOTAL, "kind" => "notification").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{NaiveTime, TimeZone, Utc};

    use crate::calendar::CalendarError;
    use crate::catalog::SlotGrid;
    use crate::model::Customer;
    use crate::notify::NotifyError;
    use crate::store::LogStore;

    // ── Fakes ────────────────────────────────────────────────

    struct FakeCalendar {
        busy: Mutex<BusyIntervals>,
        fail_writes: bool,
        created: Mutex<Vec<CalendarEvent>>,
    }

    impl FakeCalendar {
        fn new(busy: BusyIntervals) -> Self {
            Self {
                busy: Mutex::new(busy),
                fail_writes: false,
                created: Mutex::new(Vec::new()),
            }
        }

        fn failing_writes(busy: BusyIntervals) -> Self {
            Self {
                fail_writes: true,
                ..Self::new(busy)
            }
        }
    }

    #[async_trait]
    impl Calendar for FakeCalendar {
        async fn busy(&self, _window: Span) -> BusyIntervals {
            self.busy.lock().unwrap().clone()
        }

        async fn create_event(&self, event: &CalendarEvent) -> Result<Option<String>, CalendarError> {
            if self.fail_writes {
                return Err(CalendarError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            self.created.lock().unwrap().push(event.clone());
            Ok(Some("evt".into()))
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        fail: bool,
        sent: Mutex<Vec<Confirmation>>,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn send_confirmation(&self, msg: &Confirmation) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Status(502));
            }
            self.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    /// Wraps a real store, counting calls and optionally failing writes.
    struct CountingStore {
        inner: LogStore,
        calls: AtomicUsize,
        fail_inserts: bool,
    }

    impl CountingStore {
        fn new(fail_inserts: bool) -> Self {
            Self {
                inner: LogStore::in_memory(),
                calls: AtomicUsize::new(0),
                fail_inserts,
            }
        }
    }

    #[async_trait]
    impl BookingStore for CountingStore {
        async fn upsert_customer(&self, contact: &Contact) -> Result<Customer, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.upsert_customer(contact).await
        }

        async fn insert_booking(&self, booking: NewBooking) -> Result<Booking, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_inserts {
                return Err(StoreError::Log("disk full".into()));
            }
            self.inner.insert_booking(booking).await
        }

        async fn booked_spans(&self, resource: &str, window: Span) -> Result<Vec<Span>, StoreError> {
            self.inner.booked_spans(resource, window).await
        }

        async fn bookings(&self) -> Result<Vec<Booking>, StoreError> {
            self.inner.bookings().await
        }

        async fn customers(&self) -> Result<Vec<Customer>, StoreError> {
            self.inner.customers().await
        }
    }

    // ── Helpers ──────────────────────────────────────────────

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn at(h: u32, m: u32) -> Ms {
        Utc.from_utc_datetime(&day().and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap()))
            .timestamp_millis()
    }

    fn two_slot_catalog() -> Arc<Catalog> {
        let grid = SlotGrid::new([
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        ])
        .unwrap();
        Arc::new(Catalog::new(Catalog::builtin().services().to_vec(), grid).unwrap())
    }

    struct Harness {
        service: BookingService,
        calendar: Arc<FakeCalendar>,
        store: Arc<CountingStore>,
        notifier: Arc<FakeNotifier>,
    }

    fn harness_with(calendar: FakeCalendar, store: CountingStore, notifier: FakeNotifier) -> Harness {
        let calendar = Arc::new(calendar);
        let store = Arc::new(store);
        let notifier = Arc::new(notifier);
        let service = BookingService::new(
            two_slot_catalog(),
            chrono_tz::UTC,
            calendar.clone(),
            store.clone(),
            notifier.clone(),
        )
        .with_resource("salon")
        .with_business_name("Aura Salon");
        Harness {
            service,
            calendar,
            store,
            notifier,
        }
    }

    fn harness(busy: BusyIntervals) -> Harness {
        harness_with(FakeCalendar::new(busy), CountingStore::new(false), FakeNotifier::default())
    }

    fn request(service_id: &str, time: &str) -> BookingRequest {
        BookingRequest {
            service_id: service_id.into(),
            date: day(),
            time: time.into(),
            customer: Contact {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                phone: "555-0100".into(),
            },
        }
    }

    // ── Commit ───────────────────────────────────────────────

    #[tokio::test]
    async fn commit_persists_and_runs_side_effects() {
        let h = harness(BusyIntervals::Known(vec![]));
        let booking = h.service.commit(request("perm", "9:00 AM")).await.unwrap();

        assert_eq!(booking.span, Span::new(at(9, 0), at(11, 0)));
        assert_eq!(booking.price, 150);
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.resource, "salon");
        assert_eq!(h.store.bookings().await.unwrap(), vec![booking.clone()]);

        let created = h.calendar.created.lock().unwrap().clone();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].summary, "Ada - Permanent Wave");
        assert_eq!(created[0].description, "Phone: 555-0100\nService: Permanent Wave\nDuration: 120m");
        assert_eq!(created[0].attendee.as_deref(), Some("ada@example.com"));

        let sent = h.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ada@example.com");
        assert_eq!(sent[0].business, "Aura Salon");
    }

    #[tokio::test]
    async fn unknown_service_rejected_without_store_calls() {
        let h = harness(BusyIntervals::Known(vec![]));
        let err = h.service.commit(request("tattoo", "9:00 AM")).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidService(ref id) if id == "tattoo"));
        assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn label_outside_grid_is_invalid_slot() {
        let h = harness(BusyIntervals::Known(vec![]));
        for time in ["9:30 AM", "09:00", "", "11:30 AM"] {
            let err = h.service.commit(request("perm", time)).await.unwrap_err();
            assert!(matches!(err, BookingError::InvalidSlot(_)), "{time}: {err:?}");
        }
        assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bad_contact_is_invalid_input() {
        let h = harness(BusyIntervals::Known(vec![]));
        let mut req = request("perm", "9:00 AM");
        req.customer.email = "not-an-email".into();
        let err = h.service.commit(req).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidInput(_)));

        let mut req = request("perm", "9:00 AM");
        req.customer.name = "   ".into();
        let err = h.service.commit(req).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidInput(_)));
        assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unavailable_calendar_fails_safe() {
        let h = harness(BusyIntervals::Unavailable("timeout".into()));
        let err = h.service.commit(request("perm", "9:00 AM")).await.unwrap_err();
        assert!(matches!(err, BookingError::AvailabilityUnknown));
        assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);
        assert!(h.store.bookings().await.unwrap().is_empty());
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn external_overlap_is_slot_taken() {
        let h = harness(BusyIntervals::Known(vec![Span::new(at(9, 15), at(9, 45))]));
        let err = h.service.commit(request("mens-cut", "9:00 AM")).await.unwrap_err();
        assert!(matches!(err, BookingError::SlotTaken));
        assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn adjacent_external_busy_does_not_block() {
        let h = harness(BusyIntervals::Known(vec![Span::new(at(10, 0), at(11, 0))]));
        let booking = h.service.commit(request("mens-cut", "9:00 AM")).await.unwrap();
        assert_eq!(booking.span, Span::new(at(9, 0), at(9, 30)));
    }

    #[tokio::test]
    async fn no_calendar_still_enforces_store_constraint() {
        let h = harness(BusyIntervals::Unconstrained);
        h.service.commit(request("perm", "9:00 AM")).await.unwrap();
        // 10:00 overlaps the 9:00-11:00 perm already stored.
        let err = h.service.commit(request("mens-cut", "10:00 AM")).await.unwrap_err();
        assert!(matches!(err, BookingError::SlotTaken));
        assert_eq!(h.store.bookings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_commits_admit_one() {
        let h = Arc::new(harness(BusyIntervals::Known(vec![])));
        let attempts = (0..6).map(|_| {
            let h = h.clone();
            async move { h.service.commit(request("perm", "10:00 AM")).await }
        });
        let results = futures::future::join_all(attempts).await;

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let taken = results
            .iter()
            .filter(|r| matches!(r, Err(BookingError::SlotTaken)))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(taken, 5);
        assert_eq!(h.store.bookings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn side_effect_failures_do_not_affect_success() {
        let h = harness_with(
            FakeCalendar::failing_writes(BusyIntervals::Known(vec![])),
            CountingStore::new(false),
            FakeNotifier {
                fail: true,
                ..Default::default()
            },
        );
        let booking = h.service.commit(request("blowout", "10:00 AM")).await.unwrap();
        assert_eq!(h.store.bookings().await.unwrap(), vec![booking]);
    }

    #[tokio::test]
    async fn store_failure_is_persistence_error_without_side_effects() {
        let h = harness_with(
            FakeCalendar::new(BusyIntervals::Known(vec![])),
            CountingStore::new(true),
            FakeNotifier::default(),
        );
        let err = h.service.commit(request("perm", "9:00 AM")).await.unwrap_err();
        assert!(matches!(err, BookingError::Persistence(StoreError::Log(_))));
        assert!(h.store.bookings().await.unwrap().is_empty());
        assert!(h.calendar.created.lock().unwrap().is_empty());
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn returning_customer_keeps_original_details() {
        let h = harness(BusyIntervals::Unconstrained);
        let first = h.service.commit(request("mens-cut", "9:00 AM")).await.unwrap();
        let mut req = request("mens-cut", "10:00 AM");
        req.customer.name = "Ada L.".into();
        req.customer.email = "ADA@example.com".into();
        let second = h.service.commit(req).await.unwrap();

        assert_eq!(first.customer_id, second.customer_id);
        let customers = h.store.customers().await.unwrap();
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0].name, "Ada");
    }

    // ── Availability preview ─────────────────────────────────

    #[tokio::test]
    async fn preview_blocks_overlapping_slot() {
        let h = harness(BusyIntervals::Known(vec![Span::new(at(9, 30), at(10, 0))]));
        let p = h.service.availability(day(), 60).await.unwrap();
        assert_eq!(p.slots, vec!["10:00 AM"]);
        assert!(!p.subject_to_confirmation);
    }

    #[tokio::test]
    async fn preview_on_unavailable_calendar_is_flagged() {
        let h = harness(BusyIntervals::Unavailable("down".into()));
        let p = h.service.availability(day(), 60).await.unwrap();
        assert_eq!(p.slots, vec!["9:00 AM", "10:00 AM"]);
        assert!(p.subject_to_confirmation);
    }

    #[tokio::test]
    async fn preview_hides_stored_bookings() {
        let h = harness(BusyIntervals::Unconstrained);
        h.service.commit(request("mens-cut", "10:00 AM")).await.unwrap();
        let p = h.service.availability(day(), 30).await.unwrap();
        assert_eq!(p.slots, vec!["9:00 AM"]);
        // Other days are unaffected.
        let p = h.service.availability(day().succ_opt().unwrap(), 30).await.unwrap();
        assert_eq!(p.slots.len(), 2);
    }

    #[tokio::test]
    async fn preview_rejects_bad_duration() {
        let h = harness(BusyIntervals::Unconstrained);
        assert!(matches!(
            h.service.availability(day(), 0).await,
            Err(BookingError::InvalidInput(_))
        ));
        assert!(matches!(
            h.service.availability(day(), MAX_SERVICE_MINUTES + 1).await,
            Err(BookingError::InvalidInput(_))
        ));
    }

    #[test]
    fn validate_contact_trims_and_allows_empty_phone() {
        let c = validate_contact(&Contact {
            name: "  Ada ".into(),
            email: " ada@example.com ".into(),
            phone: String::new(),
        })
        .unwrap();
        assert_eq!(c.name, "Ada");
        assert_eq!(c.email, "ada@example.com");
        assert!(c.phone.is_empty());

        for email in ["", "@example.com", "ada@", "ada@localhost", "a@b@c.com"] {
            let c = Contact {
                name: "Ada".into(),
                email: email.into(),
                phone: String::new(),
            };
            assert!(validate_contact(&c).is_err(), "{email}");
        }
    }
}
