use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type stored or compared.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from two UTC instants. `None` unless `start < end`.
    pub fn from_utc(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        let (start, end) = (start.timestamp_millis(), end.timestamp_millis());
        (start < end).then(|| Self::new(start, end))
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// `[a,b)` and `[c,d)` overlap iff `a < d && c < b`. Touching ends do not.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        to_utc(self.start)
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        to_utc(self.end)
    }
}

/// Milliseconds to a UTC instant, saturating to the epoch on out-of-range input.
pub fn to_utc(ms: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCategory {
    Cut,
    Color,
    Style,
    Treatment,
}

/// A bookable service. Loaded once from the catalogue, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub duration_minutes: u32,
    pub price_start: u32,
    #[serde(default)]
    pub description: String,
    pub category: ServiceCategory,
}

impl Service {
    pub fn duration_ms(&self) -> Ms {
        Ms::from(self.duration_minutes) * MINUTE_MS
    }
}

/// Contact details submitted with a booking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// A customer, keyed by email. Created on first booking, never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Ulid,
    pub email: String,
    pub name: String,
    pub phone: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
}

/// A committed booking on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub service_id: String,
    pub resource: String,
    pub span: Span,
    pub price: u32,
    pub status: BookingStatus,
    pub created_at: Ms,
}

/// Log record format. Flat, one variant per durable write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CustomerCreated(Customer),
    BookingConfirmed(Booking),
}
