//! Persistence collaborator: customers by email and confirmed bookings.

mod log_store;
mod wal;

pub use log_store::LogStore;
pub use wal::Wal;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{Booking, Contact, Customer, Span};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage-level exclusion constraint: one confirmed booking per
    /// resource per instant.
    #[error("overlaps confirmed booking {0}")]
    Overlap(Ulid),
    #[error("booking log error: {0}")]
    Log(String),
}

/// Fields of a booking before the store assigns identity and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub customer_id: Ulid,
    pub service_id: String,
    pub resource: String,
    pub span: Span,
    pub price: u32,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Return the customer with this email, creating it from `contact` if
    /// absent. An existing customer's fields are never overwritten.
    async fn upsert_customer(&self, contact: &Contact) -> Result<Customer, StoreError>;

    /// Durably insert a confirmed booking. Implementations must reject a
    /// booking overlapping another on the same resource with
    /// [`StoreError::Overlap`], atomically with the insert.
    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking, StoreError>;

    /// Spans of confirmed bookings on `resource` overlapping `window`.
    async fn booked_spans(&self, resource: &str, window: Span) -> Result<Vec<Span>, StoreError>;

    /// All bookings, in no particular order.
    async fn bookings(&self) -> Result<Vec<Booking>, StoreError>;

    async fn customers(&self) -> Result<Vec<Customer>, StoreError>;
}
