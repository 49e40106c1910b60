use thiserror::Error;

use crate::store::StoreError;

/// Why a booking attempt or availability query did not succeed.
///
/// Every variant is raised before the booking write or by the write itself;
/// failures of best-effort side effects after the write never appear here.
#[derive(Debug, Error)]
pub enum BookingError {
    /// Missing or malformed request fields.
    #[error("{0}")]
    InvalidInput(String),
    #[error("Invalid service: {0}")]
    InvalidService(String),
    #[error("Invalid time slot: {0}")]
    InvalidSlot(String),
    /// The external calendar could not be read at commit time.
    #[error("Availability could not be confirmed. Please try again shortly.")]
    AvailabilityUnknown,
    /// Lost to an external event or a concurrent booking.
    #[error("Slot is no longer available. Please choose another.")]
    SlotTaken,
    /// The system-of-record write failed; nothing was booked.
    #[error("Booking storage failed. Please try again.")]
    Persistence(#[source] StoreError),
}

impl BookingError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        BookingError::InvalidInput(message.into())
    }

    /// Short label for metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            BookingError::InvalidInput(_) => "invalid_input",
            BookingError::InvalidService(_) => "invalid_service",
            BookingError::InvalidSlot(_) => "invalid_slot",
            BookingError::AvailabilityUnknown => "availability_unknown",
            BookingError::SlotTaken => "slot_taken",
            BookingError::Persistence(_) => "persistence_failure",
        }
    }
}
