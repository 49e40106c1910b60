//! External calendar collaborator: busy-interval reads and best-effort event writes.

mod google;

pub use google::HttpCalendar;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Span;

/// Result of asking the external calendar what is busy in a window.
///
/// `Unavailable` is never collapsed into an empty `Known` list: callers pick
/// their own policy for unknown state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusyIntervals {
    /// Fresh intervals from the calendar (may be empty).
    Known(Vec<Span>),
    /// No external calendar is configured; it imposes no constraint.
    Unconstrained,
    /// The calendar is configured but could not be read.
    Unavailable(String),
}

impl BusyIntervals {
    /// Intervals to subtract when the caller treats unknown state as free.
    pub fn spans_or_empty(&self) -> &[Span] {
        match self {
            BusyIntervals::Known(spans) => spans,
            BusyIntervals::Unconstrained | BusyIntervals::Unavailable(_) => &[],
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, BusyIntervals::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("calendar returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid calendar url: {0}")]
    Url(String),
    #[error("unexpected calendar response: {0}")]
    Decode(String),
}

/// An event to mirror a booking onto the external calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub span: Span,
    pub summary: String,
    pub description: String,
    pub attendee: Option<String>,
}

#[async_trait]
pub trait Calendar: Send + Sync {
    /// Busy intervals overlapping `window`. Read-only, never errors: failures
    /// come back as [`BusyIntervals::Unavailable`].
    async fn busy(&self, window: Span) -> BusyIntervals;

    /// Create an event, returning the calendar's event id when it has one.
    async fn create_event(&self, event: &CalendarEvent) -> Result<Option<String>, CalendarError>;
}

/// The "no external calendar" mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCalendar;

#[async_trait]
impl Calendar for NoCalendar {
    async fn busy(&self, _window: Span) -> BusyIntervals {
        BusyIntervals::Unconstrained
    }

    async fn create_event(&self, event: &CalendarEvent) -> Result<Option<String>, CalendarError> {
        tracing::info!(
            start = %event.span.start_utc(),
            summary = %event.summary,
            "no external calendar configured, event not mirrored"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_calendar_is_unconstrained() {
        let cal = NoCalendar;
        let busy = tokio_test::block_on(cal.busy(Span::new(0, 1000)));
        assert_eq!(busy, BusyIntervals::Unconstrained);
        assert!(busy.spans_or_empty().is_empty());
        assert!(!busy.is_unavailable());

        let event = CalendarEvent {
            span: Span::new(0, 1000),
            summary: "x".into(),
            description: String::new(),
            attendee: None,
        };
        tokio_test::assert_ok!(tokio_test::block_on(cal.create_event(&event)));
    }

    #[test]
    fn unavailable_is_distinct_from_empty() {
        let known = BusyIntervals::Known(Vec::new());
        let down = BusyIntervals::Unavailable("timeout".into());
        assert_ne!(known, down);
        assert!(down.is_unavailable());
        assert!(!known.is_unavailable());
        assert!(down.spans_or_empty().is_empty());
    }
}
