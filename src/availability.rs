//! Availability resolution: which fixed slots are free for a date and duration.
//!
//! Everything here is a pure function of its inputs. Fetching busy intervals
//! and choosing what to do when they are unknown belongs to the caller.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::calendar::BusyIntervals;
use crate::catalog::{Slot, SlotGrid};
use crate::model::*;

/// Free slots for a non-committing preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub slots: Vec<String>,
    /// The external calendar could not be read; slots shown may still be
    /// rejected at commit time.
    pub subject_to_confirmation: bool,
}

/// Intersects the slot grid with busy intervals in the business time zone.
#[derive(Debug, Clone)]
pub struct Resolver {
    grid: SlotGrid,
    tz: Tz,
}

impl Resolver {
    pub fn new(grid: SlotGrid, tz: Tz) -> Self {
        Self { grid, tz }
    }

    pub fn grid(&self) -> &SlotGrid {
        &self.grid
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// `[start, start + minutes)` for `slot` on `date`, or `None` if the slot's
    /// local time does not exist that day.
    pub fn slot_span(&self, date: NaiveDate, slot: &Slot, minutes: u32) -> Option<Span> {
        let start = slot.start_on(date, self.tz)?.timestamp_millis();
        Some(Span::new(start, start + Ms::from(minutes.max(1)) * MINUTE_MS))
    }

    /// Free slot labels for `service` on `date`, in grid order.
    pub fn resolve(&self, date: NaiveDate, service: &Service, busy: &[Span]) -> Vec<String> {
        self.resolve_minutes(date, service.duration_minutes, busy)
    }

    /// Free slot labels for a duration in minutes, in grid order.
    ///
    /// A slot is blocked iff `[slotStart, slotEnd)` overlaps some busy
    /// interval; a slot ending exactly where a busy interval starts is free.
    pub fn resolve_minutes(&self, date: NaiveDate, minutes: u32, busy: &[Span]) -> Vec<String> {
        self.grid
            .slots()
            .iter()
            .filter_map(|slot| {
                let span = self.slot_span(date, slot, minutes)?;
                match busy.iter().find(|b| b.overlaps(&span)) {
                    Some(blocker) => {
                        tracing::debug!(
                            slot = slot.label(),
                            busy_start = %blocker.start_utc(),
                            busy_end = %blocker.end_utc(),
                            "slot blocked"
                        );
                        None
                    }
                    None => Some(slot.label().to_string()),
                }
            })
            .collect()
    }

    /// Window to ask the calendar about: the whole local day, widened to
    /// cover every slot's span for this duration.
    pub fn day_window(&self, date: NaiveDate, minutes: u32) -> Option<Span> {
        let local_midnight = |d: NaiveDate| {
            self.tz
                .from_local_datetime(&d.and_time(NaiveTime::MIN))
                .earliest()
                .map(|t| t.with_timezone(&Utc).timestamp_millis())
        };
        let slot_spans: Vec<Span> = self
            .grid
            .slots()
            .iter()
            .filter_map(|s| self.slot_span(date, s, minutes))
            .collect();

        let start = local_midnight(date)
            .into_iter()
            .chain(slot_spans.iter().map(|s| s.start))
            .min()?;
        let end = date
            .succ_opt()
            .and_then(local_midnight)
            .into_iter()
            .chain(slot_spans.iter().map(|s| s.end))
            .max()?;
        (start < end).then(|| Span::new(start, end))
    }

    /// Preview policy: an unreadable external calendar is treated as imposing
    /// no constraint, and the result is flagged subject to confirmation.
    /// Bookings already in the store are always subtracted.
    pub fn preview(
        &self,
        date: NaiveDate,
        minutes: u32,
        external: &BusyIntervals,
        booked: &[Span],
    ) -> Preview {
        let mut busy: Vec<Span> = external.spans_or_empty().to_vec();
        busy.extend_from_slice(booked);
        Preview {
            slots: self.resolve_minutes(date, minutes, &busy),
            subject_to_confirmation: external.is_unavailable(),
        }
    }
}
