//! Owner dashboard figures computed from the booking history.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::limits::RECENT_BOOKINGS;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerMetrics {
    pub total_bookings: usize,
    pub this_month: usize,
    pub new_customers: usize,
    pub returning_customers: usize,
    /// Percent of bookings made by returning customers, rounded.
    pub return_rate: u32,
    pub recent_activity: Vec<DayActivity>,
    pub recent_bookings: Vec<BookingSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayActivity {
    /// Short weekday, e.g. "Mon".
    pub date: String,
    pub new: usize,
    pub returning: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSummary {
    pub id: Ulid,
    pub customer_name: String,
    pub customer_email: String,
    pub service_id: String,
    pub service_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub price: u32,
}

/// Compute the dashboard as of `now`. Calendar boundaries (month, week, day)
/// are taken in `tz`.
///
/// A booking is "new" when its customer has no booking starting strictly
/// before it; otherwise it is "returning".
pub fn owner_metrics(
    bookings: &[Booking],
    customers: &[Customer],
    catalog: &Catalog,
    now: DateTime<Utc>,
    tz: Tz,
) -> OwnerMetrics {
    let mut first_start: HashMap<Ulid, Ms> = HashMap::new();
    for b in bookings {
        first_start
            .entry(b.customer_id)
            .and_modify(|s| *s = (*s).min(b.span.start))
            .or_insert(b.span.start);
    }
    let is_new = |b: &Booking| first_start.get(&b.customer_id).is_none_or(|&s| s >= b.span.start);

    let local_now = now.with_timezone(&tz);
    let today = local_now.date_naive();
    let month_start = local_midnight(tz, today.with_day(1).unwrap_or(today));
    let this_month = bookings
        .iter()
        .filter(|b| month_start.is_none_or(|m| b.span.start >= m))
        .count();

    let new_customers = bookings.iter().filter(|b| is_new(b)).count();
    let returning_customers = bookings.len() - new_customers;
    let return_rate = if bookings.is_empty() {
        0
    } else {
        ((returning_customers as f64 / bookings.len() as f64) * 100.0).round() as u32
    };

    let monday = today - Days::new(u64::from(today.weekday().num_days_from_monday()));
    let recent_activity = (0..7)
        .filter_map(|i| monday.checked_add_days(Days::new(i)))
        .map(|day| {
            let mut activity = DayActivity {
                date: day.format("%a").to_string(),
                new: 0,
                returning: 0,
            };
            for b in bookings.iter().filter(|b| b.span.start_utc().with_timezone(&tz).date_naive() == day) {
                if is_new(b) {
                    activity.new += 1;
                } else {
                    activity.returning += 1;
                }
            }
            activity
        })
        .collect();

    let by_id: HashMap<Ulid, &Customer> = customers.iter().map(|c| (c.id, c)).collect();
    let mut latest: Vec<&Booking> = bookings.iter().collect();
    latest.sort_by(|a, b| b.span.start.cmp(&a.span.start).then(b.id.cmp(&a.id)));
    let recent_bookings = latest
        .into_iter()
        .take(RECENT_BOOKINGS)
        .map(|b| {
            let customer = by_id.get(&b.customer_id);
            BookingSummary {
                id: b.id,
                customer_name: customer.map(|c| c.name.clone()).unwrap_or_default(),
                customer_email: customer.map(|c| c.email.clone()).unwrap_or_default(),
                service_id: b.service_id.clone(),
                service_name: catalog
                    .service(&b.service_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| b.service_id.clone()),
                start: b.span.start_utc(),
                end: b.span.end_utc(),
                price: b.price,
            }
        })
        .collect();

    OwnerMetrics {
        total_bookings: bookings.len(),
        this_month,
        new_customers,
        returning_customers,
        return_rate,
        recent_activity,
        recent_bookings,
    }
}

fn local_midnight(tz: Tz, date: NaiveDate) -> Option<Ms> {
    tz.from_local_datetime(&date.and_time(chrono::NaiveTime::MIN))
        .earliest()
        .map(|t| t.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    fn customer(name: &str) -> Customer {
        Customer {
            id: Ulid::new(),
            email: format!("{}@example.com", name.to_lowercase()),
            name: name.into(),
            phone: String::new(),
            created_at: 0,
        }
    }

    fn booking(c: &Customer, start: DateTime<Utc>, service: &str) -> Booking {
        let start = start.timestamp_millis();
        Booking {
            id: Ulid::new(),
            customer_id: c.id,
            service_id: service.into(),
            resource: "default".into(),
            span: Span::new(start, start + 30 * MINUTE_MS),
            price: 45,
            status: BookingStatus::Confirmed,
            created_at: start,
        }
    }

    #[test]
    fn empty_history() {
        let m = owner_metrics(&[], &[], &Catalog::builtin(), utc(2025, 6, 4, 12), chrono_tz::UTC);
        assert_eq!(m.total_bookings, 0);
        assert_eq!(m.return_rate, 0);
        assert!(m.recent_bookings.is_empty());
        let days: Vec<&str> = m.recent_activity.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(days, ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]);
    }

    #[test]
    fn new_versus_returning_uses_prior_bookings() {
        let ada = customer("Ada");
        let bob = customer("Bob");
        // Ada's second booking is listed first; order of input must not matter.
        let bookings = vec![
            booking(&ada, utc(2025, 6, 3, 10), "mens-cut"),
            booking(&ada, utc(2025, 5, 20, 10), "mens-cut"),
            booking(&bob, utc(2025, 6, 2, 9), "perm"),
        ];
        let now = utc(2025, 6, 4, 12); // Wednesday
        let m = owner_metrics(&bookings, &[ada, bob], &Catalog::builtin(), now, chrono_tz::UTC);

        assert_eq!(m.total_bookings, 3);
        assert_eq!(m.this_month, 2);
        assert_eq!(m.new_customers, 2);
        assert_eq!(m.returning_customers, 1);
        assert_eq!(m.return_rate, 33);

        let mon = &m.recent_activity[0];
        assert_eq!((mon.date.as_str(), mon.new, mon.returning), ("Mon", 1, 0));
        let tue = &m.recent_activity[1];
        assert_eq!((tue.date.as_str(), tue.new, tue.returning), ("Tue", 0, 1));
        assert!(m.recent_activity[2..].iter().all(|d| d.new + d.returning == 0));
    }

    #[test]
    fn recent_bookings_latest_first_and_capped() {
        let ada = customer("Ada");
        let bookings: Vec<Booking> = (1..=7).map(|d| booking(&ada, utc(2025, 6, d, 9), "perm")).collect();
        let m = owner_metrics(&bookings, &[ada], &Catalog::builtin(), utc(2025, 6, 10, 0), chrono_tz::UTC);

        assert_eq!(m.recent_bookings.len(), RECENT_BOOKINGS);
        let days: Vec<u32> = m.recent_bookings.iter().map(|b| b.start.day()).collect();
        assert_eq!(days, [7, 6, 5, 4, 3]);
        assert_eq!(m.recent_bookings[0].customer_name, "Ada");
        assert_eq!(m.recent_bookings[0].service_name, "Permanent Wave");
    }

    #[test]
    fn month_and_week_follow_business_zone() {
        let ada = customer("Ada");
        // 2025-06-01 02:00 UTC is still May 31 in New York.
        let bookings = vec![booking(&ada, utc(2025, 6, 1, 2), "perm")];
        let now = utc(2025, 6, 4, 12);
        let m = owner_metrics(&bookings, &[ada.clone()], &Catalog::builtin(), now, chrono_tz::America::New_York);
        assert_eq!(m.this_month, 0);
        let m = owner_metrics(&bookings, &[ada], &Catalog::builtin(), now, chrono_tz::UTC);
        assert_eq!(m.this_month, 1);
    }
}
