use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{MatchedPath, Query, Request, State, rejection::{JsonRejection, QueryRejection}},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::json;
use ulid::Ulid;

use crate::auth::{AdminAuth, require_admin};
use crate::availability::Preview;
use crate::booking::{BookingRequest, BookingService};
use crate::error::BookingError;
use crate::model::{Contact, ServiceCategory};
use crate::observability::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};
use crate::report::{self, OwnerMetrics};

#[derive(Clone)]
pub struct AppState {
    booking: Arc<BookingService>,
    admin: AdminAuth,
}

impl AppState {
    pub fn new(booking: Arc<BookingService>, admin: AdminAuth) -> Self {
        Self { booking, admin }
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = match &self {
            BookingError::InvalidInput(_)
            | BookingError::InvalidService(_)
            | BookingError::InvalidSlot(_) => StatusCode::BAD_REQUEST,
            BookingError::SlotTaken => StatusCode::CONFLICT,
            BookingError::AvailabilityUnknown => StatusCode::SERVICE_UNAVAILABLE,
            BookingError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/metrics", get(owner_metrics))
        .route_layer(middleware::from_fn_with_state(state.admin.clone(), require_admin));

    Router::new()
        .route("/health", get(health))
        .route("/api/services", get(list_services))
        .route("/api/slots", get(list_slots))
        .route("/api/availability", get(availability))
        .route("/api/book", post(book))
        .merge(admin)
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

/// Counts every request. Paths that match no route share the `unmatched` label.
async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let response = next.run(req).await;
    counter!(
        HTTP_REQUESTS_TOTAL,
        "route" => route.clone(),
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route).record(start.elapsed().as_secs_f64());
    response
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceView<'a> {
    id: &'a str,
    name: &'a str,
    duration_minutes: u32,
    price_start: u32,
    description: &'a str,
    category: ServiceCategory,
}

async fn list_services(State(state): State<AppState>) -> Response {
    let services: Vec<ServiceView<'_>> = state
        .booking
        .catalog()
        .services()
        .iter()
        .map(|s| ServiceView {
            id: &s.id,
            name: &s.name,
            duration_minutes: s.duration_minutes,
            price_start: s.price_start,
            description: &s.description,
            category: s.category,
        })
        .collect();
    Json(services).into_response()
}

async fn list_slots(State(state): State<AppState>) -> Response {
    let slots: Vec<&str> = state.booking.catalog().grid().labels().collect();
    Json(json!({ "slots": slots })).into_response()
}

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    date: Option<String>,
    #[serde(alias = "durationMinutes")]
    duration: Option<String>,
}

async fn availability(
    State(state): State<AppState>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> Result<Json<Preview>, BookingError> {
    let Query(query) = query.map_err(|e| BookingError::invalid_input(e.body_text()))?;
    let (Some(date), Some(duration)) = (query.date, query.duration) else {
        return Err(BookingError::invalid_input("Missing date or duration"));
    };
    let date = parse_date(&date, state.booking.tz())
        .ok_or_else(|| BookingError::invalid_input(format!("Invalid date: {date}")))?;
    let minutes: u32 = duration
        .trim()
        .parse()
        .map_err(|_| BookingError::invalid_input(format!("Invalid duration: {duration}")))?;
    Ok(Json(state.booking.availability(date, minutes).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContactBody {
    name: String,
    email: String,
    phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookBody {
    service_id: Option<String>,
    date: Option<String>,
    time: Option<String>,
    customer: Option<ContactBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookResponse {
    success: bool,
    booking_id: Ulid,
}

async fn book(
    State(state): State<AppState>,
    body: Result<Json<BookBody>, JsonRejection>,
) -> Result<Json<BookResponse>, BookingError> {
    let Json(body) = body.map_err(|e| BookingError::invalid_input(e.body_text()))?;
    let (Some(service_id), Some(date), Some(time), Some(customer)) =
        (body.service_id, body.date, body.time, body.customer)
    else {
        return Err(BookingError::invalid_input("Missing required fields"));
    };
    let date = parse_date(&date, state.booking.tz())
        .ok_or_else(|| BookingError::invalid_input(format!("Invalid date: {date}")))?;

    let booking = state
        .booking
        .commit(BookingRequest {
            service_id,
            date,
            time,
            customer: Contact {
                name: customer.name,
                email: customer.email,
                phone: customer.phone,
            },
        })
        .await?;
    Ok(Json(BookResponse {
        success: true,
        booking_id: booking.id,
    }))
}

async fn owner_metrics(State(state): State<AppState>) -> Result<Json<OwnerMetrics>, BookingError> {
    let store = state.booking.store();
    let bookings = store.bookings().await.map_err(BookingError::Persistence)?;
    let customers = store.customers().await.map_err(BookingError::Persistence)?;
    Ok(Json(report::owner_metrics(
        &bookings,
        &customers,
        state.booking.catalog(),
        Utc::now(),
        state.booking.tz(),
    )))
}

/// `YYYY-MM-DD`, or an RFC 3339 instant read as a calendar date in `tz`.
fn parse_date(raw: &str, tz: Tz) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().or_else(|| {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&tz).date_naive())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::util::ServiceExt;

    use crate::calendar::NoCalendar;
    use crate::catalog::Catalog;
    use crate::notify::LogNotifier;
    use crate::store::LogStore;

    fn app() -> Router {
        let booking = BookingService::new(
            Arc::new(Catalog::builtin()),
            chrono_tz::UTC,
            Arc::new(NoCalendar),
            Arc::new(LogStore::in_memory()),
            Arc::new(LogNotifier),
        );
        router(AppState::new(Arc::new(booking), AdminAuth::new(None)))
    }

    #[test]
    fn request_metrics_label_matched_and_unmatched_routes() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            tokio_test::block_on(async {
                for uri in ["/health", "/api/nope"] {
                    let req = axum::http::Request::get(uri).body(Body::empty()).unwrap();
                    app().oneshot(req).await.unwrap();
                }
            })
        });

        let rendered = handle.render();
        let counted = |route: &str, status: &str| {
            rendered.lines().any(|line| {
                line.starts_with("slotbook_http_requests_total{")
                    && line.contains(&format!("route=\"{route}\""))
                    && line.contains(&format!("status=\"{status}\""))
                    && line.ends_with(" 1")
            })
        };
        assert!(counted("/health", "200"), "{rendered}");
        assert!(counted("unmatched", "404"), "{rendered}");
    }

    #[test]
    fn parses_plain_and_rfc3339_dates() {
        let june2 = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert_eq!(parse_date("2025-06-02", chrono_tz::UTC), Some(june2));
        assert_eq!(parse_date(" 2025-06-02 ", chrono_tz::UTC), Some(june2));
        assert_eq!(parse_date("2025-06-02T10:00:00Z", chrono_tz::UTC), Some(june2));
        // 02:00 UTC on June 3 is still June 2 in New York.
        assert_eq!(
            parse_date("2025-06-03T02:00:00.000Z", chrono_tz::America::New_York),
            Some(june2)
        );
        assert_eq!(parse_date("June 2", chrono_tz::UTC), None);
        assert_eq!(parse_date("2025-02-30", chrono_tz::UTC), None);
    }

    #[test]
    fn error_status_mapping() {
        let cases = [
            (BookingError::invalid_input("x"), StatusCode::BAD_REQUEST),
            (BookingError::InvalidService("x".into()), StatusCode::BAD_REQUEST),
            (BookingError::InvalidSlot("x".into()), StatusCode::BAD_REQUEST),
            (BookingError::SlotTaken, StatusCode::CONFLICT),
            (BookingError::AvailabilityUnknown, StatusCode::SERVICE_UNAVAILABLE),
            (
                BookingError::Persistence(crate::store::StoreError::Log("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
