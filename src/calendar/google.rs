use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use crate::model::Span;
use crate::observability::CALENDAR_FETCH_DURATION_SECONDS;

use super::{BusyIntervals, Calendar, CalendarError, CalendarEvent};

/// Calendar client speaking the Google Calendar v3 JSON API
/// (`freeBusy` for reads, `calendars/{id}/events` for writes).
#[derive(Debug, Clone)]
pub struct HttpCalendar {
    client: Client,
    base_url: Url,
    calendar_id: String,
    token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FreeBusyRequest<'a> {
    time_min: String,
    time_max: String,
    items: [FreeBusyItem<'a>; 1],
}

#[derive(Serialize)]
struct FreeBusyItem<'a> {
    id: &'a str,
}

#[derive(Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: HashMap<String, CalendarBusy>,
}

#[derive(Deserialize)]
struct CalendarBusy {
    #[serde(default)]
    busy: Vec<BusyPeriod>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct BusyPeriod {
    start: String,
    end: String,
}

#[derive(Serialize)]
struct EventBody<'a> {
    summary: &'a str,
    description: &'a str,
    start: EventTime,
    end: EventTime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attendees: Vec<Attendee<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: String,
}

#[derive(Serialize)]
struct Attendee<'a> {
    email: &'a str,
}

#[derive(Deserialize)]
struct CreatedEvent {
    id: Option<String>,
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl HttpCalendar {
    pub fn new(
        base_url: &str,
        calendar_id: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CalendarError> {
        let base_url = Url::parse(base_url).map_err(|e| CalendarError::Url(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(CalendarError::Url(format!("{base_url} cannot be a base")));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            calendar_id: calendar_id.into(),
            token,
        })
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn fetch_busy(&self, window: Span) -> Result<Vec<Span>, CalendarError> {
        let body = FreeBusyRequest {
            time_min: rfc3339(window.start_utc()),
            time_max: rfc3339(window.end_utc()),
            items: [FreeBusyItem {
                id: &self.calendar_id,
            }],
        };
        let resp = self
            .authorized(self.client.post(self.endpoint(&["freeBusy"])))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CalendarError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: FreeBusyResponse = resp.json().await?;
        let entry = parsed.calendars.get(&self.calendar_id).ok_or_else(|| {
            CalendarError::Decode(format!("no entry for calendar {}", self.calendar_id))
        })?;
        if !entry.errors.is_empty() {
            return Err(CalendarError::Decode(format!(
                "calendar reported errors: {}",
                serde_json::Value::Array(entry.errors.clone())
            )));
        }

        let mut spans = Vec::with_capacity(entry.busy.len());
        for period in &entry.busy {
            let start = parse_instant(&period.start)?;
            let end = parse_instant(&period.end)?;
            // Zero-length periods block nothing under half-open overlap.
            if let Some(span) = Span::from_utc(start, end) {
                spans.push(span);
            }
        }
        spans.sort_by_key(|s| s.start);
        Ok(spans)
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, CalendarError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CalendarError::Decode(format!("bad instant '{raw}': {e}")))
}

#[async_trait]
impl Calendar for HttpCalendar {
    async fn busy(&self, window: Span) -> BusyIntervals {
        let started = Instant::now();
        let result = self.fetch_busy(window).await;
        metrics::histogram!(CALENDAR_FETCH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        match result {
            Ok(spans) => {
                tracing::debug!(calendar = %self.calendar_id, busy = spans.len(), "fetched busy intervals");
                BusyIntervals::Known(spans)
            }
            Err(e) => {
                tracing::warn!(calendar = %self.calendar_id, "busy lookup failed: {e}");
                BusyIntervals::Unavailable(e.to_string())
            }
        }
    }

    async fn create_event(&self, event: &CalendarEvent) -> Result<Option<String>, CalendarError> {
        let body = EventBody {
            summary: &event.summary,
            description: &event.description,
            start: EventTime {
                date_time: rfc3339(event.span.start_utc()),
            },
            end: EventTime {
                date_time: rfc3339(event.span.end_utc()),
            },
            attendees: event
                .attendee
                .as_deref()
                .map(|email| Attendee { email })
                .into_iter()
                .collect(),
        };
        let url = self.endpoint(&["calendars", &self.calendar_id, "events"]);
        let resp = self
            .authorized(self.client.post(url))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CalendarError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let created: CreatedEvent = resp
            .json()
            .await
            .map_err(|e| CalendarError::Decode(e.to_string()))?;
        Ok(created.id)
    }
}
