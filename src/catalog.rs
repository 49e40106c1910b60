//! Static business configuration: the fixed daily slot grid and the service list.
//!
//! The grid is the same for every day and every service; only the selected
//! service's duration changes the end of a slot.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use thiserror::Error;

use crate::limits::*;
use crate::model::{Service, ServiceCategory};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalogue: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalogue: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("slot grid must not be empty")]
    EmptyGrid,
    #[error("invalid slot time '{0}', expected HH:MM")]
    BadSlot(String),
    #[error("slot {0} is not after the previous slot")]
    UnorderedSlots(String),
    #[error("duplicate service id '{0}'")]
    DuplicateService(String),
    #[error("invalid service '{id}': {reason}")]
    InvalidService { id: String, reason: &'static str },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

/// One candidate start time of the daily grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    label: String,
    time: NaiveTime,
}

impl Slot {
    fn new(time: NaiveTime) -> Self {
        Self {
            label: format_label(time),
            time,
        }
    }

    /// Wall-clock label, e.g. `9:00 AM`.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn time(&self) -> NaiveTime {
        self.time
    }

    /// The instant this slot starts on `date` in the business time zone.
    ///
    /// Ambiguous local times (DST fall-back) resolve to the earlier instant;
    /// times skipped by a DST jump have no instant and return `None`.
    pub fn start_on(&self, date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
        tz.from_local_datetime(&date.and_time(self.time))
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Render a time of day as a 12-hour label without a leading zero.
pub fn format_label(time: NaiveTime) -> String {
    time.format("%-I:%M %p").to_string()
}

/// Fixed, ordered, non-empty sequence of candidate start times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGrid {
    slots: Vec<Slot>,
}

impl SlotGrid {
    pub fn new(times: impl IntoIterator<Item = NaiveTime>) -> Result<Self, CatalogError> {
        let mut slots: Vec<Slot> = Vec::new();
        for time in times {
            if slots.last().is_some_and(|prev| prev.time >= time) {
                return Err(CatalogError::UnorderedSlots(format_label(time)));
            }
            slots.push(Slot::new(time));
        }
        if slots.is_empty() {
            return Err(CatalogError::EmptyGrid);
        }
        if slots.len() > MAX_SLOTS_PER_DAY {
            return Err(CatalogError::LimitExceeded("too many slots per day"));
        }
        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(Slot::label)
    }

    /// Look up a slot by its exact label.
    pub fn find(&self, label: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.label == label)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    slots: Vec<String>,
    services: Vec<Service>,
}

/// Services plus the slot grid. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Catalog {
    services: Vec<Service>,
    grid: SlotGrid,
}

const BUILTIN_SLOTS: [(u32, u32); 6] = [(9, 0), (10, 0), (11, 30), (13, 0), (14, 30), (16, 0)];

impl Catalog {
    pub fn new(services: Vec<Service>, grid: SlotGrid) -> Result<Self, CatalogError> {
        if services.len() > MAX_SERVICES {
            return Err(CatalogError::LimitExceeded("too many services"));
        }
        let mut seen = HashSet::new();
        for s in &services {
            if s.id.trim().is_empty() {
                return Err(CatalogError::InvalidService {
                    id: s.id.clone(),
                    reason: "empty id",
                });
            }
            if s.duration_minutes == 0 || s.duration_minutes > MAX_SERVICE_MINUTES {
                return Err(CatalogError::InvalidService {
                    id: s.id.clone(),
                    reason: "duration out of range",
                });
            }
            if !seen.insert(s.id.as_str()) {
                return Err(CatalogError::DuplicateService(s.id.clone()));
            }
        }
        Ok(Self { services, grid })
    }

    /// The salon's default menu and opening grid.
    pub fn builtin() -> Self {
        let grid = SlotGrid {
            slots: BUILTIN_SLOTS
                .iter()
                .filter_map(|&(h, m)| NaiveTime::from_hms_opt(h, m, 0))
                .map(Slot::new)
                .collect(),
        };
        let service = |id: &str, name: &str, minutes, price, description: &str, category| Service {
            id: id.into(),
            name: name.into(),
            duration_minutes: minutes,
            price_start: price,
            description: description.into(),
            category,
        };
        let services = vec![
            service("womens-cut", "Women's Cut", 45, 65, "Customized shape & style for your face shape.", ServiceCategory::Cut),
            service("mens-cut", "Men's Grooming", 30, 45, "Precision cut, wash, and style.", ServiceCategory::Cut),
            service("balayage", "Balayage", 180, 220, "Hand-painted dimension for a natural, sun-kissed look.", ServiceCategory::Color),
            service("perm", "Permanent Wave", 120, 150, "Add long-lasting texture and body.", ServiceCategory::Style),
            service("blowout", "Luxury Blowout", 45, 55, "Wash, scalp massage, and professional blowout.", ServiceCategory::Style),
        ];
        Self { services, grid }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(s)?;
        let times = file
            .slots
            .iter()
            .map(|raw| {
                NaiveTime::parse_from_str(raw.trim(), "%H:%M")
                    .map_err(|_| CatalogError::BadSlot(raw.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(file.services, SlotGrid::new(times)?)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn grid(&self) -> &SlotGrid {
        &self.grid
    }
}
