use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{DAY_MS, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::recurrence::Recurrence;

/// Unix milliseconds. The only time type inside the ledger.
pub type Ms = i64;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for caller-supplied bounds.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersect(&self, other: &Span) -> Option<Span> {
        Span::try_new(self.start.max(other.start), self.end.min(other.end))
    }
}

/// Daily opening window, in seconds after midnight UTC. `open < close <= 86_400`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatingHours {
    pub open: u32,
    pub close: u32,
}

impl OperatingHours {
    pub fn new(open: u32, close: u32) -> Option<Self> {
        (open < close && close <= 86_400).then_some(Self { open, close })
    }

    /// The opening window on the UTC day containing `t`.
    pub fn window_on_day_of(&self, t: Ms) -> Span {
        let day = t.div_euclid(DAY_MS) * DAY_MS;
        Span::new(
            day + Ms::from(self.open) * 1000,
            day + Ms::from(self.close) * 1000,
        )
    }

    /// True when `span` sits inside a single day's opening window.
    pub fn admits(&self, span: &Span) -> bool {
        self.window_on_day_of(span.start).contains_span(span)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub hours: Option<OperatingHours>,
    pub enabled: bool,
    pub location: Option<String>,
    pub description: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Administrator-supplied fields of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub name: String,
    pub capacity: u32,
    pub hours: Option<OperatingHours>,
    pub enabled: bool,
    pub location: Option<String>,
    pub description: Option<String>,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            name: name.into(),
            capacity,
            hours: None,
            enabled: true,
            location: None,
            description: None,
        }
    }

    pub fn with_hours(mut self, hours: OperatingHours) -> Self {
        self.hours = Some(hours);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub owner_id: Ulid,
    pub subject_id: Option<Ulid>,
    pub title: String,
    pub description: Option<String>,
    pub span: Span,
    pub recurrence: Recurrence,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    /// End of the last occurrence (or of the single interval).
    pub fn reach(&self) -> Ms {
        self.recurrence.reach(&self.span)
    }

    pub fn occurrences_within(&self, window: &Span) -> Vec<Span> {
        self.recurrence.occurrences_within(&self.span, window)
    }
}

/// Caller-supplied fields of a reservation, used for both create and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDraft {
    /// Client-chosen id for idempotent retries; generated when absent.
    pub id: Option<Ulid>,
    pub resource_id: Ulid,
    pub subject_id: Option<Ulid>,
    pub title: String,
    pub description: Option<String>,
    pub span: Span,
    pub recurrence: Recurrence,
}

impl ReservationDraft {
    pub fn new(resource_id: Ulid, title: impl Into<String>, span: Span) -> Self {
        Self {
            id: None,
            resource_id,
            subject_id: None,
            title: title.into(),
            description: None,
            span,
            recurrence: Recurrence::NONE,
        }
    }

    pub fn with_id(mut self, id: Ulid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }

    pub fn with_subject(mut self, subject_id: Ulid) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One materialized occurrence of a reservation, for calendar views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub reservation_id: Ulid,
    pub span: Span,
}

/// A reservation held in memory together with its reach, so range scans can
/// skip series that ended before the query window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub reservation: Reservation,
    pub reach: Ms,
}

impl Entry {
    pub fn new(reservation: Reservation) -> Self {
        let reach = reservation.reach();
        Self { reservation, reach }
    }
}

/// In-memory state of one resource: its catalog record plus every
/// reservation on it, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    pub entries: Vec<Entry>,
}

impl ResourceState {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            entries: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.resource.id
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let entry = Entry::new(reservation);
        let pos = self
            .entries
            .binary_search_by_key(&entry.reservation.span.start, |e| e.reservation.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.entries.iter().position(|e| e.reservation.id == id)?;
        Some(self.entries.remove(pos).reservation)
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.entries
            .iter()
            .map(|e| &e.reservation)
            .find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.entries.iter().map(|e| &e.reservation)
    }

    /// Reservations with at least one occurrence that may overlap `query`.
    /// Binary search skips everything starting at or after `query.end`; the
    /// reach filter drops series that ended before `query.start`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .entries
            .partition_point(|e| e.reservation.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.reach > query.start)
            .map(|e| &e.reservation)
    }
}

/// One flat variant per mutation. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        resource: Resource,
    },
    ResourceUpdated {
        resource: Resource,
    },
    ResourceDeleted {
        id: Ulid,
    },
    ReservationCommitted {
        reservation: Reservation,
    },
    ReservationUpdated {
        previous_resource_id: Ulid,
        reservation: Reservation,
    },
    ReservationCancelled {
        id: Ulid,
        resource_id: Ulid,
    },
}

/// Offset/limit pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}
