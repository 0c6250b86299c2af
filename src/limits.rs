use crate::model::Ms;

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_TEXT_LEN: usize = 4096;

/// Largest encoded WAL entry. Every event is far smaller, so a longer length
/// prefix can only come from a torn or corrupt tail.
pub const MAX_EVENT_BYTES: usize = 1 << 20;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_000;

pub const MAX_SPAN_DURATION_MS: Ms = 31 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 400 * DAY_MS;

/// Upper bound on the materialized size of a single recurring series.
pub const MAX_OCCURRENCES: usize = 5_000;
/// Comparison window for two open-ended series, measured from the later start.
pub const RECURRENCE_HORIZON_MS: Ms = 2 * 366 * DAY_MS;

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 500;

pub const DAY_MS: Ms = 86_400_000;
