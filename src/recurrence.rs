//! Recurring series: a reservation is stored once and expanded into
//! occurrences on demand.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limits::{DAY_MS, MAX_OCCURRENCES};
use crate::model::{Ms, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceKind {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl RecurrenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceKind::None => "none",
            RecurrenceKind::Daily => "daily",
            RecurrenceKind::Weekly => "weekly",
            RecurrenceKind::Monthly => "monthly",
        }
    }

    /// Fixed step for the kinds that have one. Monthly steps are calendar
    /// arithmetic and have no fixed length.
    fn fixed_step(&self) -> Option<Ms> {
        match self {
            RecurrenceKind::Daily => Some(DAY_MS),
            RecurrenceKind::Weekly => Some(7 * DAY_MS),
            RecurrenceKind::None | RecurrenceKind::Monthly => None,
        }
    }
}

impl fmt::Display for RecurrenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecurrenceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "none" => Ok(RecurrenceKind::None),
            "daily" => Ok(RecurrenceKind::Daily),
            "weekly" => Ok(RecurrenceKind::Weekly),
            "monthly" => Ok(RecurrenceKind::Monthly),
            other => Err(Error::invalid(format!("unknown recurrence kind: {other}"))),
        }
    }
}

/// Repetition pattern of a reservation. Occurrence `k` starts `k` steps
/// after the first one and keeps its duration; the series includes every
/// occurrence whose UTC start date is on or before `until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Recurrence {
    pub kind: RecurrenceKind,
    pub until: Option<NaiveDate>,
}

impl Recurrence {
    pub const NONE: Recurrence = Recurrence {
        kind: RecurrenceKind::None,
        until: None,
    };

    /// An end date only means something for a repeating kind; it is dropped otherwise.
    pub fn new(kind: RecurrenceKind, until: Option<NaiveDate>) -> Self {
        match kind {
            RecurrenceKind::None => Recurrence::NONE,
            _ => Self { kind, until },
        }
    }

    pub fn daily(until: Option<NaiveDate>) -> Self {
        Self::new(RecurrenceKind::Daily, until)
    }

    pub fn weekly(until: Option<NaiveDate>) -> Self {
        Self::new(RecurrenceKind::Weekly, until)
    }

    pub fn monthly(until: Option<NaiveDate>) -> Self {
        Self::new(RecurrenceKind::Monthly, until)
    }

    pub fn is_recurring(&self) -> bool {
        self.kind != RecurrenceKind::None
    }

    pub fn is_open_ended(&self) -> bool {
        self.is_recurring() && self.until.is_none()
    }

    pub fn validate(&self, span: &Span) -> Result<()> {
        let Some(until) = self.until else {
            return Ok(());
        };
        if !self.is_recurring() {
            return Ok(());
        }
        let start_date = utc_date(span.start)?;
        if until < start_date {
            return Err(Error::invalid(format!(
                "recurrence end date {until} is before the start date {start_date}"
            )));
        }
        match self.last_index(span)? {
            Some(last) if last as usize >= MAX_OCCURRENCES => {
                Err(Error::LimitExceeded("recurring series too long"))
            }
            _ => Ok(()),
        }
    }

    /// Index of the final occurrence, `None` for an open-ended series.
    fn last_index(&self, span: &Span) -> Result<Option<u32>> {
        let Some(until) = self.until else {
            return Ok(match self.kind {
                RecurrenceKind::None => Some(0),
                _ => None,
            });
        };
        let start_date = utc_date(span.start)?;
        let days = (until - start_date).num_days().max(0);
        let last = match self.kind {
            RecurrenceKind::None => 0,
            RecurrenceKind::Daily => days,
            RecurrenceKind::Weekly => days / 7,
            RecurrenceKind::Monthly => {
                let months = month_index(until) - month_index(start_date);
                let months = months.max(0);
                // A clamped start (e.g. the 31st) can still land after `until`.
                let landing = match self.nth_start(span, months as u32) {
                    Some(s) => Some(utc_date(s)?),
                    None => None,
                };
                match landing {
                    Some(d) if d > until => months - 1,
                    _ => months,
                }
            }
        };
        Ok(Some(u32::try_from(last.max(0)).unwrap_or(u32::MAX)))
    }

    fn nth_start(&self, span: &Span, k: u32) -> Option<Ms> {
        if k == 0 {
            return Some(span.start);
        }
        match self.kind {
            RecurrenceKind::None => None,
            RecurrenceKind::Daily | RecurrenceKind::Weekly => {
                let step = self.kind.fixed_step()?;
                span.start.checked_add(step.checked_mul(k as Ms)?)
            }
            RecurrenceKind::Monthly => {
                let first = DateTime::<Utc>::from_timestamp_millis(span.start)?;
                first
                    .checked_add_months(Months::new(k))
                    .map(|dt| dt.timestamp_millis())
            }
        }
    }

    /// The `k`-th occurrence, or `None` past the end of the series.
    pub fn occurrence(&self, span: &Span, k: u32) -> Option<Span> {
        let last = self.last_index(span).ok()?;
        if last.is_some_and(|last| k > last) {
            return None;
        }
        let start = self.nth_start(span, k)?;
        let end = start.checked_add(span.duration_ms())?;
        Some(Span::new(start, end))
    }

    /// End of the last occurrence; `Ms::MAX` for an open-ended series.
    pub fn reach(&self, span: &Span) -> Ms {
        match self.last_index(span) {
            Ok(Some(last)) => self
                .occurrence(span, last)
                .map_or(span.end, |occ| occ.end),
            Ok(None) | Err(_) => Ms::MAX,
        }
    }

    /// Every occurrence of the series overlapping `window`, in start order.
    pub fn occurrences_within(&self, span: &Span, window: &Span) -> Vec<Span> {
        if !self.is_recurring() {
            return if span.overlaps(window) {
                vec![*span]
            } else {
                Vec::new()
            };
        }

        let first_k = match self.kind.fixed_step() {
            Some(step) if window.start > span.end => (window.start - span.end) / step,
            Some(_) => 0,
            None => {
                // Monthly: start one month early so clamping can't skip a hit.
                match (utc_date(span.start), utc_date(window.start)) {
                    (Ok(first), Ok(from)) => (month_index(from) - month_index(first) - 1).max(0),
                    _ => 0,
                }
            }
        };

        let mut out = Vec::new();
        let mut k = u32::try_from(first_k).unwrap_or(u32::MAX);
        while let Some(occ) = self.occurrence(span, k) {
            if occ.start >= window.end {
                break;
            }
            if occ.overlaps(window) {
                out.push(occ);
            }
            k = match k.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }
        out
    }
}

pub(crate) fn utc_date(ms: Ms) -> Result<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| Error::invalid(format!("timestamp out of range: {ms}")))
}

fn month_index(date: NaiveDate) -> i64 {
    use chrono::Datelike;
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    fn ms(s: &str) -> Ms {
        DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn kind_parses_known_names() {
        assert_eq!("weekly".parse::<RecurrenceKind>().unwrap(), RecurrenceKind::Weekly);
        assert_eq!("".parse::<RecurrenceKind>().unwrap(), RecurrenceKind::None);
        assert!("fortnightly".parse::<RecurrenceKind>().is_err());
    }

    #[test]
    fn none_drops_until() {
        let r = Recurrence::new(RecurrenceKind::None, Some(date("2024-02-01")));
        assert_eq!(r, Recurrence::NONE);
    }

    #[test]
    fn weekly_occurrences_stop_at_until() {
        let span = Span::new(ms("2024-01-01T10:00:00Z"), ms("2024-01-01T11:00:00Z"));
        let r = Recurrence::weekly(Some(date("2024-01-22")));
        let window = Span::new(ms("2023-12-01T00:00:00Z"), ms("2024-03-01T00:00:00Z"));
        let occ = r.occurrences_within(&span, &window);
        assert_eq!(occ.len(), 4);
        assert_eq!(occ[3].start, ms("2024-01-22T10:00:00Z"));
        assert_eq!(r.reach(&span), ms("2024-01-22T11:00:00Z"));
    }

    #[test]
    fn daily_window_skips_ahead() {
        let span = Span::new(ms("2024-01-01T09:00:00Z"), ms("2024-01-01T10:00:00Z"));
        let r = Recurrence::daily(None);
        let window = Span::new(ms("2024-06-15T00:00:00Z"), ms("2024-06-16T00:00:00Z"));
        let occ = r.occurrences_within(&span, &window);
        assert_eq!(occ, vec![Span::new(ms("2024-06-15T09:00:00Z"), ms("2024-06-15T10:00:00Z"))]);
        assert_eq!(r.reach(&span), Ms::MAX);
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let span = Span::new(ms("2024-01-31T18:00:00Z"), ms("2024-01-31T19:00:00Z"));
        let r = Recurrence::monthly(Some(date("2024-04-30")));
        let window = Span::new(ms("2024-01-01T00:00:00Z"), ms("2024-12-31T00:00:00Z"));
        let starts: Vec<_> = r
            .occurrences_within(&span, &window)
            .into_iter()
            .map(|s| s.start)
            .collect();
        assert_eq!(
            starts,
            vec![
                ms("2024-01-31T18:00:00Z"),
                ms("2024-02-29T18:00:00Z"),
                ms("2024-03-31T18:00:00Z"),
                ms("2024-04-30T18:00:00Z"),
            ]
        );
    }

    #[test]
    fn monthly_window_far_in_future() {
        let span = Span::new(ms("2024-01-10T18:00:00Z"), ms("2024-01-10T19:00:00Z"));
        let r = Recurrence::monthly(None);
        let window = Span::new(ms("2030-05-01T00:00:00Z"), ms("2030-06-01T00:00:00Z"));
        let occ = r.occurrences_within(&span, &window);
        assert_eq!(occ, vec![Span::new(ms("2030-05-10T18:00:00Z"), ms("2030-05-10T19:00:00Z"))]);
    }

    #[test]
    fn until_before_start_rejected() {
        let span = Span::new(ms("2024-03-01T10:00:00Z"), ms("2024-03-01T11:00:00Z"));
        let err = Recurrence::weekly(Some(date("2024-02-28"))).validate(&span).unwrap_err();
        assert!(err.to_string().contains("before the start date"));
    }

    #[test]
    fn until_on_start_date_is_single_occurrence() {
        let span = Span::new(ms("2024-03-01T10:00:00Z"), ms("2024-03-01T11:00:00Z"));
        let r = Recurrence::daily(Some(date("2024-03-01")));
        r.validate(&span).unwrap();
        assert_eq!(r.reach(&span), span.end);
        assert!(r.occurrence(&span, 1).is_none());
    }

    #[test]
    fn oversized_series_rejected() {
        let span = Span::new(0, H);
        let r = Recurrence::daily(Some(date("2000-01-01")));
        assert!(matches!(r.validate(&span), Err(Error::LimitExceeded(_))));
    }

    #[test]
    fn single_reservation_has_one_occurrence() {
        let span = Span::new(10 * H, 11 * H);
        assert_eq!(Recurrence::NONE.reach(&span), 11 * H);
        assert_eq!(
            Recurrence::NONE.occurrences_within(&span, &Span::new(0, 24 * H)),
            vec![span]
        );
        assert!(Recurrence::NONE
            .occurrences_within(&span, &Span::new(11 * H, 12 * H))
            .is_empty());
    }
}
