//! Availability decisions for a single resource. Everything here is pure:
//! callers hold the resource lock and pass its state in.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{DAY_MS, RECURRENCE_HORIZON_MS};
use crate::model::*;
use crate::recurrence::Recurrence;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Availability {
    Available,
    Unavailable(Unavailable),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// Why a candidate interval cannot be granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reservations", rename_all = "snake_case")]
pub enum Unavailable {
    /// The resource is switched off for booking.
    Disabled,
    /// Some occurrence falls outside the resource's operating hours.
    OutsideHours,
    /// Overlapping reservations, sorted by id.
    Conflict(Vec<Ulid>),
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::Disabled => f.write_str("resource is disabled"),
            Unavailable::OutsideHours => f.write_str("outside operating hours"),
            Unavailable::Conflict(ids) => {
                write!(f, "conflicts with ")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{id}")?;
                }
                Ok(())
            }
        }
    }
}

/// Decide whether `span` (repeated per `recurrence`) is free on `state`.
/// `exclude` names a reservation to ignore, i.e. the one being replaced.
///
/// Order of checks: disabled, operating hours, overlap.
pub fn evaluate(
    state: &ResourceState,
    span: &Span,
    recurrence: &Recurrence,
    exclude: Option<Ulid>,
) -> Availability {
    if !state.resource.enabled {
        return Availability::Unavailable(Unavailable::Disabled);
    }
    // Every recurrence step preserves the UTC time of day, so the first
    // occurrence speaks for the whole series.
    if let Some(hours) = state.resource.hours
        && !hours.admits(span)
    {
        return Availability::Unavailable(Unavailable::OutsideHours);
    }

    let envelope = Span::new(span.start, recurrence.reach(span).max(span.end));
    let mut conflicts: Vec<Ulid> = state
        .overlapping(&envelope)
        .filter(|r| Some(r.id) != exclude)
        .filter(|r| series_overlap(span, recurrence, &r.span, &r.recurrence))
        .map(|r| r.id)
        .collect();

    if conflicts.is_empty() {
        Availability::Available
    } else {
        conflicts.sort();
        conflicts.dedup();
        Availability::Unavailable(Unavailable::Conflict(conflicts))
    }
}

/// True when any occurrence of series `a` overlaps any occurrence of series `b`.
pub fn series_overlap(a_span: &Span, a: &Recurrence, b_span: &Span, b: &Recurrence) -> bool {
    if !a.is_recurring() && !b.is_recurring() {
        return a_span.overlaps(b_span);
    }

    // Any shared instant lies after both first starts and before both reaches.
    let lo = a_span.start.max(b_span.start);
    let hi = a.reach(a_span).min(b.reach(b_span));
    if lo >= hi {
        return false;
    }
    let hi = if hi == Ms::MAX {
        lo.saturating_add(RECURRENCE_HORIZON_MS)
    } else {
        hi
    };
    let window = Span::new(lo, hi);

    // Walk the sparser side and probe the other.
    let (walk_span, walk, probe_span, probe) = if !a.is_recurring() {
        (a_span, a, b_span, b)
    } else if !b.is_recurring() {
        (b_span, b, a_span, a)
    } else {
        (a_span, a, b_span, b)
    };

    walk.occurrences_within(walk_span, &window)
        .iter()
        .any(|occ| !probe.occurrences_within(probe_span, occ).is_empty())
}

/// Maximal free sub-intervals of `window`: operating hours (or the whole
/// window) minus every occupied occurrence. Disabled resources have none.
pub fn free_windows(state: &ResourceState, window: &Span) -> Vec<Span> {
    if !state.resource.enabled {
        return Vec::new();
    }

    let base = match state.resource.hours {
        Some(hours) => opening_windows(&hours, window),
        None => vec![*window],
    };

    let mut occupied: Vec<Span> = state
        .overlapping(window)
        .flat_map(|r| r.occurrences_within(window))
        .filter_map(|occ| occ.intersect(window))
        .collect();
    occupied.sort_by_key(|s| s.start);
    let occupied = merge_overlapping(&occupied);

    subtract_intervals(&base, &occupied)
}

/// Per-day opening windows clipped to `window`.
fn opening_windows(hours: &OperatingHours, window: &Span) -> Vec<Span> {
    let mut out = Vec::new();
    let mut day = window.start.div_euclid(DAY_MS) * DAY_MS;
    while day < window.end {
        if let Some(open) = hours.window_on_day_of(day).intersect(window) {
            out.push(open);
        }
        day += DAY_MS;
    }
    out
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    for &span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// `base` minus `to_remove`; both sorted and internally disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut first = 0;

    for b in base {
        let mut cursor = b.start;
        while first < to_remove.len() && to_remove[first].end <= cursor {
            first += 1;
        }
        for r in to_remove[first..].iter().take_while(|r| r.start < b.end) {
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
        }
        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;
    /// 2024-01-01T00:00:00Z
    const JAN1: Ms = 1_704_067_200_000;

    fn state(hours: Option<OperatingHours>, enabled: bool) -> ResourceState {
        ResourceState::new(Resource {
            id: Ulid::new(),
            name: "R".into(),
            capacity: 10,
            hours,
            enabled,
            location: None,
            description: None,
            created_at: 0,
            updated_at: 0,
        })
    }

    fn book(rs: &mut ResourceState, start: Ms, end: Ms, recurrence: Recurrence) -> Ulid {
        let id = Ulid::new();
        rs.insert(Reservation {
            id,
            resource_id: rs.id(),
            owner_id: Ulid::new(),
            subject_id: None,
            title: "t".into(),
            description: None,
            span: Span::new(start, end),
            recurrence,
            created_at: 0,
            updated_at: 0,
        });
        id
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn partial_overlap_conflicts() {
        let mut rs = state(None, true);
        let existing = book(&mut rs, JAN1 + 10 * H, JAN1 + 11 * H, Recurrence::NONE);
        let result = evaluate(
            &rs,
            &Span::new(JAN1 + 10 * H + 30 * M, JAN1 + 11 * H + 30 * M),
            &Recurrence::NONE,
            None,
        );
        assert_eq!(result, Availability::Unavailable(Unavailable::Conflict(vec![existing])));
    }

    #[test]
    fn touching_endpoints_are_free() {
        let mut rs = state(None, true);
        book(&mut rs, JAN1 + 10 * H, JAN1 + 11 * H, Recurrence::NONE);
        let after = Span::new(JAN1 + 11 * H, JAN1 + 12 * H);
        let before = Span::new(JAN1 + 9 * H, JAN1 + 10 * H);
        assert!(evaluate(&rs, &after, &Recurrence::NONE, None).is_available());
        assert!(evaluate(&rs, &before, &Recurrence::NONE, None).is_available());
        let straddle = Span::new(JAN1 + 10 * H + 59 * M, JAN1 + 11 * H + M);
        assert!(!evaluate(&rs, &straddle, &Recurrence::NONE, None).is_available());
    }

    #[test]
    fn disabled_wins_over_everything() {
        let rs = state(None, false);
        let result = evaluate(&rs, &Span::new(JAN1, JAN1 + H), &Recurrence::NONE, None);
        assert_eq!(result, Availability::Unavailable(Unavailable::Disabled));
    }

    #[test]
    fn outside_hours_rejected() {
        let hours = OperatingHours::new(8 * 3600, 21 * 3600).unwrap();
        let rs = state(Some(hours), true);
        let late = Span::new(JAN1 + 20 * H, JAN1 + 22 * H);
        assert_eq!(
            evaluate(&rs, &late, &Recurrence::NONE, None),
            Availability::Unavailable(Unavailable::OutsideHours)
        );
        let inside = Span::new(JAN1 + 8 * H, JAN1 + 21 * H);
        assert!(evaluate(&rs, &inside, &Recurrence::NONE, None).is_available());
    }

    #[test]
    fn excluded_reservation_does_not_conflict_with_itself() {
        let mut rs = state(None, true);
        let id = book(&mut rs, JAN1 + 10 * H, JAN1 + 11 * H, Recurrence::NONE);
        let moved = Span::new(JAN1 + 10 * H + 30 * M, JAN1 + 11 * H + 30 * M);
        assert!(evaluate(&rs, &moved, &Recurrence::NONE, Some(id)).is_available());
    }

    #[test]
    fn conflicts_reported_sorted() {
        let mut rs = state(None, true);
        let a = book(&mut rs, JAN1, JAN1 + H, Recurrence::NONE);
        let b = book(&mut rs, JAN1 + H, JAN1 + 2 * H, Recurrence::NONE);
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(
            evaluate(&rs, &Span::new(JAN1, JAN1 + 2 * H), &Recurrence::NONE, None),
            Availability::Unavailable(Unavailable::Conflict(expected))
        );
    }

    #[test]
    fn weekly_series_blocks_future_single() {
        let mut rs = state(None, true);
        let series = book(&mut rs, JAN1 + 10 * H, JAN1 + 11 * H, Recurrence::weekly(None));
        // Five weeks later, same time.
        let later = Span::new(JAN1 + 35 * 24 * H + 10 * H, JAN1 + 35 * 24 * H + 11 * H);
        assert_eq!(
            evaluate(&rs, &later, &Recurrence::NONE, None),
            Availability::Unavailable(Unavailable::Conflict(vec![series]))
        );
        // A day after an occurrence is free.
        let off_day = Span::new(later.start + 24 * H, later.end + 24 * H);
        assert!(evaluate(&rs, &off_day, &Recurrence::NONE, None).is_available());
    }

    #[test]
    fn ended_series_no_longer_blocks() {
        let mut rs = state(None, true);
        book(
            &mut rs,
            JAN1 + 10 * H,
            JAN1 + 11 * H,
            Recurrence::weekly(Some(date("2024-01-15"))),
        );
        let after_end = Span::new(JAN1 + 21 * 24 * H + 10 * H, JAN1 + 21 * 24 * H + 11 * H);
        assert!(evaluate(&rs, &after_end, &Recurrence::NONE, None).is_available());
    }

    #[test]
    fn recurring_candidate_hits_future_single() {
        let mut rs = state(None, true);
        let single = book(
            &mut rs,
            JAN1 + 14 * 24 * H + 10 * H,
            JAN1 + 14 * 24 * H + 11 * H,
            Recurrence::NONE,
        );
        let result = evaluate(
            &rs,
            &Span::new(JAN1 + 10 * H, JAN1 + 11 * H),
            &Recurrence::daily(None),
            None,
        );
        assert_eq!(result, Availability::Unavailable(Unavailable::Conflict(vec![single])));
    }

    #[test]
    fn interleaved_series_do_not_conflict() {
        // Mondays vs Tuesdays, both open-ended.
        let monday = Span::new(JAN1 + 10 * H, JAN1 + 11 * H);
        let tuesday = Span::new(monday.start + 24 * H, monday.end + 24 * H);
        assert!(!series_overlap(
            &monday,
            &Recurrence::weekly(None),
            &tuesday,
            &Recurrence::weekly(None)
        ));
        // Daily hits every Tuesday.
        assert!(series_overlap(
            &monday,
            &Recurrence::daily(None),
            &tuesday,
            &Recurrence::weekly(None)
        ));
    }

    #[test]
    fn free_windows_respect_hours_and_bookings() {
        let hours = OperatingHours::new(8 * 3600, 12 * 3600).unwrap();
        let mut rs = state(Some(hours), true);
        book(&mut rs, JAN1 + 9 * H, JAN1 + 10 * H, Recurrence::daily(None));
        let free = free_windows(&rs, &Span::new(JAN1, JAN1 + 48 * H));
        assert_eq!(
            free,
            vec![
                Span::new(JAN1 + 8 * H, JAN1 + 9 * H),
                Span::new(JAN1 + 10 * H, JAN1 + 12 * H),
                Span::new(JAN1 + 32 * H, JAN1 + 33 * H),
                Span::new(JAN1 + 34 * H, JAN1 + 36 * H),
            ]
        );
    }

    #[test]
    fn free_windows_empty_when_disabled() {
        let rs = state(None, false);
        assert!(free_windows(&rs, &Span::new(JAN1, JAN1 + H)).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let result = subtract_intervals(&[Span::new(100, 300)], &[Span::new(150, 200)]);
        assert_eq!(result, vec![Span::new(100, 150), Span::new(200, 300)]);
    }

    #[test]
    fn subtract_multiple_bases() {
        let base = [Span::new(0, 100), Span::new(200, 300)];
        let remove = [Span::new(50, 250)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(0, 50), Span::new(250, 300)]
        );
    }

    #[test]
    fn subtract_full_overlap() {
        assert!(subtract_intervals(&[Span::new(100, 200)], &[Span::new(50, 250)]).is_empty());
    }

    #[test]
    fn merge_adjacent_and_overlapping() {
        let spans = [Span::new(100, 200), Span::new(200, 300), Span::new(250, 400), Span::new(500, 600)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 400), Span::new(500, 600)]
        );
    }
}
