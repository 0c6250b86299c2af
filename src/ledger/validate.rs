//! Store-free request checks. Everything here runs before any lock is taken.

use crate::error::{Error, Result};
use crate::limits::*;
use crate::model::*;
use crate::recurrence::Recurrence;

fn in_timestamp_range(span: &Span) -> Result<()> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(Error::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<()> {
    if span.start >= span.end {
        return Err(Error::invalid("end time must be after start time"));
    }
    in_timestamp_range(span)?;
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(Error::LimitExceeded("interval too long"));
    }
    Ok(())
}

/// Query windows may be wider than a single booking, within reason.
pub(crate) fn validate_window(window: &Span) -> Result<()> {
    if window.start >= window.end {
        return Err(Error::invalid("window end must be after its start"));
    }
    in_timestamp_range(window)?;
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(Error::LimitExceeded("query window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_schedule(span: &Span, recurrence: &Recurrence) -> Result<()> {
    validate_span(span)?;
    recurrence.validate(span)
}

fn required_text(field: &str, value: &str, max: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid(format!("{field} is required")));
    }
    optional_text(field, Some(value), max)
}

fn optional_text(field: &str, value: Option<&str>, max: usize) -> Result<()> {
    match value {
        Some(v) if v.len() > max => Err(Error::invalid(format!(
            "{field} exceeds {max} bytes"
        ))),
        _ => Ok(()),
    }
}

/// Text fields of a reservation draft. The schedule is checked separately
/// because an update that keeps it unchanged skips that check.
pub(crate) fn validate_draft_text(draft: &ReservationDraft) -> Result<()> {
    required_text("title", &draft.title, MAX_TITLE_LEN)?;
    optional_text("description", draft.description.as_deref(), MAX_TEXT_LEN)
}

/// Names are compared exactly, so surrounding whitespace is refused rather
/// than silently kept.
pub(crate) fn validate_resource_spec(spec: &ResourceSpec) -> Result<()> {
    required_text("name", &spec.name, MAX_NAME_LEN)?;
    if spec.name.trim() != spec.name {
        return Err(Error::invalid("name must not start or end with whitespace"));
    }
    if spec.capacity == 0 {
        return Err(Error::invalid("capacity must be positive"));
    }
    optional_text("location", spec.location.as_deref(), MAX_NAME_LEN)?;
    optional_text("description", spec.description.as_deref(), MAX_TEXT_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;

    #[test]
    fn span_rules() {
        assert!(validate_span(&Span { start: 10, end: 10 }).is_err());
        assert!(validate_span(&Span { start: 10, end: 5 }).is_err());
        assert!(matches!(
            validate_span(&Span::new(-1, H)),
            Err(Error::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(0, MAX_SPAN_DURATION_MS + 1)),
            Err(Error::LimitExceeded(_))
        ));
        assert!(validate_span(&Span::new(0, H)).is_ok());
    }

    #[test]
    fn window_rules() {
        assert!(validate_window(&Span::new(0, MAX_QUERY_WINDOW_MS)).is_ok());
        assert!(validate_window(&Span::new(0, MAX_QUERY_WINDOW_MS + 1)).is_err());
    }

    #[test]
    fn window_outside_timestamp_range_rejected() {
        assert!(matches!(
            validate_window(&Span::new(Ms::MAX - 1000, Ms::MAX)),
            Err(Error::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_window(&Span::new(Ms::MIN, Ms::MIN + 1000)),
            Err(Error::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_window(&Span::new(MAX_VALID_TIMESTAMP_MS - H, MAX_VALID_TIMESTAMP_MS + 1)),
            Err(Error::LimitExceeded(_))
        ));
        assert!(validate_window(&Span::new(MAX_VALID_TIMESTAMP_MS - H, MAX_VALID_TIMESTAMP_MS)).is_ok());
    }

    #[test]
    fn blank_title_rejected() {
        let draft = ReservationDraft::new(Ulid::new(), "   ", Span::new(0, H));
        assert!(matches!(
            validate_draft_text(&draft),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn resource_spec_rules() {
        assert!(validate_resource_spec(&ResourceSpec::new("Hall", 1)).is_ok());
        assert!(validate_resource_spec(&ResourceSpec::new("Hall", 0)).is_err());
        assert!(validate_resource_spec(&ResourceSpec::new("", 5)).is_err());
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(validate_resource_spec(&ResourceSpec::new(long, 5)).is_err());
    }

    #[test]
    fn padded_resource_name_rejected() {
        for name in ["Hall ", " Hall", "\tHall\n"] {
            assert!(matches!(
                validate_resource_spec(&ResourceSpec::new(name, 5)),
                Err(Error::InvalidRequest(_))
            ));
        }
        assert!(validate_resource_spec(&ResourceSpec::new("Fellowship Hall", 5)).is_ok());
    }
}
