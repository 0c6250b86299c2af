use std::sync::Arc;
use std::time::Instant;

use ulid::Ulid;

use crate::auth::{Principal, Role};
use crate::error::{Error, ErrorKind, Result};
use crate::ledger::Ledger;
use crate::model::*;
use crate::notify::{BookingOutcome, Operation, OutcomeHub, Verdict};
use crate::observability::{self, operation_label};
use crate::oracle::Availability;
use crate::recurrence::Recurrence;

/// Entry point for request handlers. Authorizes the caller, drives the
/// ledger's check-then-commit and reports every attempt.
pub struct BookingCoordinator {
    ledger: Arc<Ledger>,
    outcomes: Arc<OutcomeHub>,
}

impl BookingCoordinator {
    pub fn new(ledger: Arc<Ledger>, outcomes: Arc<OutcomeHub>) -> Self {
        Self { ledger, outcomes }
    }

    /// Read-only queries go straight to the ledger.
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn outcomes(&self) -> &Arc<OutcomeHub> {
        &self.outcomes
    }

    // ── Availability ─────────────────────────────────────────

    pub async fn check_availability(&self, resource_id: Ulid, span: Span) -> Result<Availability> {
        self.check_series_availability(resource_id, span, Recurrence::NONE)
            .await
    }

    pub async fn check_series_availability(
        &self,
        resource_id: Ulid,
        span: Span,
        recurrence: Recurrence,
    ) -> Result<Availability> {
        let result = self.ledger.availability(resource_id, span, recurrence).await;
        let label = match &result {
            Ok(a) if a.is_available() => "available",
            Ok(_) => "unavailable",
            Err(e) => e.kind().as_str(),
        };
        metrics::counter!(observability::AVAILABILITY_CHECKS_TOTAL, "result" => label).increment(1);
        result
    }

    /// Enabled resources free for `span` with at least `min_capacity` seats.
    /// A minimum below one is treated as one.
    pub async fn list_available(&self, span: Span, min_capacity: u32) -> Result<Vec<Resource>> {
        self.ledger
            .available_resources(span, Recurrence::NONE, min_capacity.max(1))
            .await
    }

    // ── Reservations ─────────────────────────────────────────

    pub async fn create_reservation(
        &self,
        principal: &Principal,
        draft: ReservationDraft,
    ) -> Result<Reservation> {
        let started = Instant::now();
        let resource_id = draft.resource_id;
        let requested_id = draft.id;

        let result = match principal.require_role(Role::Member) {
            Ok(()) => self.ledger.commit_reservation(principal.id, draft).await,
            Err(e) => Err(e),
        };

        let reservation_id = result.as_ref().map(|r| r.id).ok().or(requested_id);
        self.report(Operation::Create, &[resource_id], reservation_id, &result, started);
        result
    }

    /// Replace a reservation's fields. A move between resources is reported
    /// on both resources.
    pub async fn update_reservation(
        &self,
        principal: &Principal,
        id: Ulid,
        draft: ReservationDraft,
    ) -> Result<Reservation> {
        let started = Instant::now();
        let previous = self.ledger.resource_of(id);
        let target = draft.resource_id;

        let result = self.ledger.replace_reservation(principal, id, draft).await;

        let mut resources = vec![target];
        if let Some(previous) = previous
            && previous != target
        {
            resources.push(previous);
        }
        self.report(Operation::Update, &resources, Some(id), &result, started);
        result
    }

    pub async fn delete_reservation(&self, principal: &Principal, id: Ulid) -> Result<()> {
        let started = Instant::now();
        let known = self.ledger.resource_of(id);

        let result = self.ledger.cancel_reservation(principal, id).await;

        let resource = result.as_ref().map(|r| r.resource_id).ok().or(known);
        self.report(
            Operation::Delete,
            resource.as_slice(),
            Some(id),
            &result,
            started,
        );
        result.map(|_| ())
    }

    fn report<T>(
        &self,
        operation: Operation,
        resources: &[Ulid],
        reservation_id: Option<Ulid>,
        result: &Result<T>,
        started: Instant,
    ) {
        let op = operation_label(operation);
        let verdict = match result {
            Ok(_) => Verdict::Accepted,
            Err(e) => Verdict::Rejected(e.kind()),
        };
        let label = match verdict {
            Verdict::Accepted => "accepted",
            Verdict::Rejected(kind) => kind.as_str(),
        };
        metrics::counter!(observability::BOOKINGS_TOTAL, "operation" => op, "result" => label)
            .increment(1);
        metrics::histogram!(observability::BOOKING_DURATION_SECONDS, "operation" => op)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(_) => tracing::info!(operation = op, reservation = ?reservation_id, "booking accepted"),
            Err(e) if e.is_retryable() || e.kind() == ErrorKind::Fatal => {
                tracing::warn!(operation = op, reservation = ?reservation_id, "booking failed: {e}")
            }
            Err(e) => tracing::debug!(operation = op, reservation = ?reservation_id, "booking rejected: {e}"),
        }

        for &resource_id in resources {
            self.outcomes.publish(BookingOutcome {
                operation,
                resource_id,
                reservation_id,
                verdict,
            });
        }
    }

    // ── Catalog (administrators only) ────────────────────────

    pub async fn create_resource(&self, principal: &Principal, spec: ResourceSpec) -> Result<Resource> {
        principal.require_role(Role::Admin)?;
        let result = self.ledger.create_resource(spec).await;
        self.record_catalog_change(Operation::Create, &result);
        result
    }

    pub async fn update_resource(
        &self,
        principal: &Principal,
        id: Ulid,
        spec: ResourceSpec,
    ) -> Result<Resource> {
        principal.require_role(Role::Admin)?;
        let result = self.ledger.update_resource(id, spec).await;
        self.record_catalog_change(Operation::Update, &result);
        result
    }

    pub async fn delete_resource(&self, principal: &Principal, id: Ulid) -> Result<()> {
        principal.require_role(Role::Admin)?;
        let result = self.ledger.delete_resource(id).await;
        if result.is_ok() {
            self.outcomes.remove(&id);
        }
        self.record_catalog_change(Operation::Delete, &result);
        result
    }

    /// Create the stock rooms on an empty catalog.
    pub async fn seed_default_rooms(&self) -> Result<usize> {
        self.ledger.seed_default_rooms().await
    }

    fn record_catalog_change<T>(&self, operation: Operation, result: &Result<T, Error>) {
        let label = match result {
            Ok(_) => "accepted",
            Err(e) => e.kind().as_str(),
        };
        metrics::counter!(
            observability::CATALOG_CHANGES_TOTAL,
            "operation" => operation_label(operation),
            "result" => label
        )
        .increment(1);
    }
}
