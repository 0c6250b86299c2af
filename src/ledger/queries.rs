use std::cmp::Reverse;

use ulid::Ulid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::oracle::{self, Availability};
use crate::recurrence::Recurrence;

use super::validate::{validate_schedule, validate_window};
use super::{Ledger, RESOLVE_ATTEMPTS};

impl Ledger {
    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation> {
        for _ in 0..RESOLVE_ATTEMPTS {
            let resource_id = self
                .resource_of(id)
                .ok_or_else(|| Error::reservation_not_found(id))?;
            let guard = match self.read_room(resource_id).await {
                Ok(guard) => guard,
                Err(Error::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            if let Some(r) = guard.get(id) {
                return Ok(r.clone());
            }
        }
        Err(Error::reservation_not_found(id))
    }

    /// Reservations on one resource with an occurrence inside `window`,
    /// ordered by first start.
    pub async fn reservations_for_resource(
        &self,
        resource_id: Ulid,
        window: Span,
    ) -> Result<Vec<Reservation>> {
        validate_window(&window)?;
        let guard = self.read_room(resource_id).await?;
        Ok(guard
            .overlapping(&window)
            .filter(|r| !r.occurrences_within(&window).is_empty())
            .cloned()
            .collect())
    }

    /// Every reservation with an occurrence inside `window`, across all
    /// resources, ordered by first start and then paged.
    pub async fn reservations_in_range(&self, window: Span, page: Page) -> Result<Vec<Reservation>> {
        validate_window(&window)?;
        let mut out = Vec::new();
        for id in self.resource_ids() {
            match self.reservations_for_resource(id, window).await {
                Ok(mut found) => out.append(&mut found),
                Err(Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        Ok(page.apply(out))
    }

    /// Every reservation, most recent first start first.
    pub async fn list_reservations(&self, page: Page) -> Result<Vec<Reservation>> {
        let mut out = Vec::new();
        for id in self.resource_ids() {
            match self.read_room(id).await {
                Ok(guard) => out.extend(guard.reservations().cloned()),
                Err(Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        out.sort_by_key(|r| (Reverse(r.span.start), r.id));
        Ok(page.apply(out))
    }

    /// Calendar view: each materialized occurrence inside `window`.
    pub async fn occurrences(&self, resource_id: Ulid, window: Span) -> Result<Vec<Occurrence>> {
        validate_window(&window)?;
        let guard = self.read_room(resource_id).await?;
        let mut out: Vec<Occurrence> = guard
            .overlapping(&window)
            .flat_map(|r| {
                r.occurrences_within(&window)
                    .into_iter()
                    .map(move |span| Occurrence {
                        reservation_id: r.id,
                        span,
                    })
            })
            .collect();
        out.sort_by_key(|o| (o.span.start, o.reservation_id));
        Ok(out)
    }

    pub async fn reservation_count(&self, resource_id: Ulid) -> Result<usize> {
        Ok(self.read_room(resource_id).await?.len())
    }

    /// Ask the oracle about one resource under its read lock.
    pub async fn availability(
        &self,
        resource_id: Ulid,
        span: Span,
        recurrence: Recurrence,
    ) -> Result<Availability> {
        validate_schedule(&span, &recurrence)?;
        let guard = self.read_room(resource_id).await?;
        Ok(oracle::evaluate(&guard, &span, &recurrence, None))
    }

    /// Enabled resources with capacity ≥ `min_capacity` that are free for
    /// the candidate, ordered by name.
    pub async fn available_resources(
        &self,
        span: Span,
        recurrence: Recurrence,
        min_capacity: u32,
    ) -> Result<Vec<Resource>> {
        validate_schedule(&span, &recurrence)?;
        let mut out = Vec::new();
        for id in self.resource_ids() {
            let guard = match self.read_room(id).await {
                Ok(guard) => guard,
                Err(Error::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            if !guard.resource.enabled || guard.resource.capacity < min_capacity {
                continue;
            }
            if oracle::evaluate(&guard, &span, &recurrence, None).is_available() {
                out.push(guard.resource.clone());
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Free sub-intervals of `window` on one resource.
    pub async fn free_windows(&self, resource_id: Ulid, window: Span) -> Result<Vec<Span>> {
        validate_window(&window)?;
        let guard = self.read_room(resource_id).await?;
        Ok(oracle::free_windows(&guard, &window))
    }
}
