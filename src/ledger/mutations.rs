use tokio::sync::oneshot;
use ulid::Ulid;

use crate::auth::Principal;
use crate::error::{Error, Result};
use crate::limits::MAX_RESERVATIONS_PER_RESOURCE;
use crate::model::*;
use crate::oracle::{self, Availability};

use super::validate::{validate_draft_text, validate_schedule};
use super::{Held, Ledger, Maintenance, WalCommand, RESOLVE_ATTEMPTS};

/// Idempotent retries must describe the same booking.
fn same_booking(existing: &Reservation, owner_id: Ulid, draft: &ReservationDraft) -> bool {
    existing.owner_id == owner_id
        && existing.resource_id == draft.resource_id
        && existing.span == draft.span
}

fn require_available(state: &ResourceState, availability: Availability) -> Result<()> {
    match availability {
        Availability::Available => Ok(()),
        Availability::Unavailable(reason) => Err(Error::Unavailable {
            resource_id: state.id(),
            reason,
        }),
    }
}

impl Ledger {
    /// Check-then-commit a new reservation owned by `owner_id`. Both steps
    /// run under the resource's write lock, which the writer releases only
    /// once the reservation is durable and visible.
    pub async fn commit_reservation(
        &self,
        owner_id: Ulid,
        draft: ReservationDraft,
    ) -> Result<Reservation> {
        validate_draft_text(&draft)?;
        validate_schedule(&draft.span, &draft.recurrence)?;

        if let Some(id) = draft.id
            && self.resource_of(id).is_some()
        {
            return self.existing_for_retry(id, owner_id, &draft).await;
        }

        let guard = self.write_room(draft.resource_id).await?;
        let id = draft.id.unwrap_or_else(Ulid::new);
        // The claim spans every resource, the lock above only this one.
        let claim = self.claim_id(id).ok_or(Error::AlreadyExists(id))?;
        if self.resource_of(id).is_some() {
            // Lost a race against a concurrent create with the same id.
            return match guard.get(id) {
                Some(existing) if same_booking(existing, owner_id, &draft) => Ok(existing.clone()),
                _ => Err(Error::AlreadyExists(id)),
            };
        }
        if guard.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(Error::LimitExceeded("too many reservations on resource"));
        }
        require_available(
            &guard,
            oracle::evaluate(&guard, &draft.span, &draft.recurrence, None),
        )?;

        let now = now_ms();
        let reservation = Reservation {
            id,
            resource_id: draft.resource_id,
            owner_id,
            subject_id: draft.subject_id,
            title: draft.title,
            description: draft.description,
            span: draft.span,
            recurrence: draft.recurrence,
            created_at: now,
            updated_at: now,
        };
        self.commit(
            Event::ReservationCommitted {
                reservation: reservation.clone(),
            },
            Held::rooms(vec![guard]).with_claim(claim),
        )
        .await?;
        Ok(reservation)
    }

    async fn existing_for_retry(
        &self,
        id: Ulid,
        owner_id: Ulid,
        draft: &ReservationDraft,
    ) -> Result<Reservation> {
        let existing = self.get_reservation(id).await?;
        if same_booking(&existing, owner_id, draft) {
            tracing::debug!(reservation = %id, "idempotent create: returning existing");
            Ok(existing)
        } else {
            Err(Error::AlreadyExists(id))
        }
    }

    /// Replace a reservation's mutable fields. `id`, `owner_id` and
    /// `created_at` are kept. When resource, span and recurrence are all
    /// unchanged the schedule is neither re-validated nor re-checked.
    pub async fn replace_reservation(
        &self,
        principal: &Principal,
        id: Ulid,
        draft: ReservationDraft,
    ) -> Result<Reservation> {
        validate_draft_text(&draft)?;

        for _ in 0..RESOLVE_ATTEMPTS {
            let current = self
                .resource_of(id)
                .ok_or_else(|| Error::reservation_not_found(id))?;
            let guards = self.write_rooms(&[current, draft.resource_id]).await?;
            let Some(existing) = guards
                .iter()
                .find(|g| g.id() == current)
                .and_then(|g| g.get(id))
                .cloned()
            else {
                // Moved or cancelled while we waited for the locks.
                continue;
            };
            principal.require_owner_or_admin(existing.owner_id)?;

            let unchanged = existing.resource_id == draft.resource_id
                && existing.span == draft.span
                && existing.recurrence == draft.recurrence;
            if !unchanged {
                validate_schedule(&draft.span, &draft.recurrence)?;
                let target = guards
                    .iter()
                    .find(|g| g.id() == draft.resource_id)
                    .ok_or_else(|| Error::resource_not_found(draft.resource_id))?;
                if target.id() != current && target.len() >= MAX_RESERVATIONS_PER_RESOURCE {
                    return Err(Error::LimitExceeded("too many reservations on resource"));
                }
                require_available(
                    target,
                    oracle::evaluate(target, &draft.span, &draft.recurrence, Some(id)),
                )?;
            }

            let reservation = Reservation {
                id,
                resource_id: draft.resource_id,
                owner_id: existing.owner_id,
                subject_id: draft.subject_id,
                title: draft.title,
                description: draft.description,
                span: draft.span,
                recurrence: draft.recurrence,
                created_at: existing.created_at,
                updated_at: now_ms(),
            };
            self.commit(
                Event::ReservationUpdated {
                    previous_resource_id: current,
                    reservation: reservation.clone(),
                },
                Held::rooms(guards),
            )
            .await?;
            return Ok(reservation);
        }
        Err(Error::reservation_not_found(id))
    }

    /// Remove a reservation. Returns the cancelled record.
    pub async fn cancel_reservation(&self, principal: &Principal, id: Ulid) -> Result<Reservation> {
        for _ in 0..RESOLVE_ATTEMPTS {
            let resource_id = self
                .resource_of(id)
                .ok_or_else(|| Error::reservation_not_found(id))?;
            let guard = self.write_room(resource_id).await?;
            let Some(existing) = guard.get(id).cloned() else {
                continue;
            };
            principal.require_owner_or_admin(existing.owner_id)?;
            self.commit(
                Event::ReservationCancelled { id, resource_id },
                Held::rooms(vec![guard]),
            )
            .await?;
            return Ok(existing);
        }
        Err(Error::reservation_not_found(id))
    }

    /// Rewrite the WAL as the minimal event set for the current state.
    ///
    /// The snapshot is cut under the catalog lock and a read lock on every
    /// resource. Every commit holds at least one of those locks until it is
    /// applied, so the snapshot reflects exactly the commits queued ahead of
    /// the compaction request. The locks are released once the request is
    /// queued; later commits land in the new file.
    pub async fn compact(&self) -> Result<()> {
        let catalog = self.lock_catalog().await?;
        let mut guards = Vec::new();
        for id in self.resource_ids() {
            guards.push(self.read_room(id).await?);
        }

        let mut events = Vec::new();
        for rs in &guards {
            events.push(Event::ResourceCreated {
                resource: rs.resource.clone(),
            });
            for reservation in rs.reservations() {
                events.push(Event::ReservationCommitted {
                    reservation: reservation.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.hand_off(WalCommand::Maintain(Maintenance::Compact {
            events,
            response: tx,
        }))
        .await?;
        drop(guards);
        drop(catalog);

        rx.await
            .map_err(|_| Error::WriterStopped)?
            .map_err(|e| Error::Store(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.hand_off(WalCommand::Maintain(Maintenance::AppendsSinceCompact {
            response: tx,
        }))
        .await?;
        rx.await.map_err(|_| Error::WriterStopped)
    }
}
