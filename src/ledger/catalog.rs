use ulid::Ulid;

use crate::error::{Error, Result};
use crate::limits::MAX_RESOURCES;
use crate::model::*;

use super::validate::validate_resource_spec;
use super::{Held, Ledger};

impl Ledger {
    pub async fn create_resource(&self, spec: ResourceSpec) -> Result<Resource> {
        validate_resource_spec(&spec)?;
        let catalog = self.lock_catalog().await?;
        if self.index.rooms.len() >= MAX_RESOURCES {
            return Err(Error::LimitExceeded("too many resources"));
        }
        if catalog.holder_of(&spec.name).is_some() {
            return Err(Error::DuplicateName(spec.name));
        }

        let now = now_ms();
        let resource = Resource {
            id: Ulid::new(),
            name: spec.name,
            capacity: spec.capacity,
            hours: spec.hours,
            enabled: spec.enabled,
            location: spec.location,
            description: spec.description,
            created_at: now,
            updated_at: now,
        };
        let event = Event::ResourceCreated {
            resource: resource.clone(),
        };
        self.commit(
            event,
            Held {
                catalog: Some(catalog),
                ..Held::default()
            },
        )
        .await?;
        tracing::info!(resource = %resource.id, name = %resource.name, "resource created");
        Ok(resource)
    }

    /// Replace every administrator-editable field; `id` and `created_at` stay.
    pub async fn update_resource(&self, id: Ulid, spec: ResourceSpec) -> Result<Resource> {
        validate_resource_spec(&spec)?;
        let catalog = self.lock_catalog().await?;
        let guard = self.write_room(id).await?;
        if catalog.holder_of(&spec.name).is_some_and(|holder| holder != id) {
            return Err(Error::DuplicateName(spec.name));
        }

        let resource = Resource {
            id,
            name: spec.name,
            capacity: spec.capacity,
            hours: spec.hours,
            enabled: spec.enabled,
            location: spec.location,
            description: spec.description,
            created_at: guard.resource.created_at,
            updated_at: now_ms(),
        };
        let event = Event::ResourceUpdated {
            resource: resource.clone(),
        };
        self.commit(
            event,
            Held {
                catalog: Some(catalog),
                rooms: vec![guard],
                ..Held::default()
            },
        )
        .await?;
        tracing::info!(resource = %id, "resource updated");
        Ok(resource)
    }

    /// Refused while any reservation references the resource. The check runs
    /// under the resource's write lock, so no commit can slip in between.
    pub async fn delete_resource(&self, id: Ulid) -> Result<()> {
        let catalog = self.lock_catalog().await?;
        let guard = self.write_room(id).await?;
        if !guard.is_empty() {
            return Err(Error::InUse {
                resource_id: id,
                reservations: guard.len(),
            });
        }
        self.commit(
            Event::ResourceDeleted { id },
            Held {
                catalog: Some(catalog),
                rooms: vec![guard],
                ..Held::default()
            },
        )
        .await?;
        tracing::info!(resource = %id, "resource deleted");
        Ok(())
    }

    /// Create the stock rooms when the catalog is empty. Returns how many
    /// were created; zero when any resource already exists.
    pub async fn seed_default_rooms(&self) -> Result<usize> {
        if !self.lock_catalog().await?.names.is_empty() {
            return Ok(0);
        }
        let mut created = 0;
        for spec in default_rooms() {
            match self.create_resource(spec).await {
                Ok(_) => created += 1,
                // A concurrent seeder got there first.
                Err(Error::DuplicateName(_)) => {}
                Err(e) => return Err(e),
            }
        }
        tracing::info!(created, "seeded default rooms");
        Ok(created)
    }

    pub async fn get_resource(&self, id: Ulid) -> Result<Resource> {
        Ok(self.read_room(id).await?.resource.clone())
    }

    /// Every resource, ordered by name.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        let mut out = Vec::new();
        for id in self.resource_ids() {
            match self.read_room(id).await {
                Ok(guard) => out.push(guard.resource.clone()),
                // Deleted since the id snapshot.
                Err(Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Enabled resources with at least `min_capacity` seats, ordered by name.
    pub async fn list_enabled_resources(&self, min_capacity: u32) -> Result<Vec<Resource>> {
        let mut all = self.list_resources().await?;
        all.retain(|r| r.enabled && r.capacity >= min_capacity);
        Ok(all)
    }
}

fn hours(open_h: u32, close_h: u32) -> Option<OperatingHours> {
    OperatingHours::new(open_h * 3600, close_h * 3600)
}

fn room(
    name: &str,
    capacity: u32,
    location: &str,
    open_close: (u32, u32),
    description: &str,
) -> ResourceSpec {
    ResourceSpec {
        name: name.into(),
        capacity,
        hours: hours(open_close.0, open_close.1),
        enabled: true,
        location: Some(location.into()),
        description: Some(description.into()),
    }
}

/// The stock set of rooms a fresh installation starts with.
pub fn default_rooms() -> Vec<ResourceSpec> {
    vec![
        room(
            "Main Sanctuary",
            200,
            "Main Building",
            (8, 21),
            "The main church sanctuary for worship services",
        ),
        room(
            "Fellowship Hall",
            100,
            "Basement",
            (8, 22),
            "Large open space for events and gatherings",
        ),
        room(
            "Classroom A",
            30,
            "Education Wing",
            (8, 21),
            "Classroom with tables and chairs",
        ),
        room(
            "Classroom B",
            30,
            "Education Wing",
            (8, 21),
            "Classroom with tables and chairs",
        ),
        room(
            "Conference Room",
            15,
            "Office Area",
            (8, 20),
            "Conference room with large table",
        ),
        room(
            "Youth Room",
            50,
            "West Wing",
            (8, 22),
            "Activity space designed for youth ministry",
        ),
        room(
            "Prayer Chapel",
            20,
            "East Wing",
            (7, 23),
            "Small chapel for prayer gatherings",
        ),
        room(
            "Kitchen",
            10,
            "Near Fellowship Hall",
            (8, 21),
            "Fully equipped kitchen for event preparation",
        ),
        room(
            "Nursery",
            15,
            "Near Main Sanctuary",
            (8, 13),
            "Childcare area for infants and toddlers",
        ),
        room(
            "Choir Room",
            35,
            "Near Main Sanctuary",
            (16, 21),
            "Practice space for the choir",
        ),
    ]
}
