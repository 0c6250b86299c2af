use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

/// An already-authenticated caller. Credential handling happens upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: Ulid,
    pub role: Role,
}

impl Principal {
    pub fn member(id: Ulid) -> Self {
        Self {
            id,
            role: Role::Member,
        }
    }

    pub fn admin(id: Ulid) -> Self {
        Self {
            id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_role(&self, role: Role) -> Result<()> {
        match (role, self.role) {
            (Role::Member, _) | (Role::Admin, Role::Admin) => Ok(()),
            (Role::Admin, Role::Member) => Err(Error::Forbidden("administrator role required")),
        }
    }

    /// Reservations may be changed by their owner or by an administrator.
    pub fn require_owner_or_admin(&self, owner_id: Ulid) -> Result<()> {
        if self.id == owner_id || self.is_admin() {
            Ok(())
        } else {
            Err(Error::Forbidden("only the owner or an administrator may change this reservation"))
        }
    }
}
