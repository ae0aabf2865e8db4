/// Role-based access control.
///
/// Roles form a static rank hierarchy; a user satisfies a required role when
/// their rank is at least the required rank. Site-scoped checks combine the
/// role with the user's site access list. Admins and directors see every
/// site regardless of their list.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Director,
    ExternalSupervisor,
    InternalSupervisor,
    SiteAgent,
    Professor,
}

impl Role {
    /// Position in the hierarchy. Both supervisor roles share a rank, which
    /// is why roles are compared by rank rather than by a derived `Ord`.
    pub fn rank(&self) -> u8 {
        match self {
            Role::Admin => 5,
            Role::Director => 4,
            Role::ExternalSupervisor | Role::InternalSupervisor => 3,
            Role::SiteAgent => 2,
            Role::Professor => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Director => "director",
            Role::ExternalSupervisor => "external_supervisor",
            Role::InternalSupervisor => "internal_supervisor",
            Role::SiteAgent => "site_agent",
            Role::Professor => "professor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "director" => Ok(Role::Director),
            "external_supervisor" => Ok(Role::ExternalSupervisor),
            "internal_supervisor" => Ok(Role::InternalSupervisor),
            "site_agent" => Ok(Role::SiteAgent),
            "professor" => Ok(Role::Professor),
            other => Err(ModelError::UnknownRole(other.to_string())),
        }
    }
}

/// An authenticated user as seen by the access checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub site_access: Vec<String>,
}

/// `true` when `role` ranks at or above `required`.
pub fn has_permission(role: Role, required: Role) -> bool {
    role.rank() >= required.rank()
}

/// Admins and directors are not restricted to their site access list.
pub fn sees_all_sites(role: Role) -> bool {
    matches!(role, Role::Admin | Role::Director)
}

pub fn can_view_site(user: &User, site_id: &str) -> bool {
    sees_all_sites(user.role) || user.site_access.iter().any(|s| s == site_id)
}

/// Only admins and site agents enter data, and site agents only for their
/// own sites.
pub fn can_submit_readings(user: &User, site_id: &str) -> bool {
    match user.role {
        Role::Admin => true,
        Role::SiteAgent => user.site_access.iter().any(|s| s == site_id),
        _ => false,
    }
}

pub fn can_acknowledge(user: &User, site_id: &str) -> bool {
    can_view_site(user, site_id)
}

/// Sites `user` may see, or `None` when they are unrestricted.
pub fn visible_sites(user: &User) -> Option<Vec<String>> {
    if sees_all_sites(user.role) {
        None
    } else {
        Some(user.site_access.clone())
    }
}
