//! Authenticated actors.

use core::fmt;

use serde::{Deserialize, Serialize};
use tiffin_core::{CaptainId, ShopId, UserId};

/// The kind of marketplace party behind a request or a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A shopper placing orders.
    User,
    /// A restaurant fulfilling orders.
    Shop,
    /// A delivery rider.
    Captain,
}

impl Role {
    /// The `snake_case` wire and database name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Shop => "shop",
            Self::Captain => "captain",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "shop" => Ok(Self::Shop),
            "captain" => Ok(Self::Captain),
            _ => Err(format!("invalid role: {s}")),
        }
    }
}

/// An authenticated party: a role plus that party's ID.
///
/// Also used as the addressing key for realtime notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Kind of party.
    pub role: Role,
    /// Raw ID within that role's table.
    pub id: i32,
}

impl Principal {
    /// A shopper.
    #[must_use]
    pub const fn user(id: UserId) -> Self {
        Self {
            role: Role::User,
            id: id.as_i32(),
        }
    }

    /// A shop.
    #[must_use]
    pub const fn shop(id: ShopId) -> Self {
        Self {
            role: Role::Shop,
            id: id.as_i32(),
        }
    }

    /// A captain.
    #[must_use]
    pub const fn captain(id: CaptainId) -> Self {
        Self {
            role: Role::Captain,
            id: id.as_i32(),
        }
    }

    /// The user ID, if this principal is a user.
    #[must_use]
    pub const fn as_user(&self) -> Option<UserId> {
        match self.role {
            Role::User => Some(UserId::new(self.id)),
            _ => None,
        }
    }

    /// The shop ID, if this principal is a shop.
    #[must_use]
    pub const fn as_shop(&self) -> Option<ShopId> {
        match self.role {
            Role::Shop => Some(ShopId::new(self.id)),
            _ => None,
        }
    }

    /// The captain ID, if this principal is a captain.
    #[must_use]
    pub const fn as_captain(&self) -> Option<CaptainId> {
        match self.role {
            Role::Captain => Some(CaptainId::new(self.id)),
            _ => None,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}
