//! Domain models for dispatch.
//!
//! These types represent validated domain objects, separate from database row
//! types (see `db`) and from the HTTP request/response shapes (see `routes`).

pub mod ledger;
pub mod notification;
pub mod order;
pub mod party;
pub mod principal;
pub mod ride;

pub use ledger::{AccountAudit, EntryKind, LedgerAccount, LedgerEntry};
pub use notification::NotificationRecord;
pub use order::{NewOrder, Order, OrderItem};
pub use party::{Captain, NearbyCaptain, NewCaptain, NewShop, NewUser, Shop, User};
pub use principal::{Principal, Role};
pub use ride::{NewRide, Ride, RideView};
