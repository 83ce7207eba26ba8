//! Core types for Tiffin.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod geo;
pub mod id;
pub mod money;
pub mod otp;
pub mod status;

pub use geo::{BoundingBox, GeoError, GeoPoint};
pub use id::*;
pub use money::Money;
pub use otp::{Otp, OtpError};
pub use status::*;
