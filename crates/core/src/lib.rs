//! Tiffin Core - Shared domain types and pricing math.
//!
//! This crate provides the types every Tiffin component agrees on:
//! - `dispatch` - Ride dispatch, fulfillment and ledger service
//! - `cli` - Command-line tools for migrations, seeding and tokens
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Anything that needs a clock or a connection lives in
//! the `dispatch` crate.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, money, coordinates, OTPs and lifecycle statuses
//! - [`fare`] - Delivery fare quotes and three-way settlement of completed rides

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod fare;
pub mod types;

pub use fare::{CommissionRates, FareError, FareQuote, FareSchedule, Settlement};
pub use types::*;
