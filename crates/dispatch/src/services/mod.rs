//! Business logic services for the dispatch server.
//!
//! # Services
//!
//! - [`auth`] - Signed bearer tokens identifying users, shops and captains
//! - [`dispatch`] - Order fulfillment, ride dispatch, settlement and ledgers

pub mod auth;
pub mod dispatch;
