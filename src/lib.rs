//! Water-management node control core.
//!
//! Exposes the pure-logic modules for the node binary and for integration
//! testing.  Hardware and the shared database are reached only through the
//! traits in [`app::ports`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod arbitrator;
pub mod config;
pub mod devices;
pub mod error;
pub mod fsm;
pub mod manual_override;
pub mod policy;
pub mod reading;

pub use error::{Error, Result};
