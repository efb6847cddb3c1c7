//! Depchain Core
//!
//! Core domain types, port traits, and error handling for the depchain
//! build scheduler. This crate has minimal dependencies and defines the
//! shared vocabulary (source stamps, buildsets, pending requests, property
//! bags, events) used across all other crates.

pub mod buildset;
pub mod error;
pub mod events;
pub mod ids;
pub mod pending;
pub mod ports;
pub mod properties;
pub mod sourcestamp;

pub use error::{Error, Result};
pub use ids::*;
