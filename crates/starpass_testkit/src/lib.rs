//! # star_pass Testkit
//!
//! Test utilities for star_pass.
//!
//! This crate provides:
//! - `FakeGalaxy`, an in-memory GalaxyDigital service with scripted faults,
//!   conflict marking and a request log
//! - Fixtures for transports, records and shift rows
//! - Property-based test generators using proptest

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fake;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fake::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fake::{Fault, FakeGalaxy, FAKE_BASE_URL};
pub use fixtures::*;
pub use generators::*;
