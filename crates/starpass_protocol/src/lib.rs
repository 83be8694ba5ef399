//! # star_pass Protocol
//!
//! Wire and data model for the GalaxyDigital volunteer-management API.
//!
//! This crate provides:
//! - `ApiRequest` / `ApiResponse` for transport calls
//! - `Page` and `Cursor` for list endpoints
//! - `RemoteRecord` / `LocalRecord` for synchronization
//! - `FieldMap` for local-to-remote field mapping and validation
//! - `BodySchema` for JSON Schema checks on outbound bodies
//! - Shift batch planning for `/needs/{need_id}/shifts` uploads
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod field_map;
mod page;
mod record;
mod request;
mod schema;
pub mod shifts;

pub use error::{ProtocolError, ProtocolResult};
pub use field_map::{values_match, FieldMap};
pub use page::{Cursor, Page};
pub use record::{LocalRecord, RemoteId, RemoteRecord};
pub use request::{ApiRequest, ApiResponse, Method};
pub use schema::BodySchema;
pub use shifts::{plan_shift_batches, ShiftLayout};

/// JSON object type used for record fields and request bodies.
pub type Fields = serde_json::Map<String, serde_json::Value>;
