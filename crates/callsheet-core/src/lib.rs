//! # callsheet-core
//!
//! Core types, traits, and abstractions for callsheet.
//!
//! This crate provides the document model, the storage traits the clone
//! engine is written against, the collection schema from which clone order
//! is derived, and shared error, logging and event definitions.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod schema;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{CloneEvent, EventBus, EventEnvelope};
pub use models::*;
pub use schema::{Cardinality, CloneSchema, CollectionSchema, ForeignKey};
pub use traits::*;
pub use uuid_utils::{extract_timestamp, id_age, is_v7, new_v7};
