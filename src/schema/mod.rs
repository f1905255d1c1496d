//! Patient intake schema and tabular representation
//!
//! This module defines the intake record, the feature frame every stage works
//! on, and the fixed column universe of the trained models.

mod adapter;
pub mod columns;
mod frame;
mod record;

pub use adapter::*;
pub use columns::{feature_schema, ColumnKind, ColumnSpec, FEATURE_SCHEMA_VERSION, FINAL_COLUMNS};
pub use frame::*;
pub use record::*;
