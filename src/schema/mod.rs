//! Versioned backup schema
//!
//! This module defines the flattened backup document written by the exporter
//! and read by the importer, together with its canonical JSON encoding.

mod codec;
mod record;

pub use codec::*;
pub use record::*;
