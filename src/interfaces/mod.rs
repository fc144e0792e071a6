//! Thin outer surfaces: the HTTP listener and CSV import/export.

pub mod csv;
pub mod http;
