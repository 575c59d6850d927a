//! Data models.

pub mod table;

pub use table::{bool_cell, is_truthy, present_text, Record, Table, TableError};
