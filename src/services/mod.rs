//! Service layer for floodlabel.
//!
//! Domain logic separated from UI concerns. Services report progress through
//! events so the CLI (or a test) decides how to render it.

pub mod annotation;
pub mod checkpoint;

pub use annotation::{AnnotationEvent, AnnotationManager, BatchAnnotationResult};
pub use checkpoint::{CheckpointError, Journal, RowUpdate};
