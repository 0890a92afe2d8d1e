//! Cell identity, buffers and ordering.
//!
//! This module provides:
//! - Opaque, never-reused cell identifiers
//! - An arena of cells linked into a single chain
//! - O(1) insertion, removal and moves by relinking neighbors

mod store;
mod types;

pub use store::{CellStore, ChainIter};
pub use types::{Cell, CellId};
