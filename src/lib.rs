//! Batch local-feature extraction for image-based relocalization.
//!
//! Images flow through a fixed pipeline: the [`dataset`] module resolves
//! names to pixel data, [`preprocessing`] turns them into normalized
//! tensors, an [`extractor`] produces named feature arrays, and the
//! [`store`] persists one keyed entry per image. [`extract`] drives the
//! whole thing, skipping entries a previous run already committed.

pub mod config;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod extractor;
pub mod preprocessing;
pub mod store;
pub mod superpoint;

pub use error::{Error, Result};
