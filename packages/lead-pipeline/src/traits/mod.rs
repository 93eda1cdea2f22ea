//! Core trait abstractions for the lead pipeline.
//!
//! These traits define the seams applications plug into: where documents
//! come from and where leads and run records go.

pub mod source;
pub mod store;
