//! Alias analysis and the memory-state encoder.
//!
//! [`PointsToAnalysis`] computes a [`PointsToGraph`] over abstract memory
//! locations; [`BasicEncoder`] uses it to thread one explicit memory state per
//! location partition through every memory-observing node. After encoding,
//! operations on disjoint partitions are independent and the memory normal
//! forms can reorder and eliminate them.

pub mod encoder;
pub mod points_to;
pub mod ptg;

pub use encoder::{BasicEncoder, MemoryStateEncoderPass, Partitioning};
pub use points_to::PointsToAnalysis;
pub use ptg::{LocationId, MemoryLocation, PointsToGraph};
