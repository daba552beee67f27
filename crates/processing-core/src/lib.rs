//! VideoKit Processing Core
//!
//! Pure planning for a mutate invocation:
//! - **Orientation:** resolve a track's stored transform to a canonical rotation
//! - **Geometry:** render size and corrective transform, with optional crop
//! - **Composition:** frame-rate limit, trim range, single layer instruction
//! - **Bitrate:** target bitrate under an optional ceiling
//!
//! This crate is pure computation: no I/O, no engine dependencies.
//! All inputs are data; all outputs are data.

pub mod bitrate;
pub mod composition;
pub mod geometry;
pub mod orientation;

pub use geometry::GeometryPlan;
