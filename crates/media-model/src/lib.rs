//! VideoKit Media Model
//!
//! Defines the core data contracts shared by the planners and engines:
//! - **Geometry:** sizes, rectangles, and affine transforms in pixel space
//! - **Orientation:** the four canonical capture-device rotations
//! - **Tracks:** read-only track and asset metadata
//! - **Composition:** the render description an export engine consumes
//! - **Settings:** the caller's per-invocation mutate configuration
//!
//! Everything here is plain data; no I/O happens in this crate.

pub mod composition;
pub mod geometry;
pub mod orientation;
pub mod settings;
pub mod track;

pub use composition::*;
pub use geometry::*;
pub use orientation::*;
pub use settings::*;
pub use track::*;
