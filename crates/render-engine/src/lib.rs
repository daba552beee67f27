//! VideoKit Render Engine
//!
//! Renders a [`VideoComposition`](videokit_media_model::VideoComposition)
//! of a source asset into an output file at a quality profile.
//!
//! ```text
//! source.mov ──┐
//!              ├── rotate (quarter turns)
//! composition ─┘         │
//!                        ├── crop render window
//!                        ├── frame-rate limit
//!                        ├── quality scaling
//!                        ▼
//!                  encode (H.264/AAC)
//!                        │
//!                        ▼
//!                     output.mp4
//! ```

pub mod export;
pub mod filter;
pub mod memory;

pub use export::*;
pub use filter::{composition_filters, FilterPlan};
pub use memory::{ExportCall, ExportFaults, ExportRecord, MemoryExporter};
