//! Target bitrate policy.
//!
//! Output bitrate never exceeds the source's own data rate, and never
//! exceeds a configured ceiling once the source crosses it.

/// Whether the source data rate is strictly above the ceiling.
pub fn exceeds_ceiling(ceiling: Option<u64>, source_rate: f64) -> bool {
    matches!(ceiling, Some(c) if source_rate > c as f64)
}

/// Effective video bitrate in bits per second.
///
/// The ceiling applies only when the source is strictly above it; a source
/// exactly at the ceiling keeps its own (rounded) rate.
pub fn target_bitrate(ceiling: Option<u64>, source_rate: f64) -> u64 {
    match ceiling {
        Some(c) if source_rate > c as f64 => c,
        _ => source_rate.max(0.0).round() as u64,
    }
}
