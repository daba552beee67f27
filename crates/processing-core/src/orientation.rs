//! Orientation resolution from a track's stored transform.
//!
//! Capture devices store one of four transform conventions; anything else
//! is treated as portrait. Comparisons are exact: the stored values are
//! written by the device, not computed, so no tolerance is applied.

use videokit_media_model::{AffineTransform, Orientation, Size, TrackMetadata};

/// Map a stored transform and natural size to a canonical orientation.
pub fn resolve(transform: &AffineTransform, natural: Size) -> Orientation {
    let (tx, ty) = (transform.tx, transform.ty);
    if tx == 0.0 && ty == natural.height {
        Orientation::Down
    } else if tx == 0.0 && ty == 0.0 {
        Orientation::Right
    } else if tx == natural.width && ty == natural.height {
        Orientation::Left
    } else {
        Orientation::Up
    }
}

/// Orientation of a video track.
pub fn resolve_track(track: &TrackMetadata) -> Orientation {
    resolve(&track.preferred_transform, track.natural_size)
}

/// The stored transform convention that resolves to `orientation` for a
/// track of the given natural size.
///
/// Used when a container only reports a rotation angle rather than the
/// full matrix.
pub fn canonical_transform(orientation: Orientation, natural: Size) -> AffineTransform {
    let (w, h) = (natural.width, natural.height);
    match orientation {
        Orientation::Up => AffineTransform::new(0.0, 1.0, -1.0, 0.0, h, 0.0),
        Orientation::Down => AffineTransform::new(0.0, -1.0, 1.0, 0.0, 0.0, h),
        Orientation::Right => AffineTransform::IDENTITY,
        Orientation::Left => AffineTransform::new(-1.0, 0.0, 0.0, -1.0, w, h),
    }
}

/// Orientation for a clockwise display rotation in degrees.
pub fn from_clockwise_degrees(degrees: f64) -> Orientation {
    let normalized = degrees.round().rem_euclid(360.0) as i64;
    match normalized {
        90 => Orientation::Up,
        180 => Orientation::Left,
        270 => Orientation::Down,
        _ => Orientation::Right,
    }
}
