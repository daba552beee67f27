//! Geometry planning: render size and corrective layer transform.
//!
//! The transform is built as a translation followed (in application order,
//! rotation first) by the orientation's corrective rotation:
//!
//! | Orientation | Rotation | Translation                        |
//! |-------------|----------|------------------------------------|
//! | Up          | +90°     | (naturalHeight − cropX, −cropY)    |
//! | Down        | −90°     | (−cropX, naturalWidth − cropY)     |
//! | Right       | 0°       | (−cropX, −cropY)                   |
//! | Left        | −180°    | (naturalWidth − cropX, naturalHeight − cropY) |
//!
//! The rotation pivots the natural frame around the origin; the
//! translation then moves the crop window's top-left corner to `(0, 0)`.

use videokit_media_model::{deg_to_rad, AffineTransform, Orientation, Rect, Size, TrackMetadata};

/// Output of the geometry planner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryPlan {
    pub orientation: Orientation,

    /// Output frame size.
    pub render_size: Size,

    /// Transform applied to the video layer for the whole asset.
    pub transform: AffineTransform,
}

/// Corrective rotation in degrees for each orientation.
pub fn rotation_degrees(orientation: Orientation) -> f64 {
    match orientation {
        Orientation::Up => 90.0,
        Orientation::Down => -90.0,
        Orientation::Right => 0.0,
        Orientation::Left => -180.0,
    }
}

/// Plan render size and transform.
///
/// `stored` is the track's stored transform; it only determines the
/// render size when no crop is requested.
pub fn plan(
    orientation: Orientation,
    natural: Size,
    stored: &AffineTransform,
    crop: Option<&Rect>,
) -> GeometryPlan {
    let (crop_x, crop_y) = crop.map_or((0.0, 0.0), |r| (r.origin.x, r.origin.y));

    let render_size = match crop {
        Some(rect) => rect.size,
        None => stored.apply_to_size(natural).abs(),
    };

    let (tx, ty) = match orientation {
        Orientation::Up => (natural.height - crop_x, 0.0 - crop_y),
        Orientation::Down => (0.0 - crop_x, natural.width - crop_y),
        Orientation::Right => (0.0 - crop_x, 0.0 - crop_y),
        Orientation::Left => (natural.width - crop_x, natural.height - crop_y),
    };

    let mut transform = AffineTransform::IDENTITY.translated_by(tx, ty);
    let degrees = rotation_degrees(orientation);
    if degrees != 0.0 {
        transform = transform.rotated_by(deg_to_rad(degrees));
    }

    tracing::debug!(
        %orientation,
        render_width = render_size.width,
        render_height = render_size.height,
        crop = crop.is_some(),
        "Planned geometry"
    );

    GeometryPlan {
        orientation,
        render_size,
        transform,
    }
}

/// Plan geometry for a video track.
pub fn plan_for_track(
    track: &TrackMetadata,
    orientation: Orientation,
    crop: Option<&Rect>,
) -> GeometryPlan {
    plan(
        orientation,
        track.natural_size,
        &track.preferred_transform,
        crop,
    )
}

/// Displayed (upright) size of a natural frame in a given orientation.
pub fn display_size(orientation: Orientation, natural: Size) -> Size {
    if orientation.is_portrait() {
        natural.transposed()
    } else {
        natural
    }
}
