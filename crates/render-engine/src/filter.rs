//! Video composition to ffmpeg filter-chain translation.
//!
//! The layer transform is applied as an exact quarter-turn rotation
//! followed by a crop of the render window out of the rotated frame, then
//! the frame-rate limit and the quality profile's scaling.

use videokit_common::error::{EngineError, EngineResult};
use videokit_media_model::{Quality, Rect, Size, VideoComposition};

/// Filter chain for one export, with the frame size it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPlan {
    pub filters: Vec<String>,
    pub output_size: (u32, u32),
}

impl FilterPlan {
    /// The `-vf` argument, or `None` when no filtering is needed.
    pub fn chain(&self) -> Option<String> {
        (!self.filters.is_empty()).then(|| self.filters.join(","))
    }
}

/// Build the filter chain drawing `composition` from a source whose coded
/// frame size is `natural`.
pub fn composition_filters(
    composition: &VideoComposition,
    natural: Size,
    quality: &Quality,
) -> EngineResult<FilterPlan> {
    let transform = composition.primary_transform();
    let turns = transform.quarter_turns().ok_or_else(|| {
        EngineError::unsupported(format!(
            "layer transform rotates by {:.1} degrees; only quarter turns can be rendered",
            transform.rotation_degrees()
        ))
    })?;

    let mut filters = Vec::new();
    match turns {
        1 => filters.push("transpose=clock".to_string()),
        2 => {
            filters.push("hflip".to_string());
            filters.push("vflip".to_string());
        }
        3 => filters.push("transpose=cclock".to_string()),
        _ => {}
    }

    // Where the rotated frame lands in output space; the render window
    // starts at the output origin.
    let frame = transform.apply_to_rect(&Rect::from_size(natural));
    let (dw, dh) = frame.size.to_pixels();
    let (rw, rh) = composition.render_size.to_pixels();
    if rw == 0 || rh == 0 {
        return Err(EngineError::unsupported("render size is empty"));
    }
    let x = (-frame.min_x()).round() as i64;
    let y = (-frame.min_y()).round() as i64;

    if (rw, rh) != (dw, dh) || x != 0 || y != 0 {
        let fits = x >= 0 && y >= 0 && x + rw as i64 <= dw as i64 && y + rh as i64 <= dh as i64;
        if !fits {
            return Err(EngineError::unsupported(format!(
                "crop window {rw}x{rh} at ({x},{y}) lies outside the {dw}x{dh} frame"
            )));
        }
        filters.push(format!("crop={rw}:{rh}:{x}:{y}"));
    }

    match composition.frame_duration.filter(|d| d.value > 0) {
        Some(d) => filters.push(format!("fps={}/{}", d.timescale, d.value)),
        None => {
            if let Quality::Custom {
                frame_rate: Some(fps),
                ..
            } = quality
            {
                filters.push(format!("fps={fps}"));
            }
        }
    }

    let mut size = (rw, rh);
    if let Some((bw, bh)) = quality.bounding_box() {
        let (bw, bh) = if rh > rw { (bh, bw) } else { (bw, bh) };
        if rw > bw || rh > bh {
            let factor = (bw as f64 / rw as f64).min(bh as f64 / rh as f64);
            size = (even_floor(rw as f64 * factor), even_floor(rh as f64 * factor));
            filters.push(format!("scale={}:{}", size.0, size.1));
        }
    } else if let Quality::Custom { scale, .. } = quality {
        if (scale - 1.0).abs() > f64::EPSILON && *scale > 0.0 {
            size = (even_floor(rw as f64 * scale), even_floor(rh as f64 * scale));
            filters.push(format!("scale={}:{}", size.0, size.1));
        }
    }

    // 4:2:0 output needs even dimensions.
    if size.0 % 2 == 1 || size.1 % 2 == 1 {
        size = (size.0 & !1, size.1 & !1);
        filters.push(format!("crop={}:{}:0:0", size.0, size.1));
    }

    Ok(FilterPlan {
        filters,
        output_size: size,
    })
}

/// Largest even pixel count not above `v`, tolerating float noise.
fn even_floor(v: f64) -> u32 {
    (((v + 1e-6) / 2.0).floor() as u32 * 2).max(2)
}
