//! Canonical track orientations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the four mounting rotations a capture device records in a
/// track's stored transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Portrait.
    Up,
    /// Portrait, upside down.
    Down,
    /// Landscape, home button / bottom edge to the left.
    Left,
    /// Landscape, home button / bottom edge to the right.
    Right,
}

impl Orientation {
    pub const ALL: [Orientation; 4] = [
        Orientation::Up,
        Orientation::Down,
        Orientation::Left,
        Orientation::Right,
    ];

    /// Whether frames of this orientation are stored sideways, so the
    /// displayed width is the natural height.
    pub fn is_portrait(self) -> bool {
        matches!(self, Orientation::Up | Orientation::Down)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Up => "up",
            Orientation::Down => "down",
            Orientation::Left => "left",
            Orientation::Right => "right",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
