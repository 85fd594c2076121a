//! Pixel-space value types shared by the camera, framing and decode layers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Width x height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_portrait(&self) -> bool {
        self.width < self.height
    }

    pub fn swapped(&self) -> Self {
        Self::new(self.height, self.width)
    }

    /// Long edge first, so sizes can be compared regardless of how they are held
    pub fn landscape(&self) -> Self {
        if self.is_portrait() {
            self.swapped()
        } else {
            *self
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Edge-based rectangle; `right` and `bottom` are exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_size(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self::new(left, top, left + width, top + height)
    }

    /// Rectangle of `size` centred inside `outer`
    pub fn centered(outer: Resolution, width: u32, height: u32) -> Self {
        let left = (outer.width as i32 - width as i32) / 2;
        let top = (outer.height as i32 - height as i32) / 2;
        Self::from_size(left, top, width as i32, height as i32)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Zero or negative area
    pub fn is_degenerate(&self) -> bool {
        self.width() < 1 || self.height() < 1
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let rect = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!rect.is_degenerate()).then_some(rect)
    }

    /// Full extent of a `width` x `height` buffer
    pub fn bounds(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect({}, {} - {}, {})",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Clockwise rotation in quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    /// Accepts any multiple of 90, including the negative values some
    /// displays report (-90 becomes 270)
    pub fn from_degrees(degrees: i32) -> Result<Self, ScanError> {
        if degrees % 90 != 0 {
            return Err(ScanError::InvalidRotation(degrees));
        }
        Ok(match degrees.rem_euclid(360) {
            0 => Self::Deg0,
            90 => Self::Deg90,
            180 => Self::Deg180,
            _ => Self::Deg270,
        })
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    pub fn quarter_turns(self) -> u32 {
        self.degrees() / 90
    }

    /// Rotation that undoes this one
    pub fn inverse(self) -> Self {
        Self::from_quarter_turns(4 - self.quarter_turns())
    }

    pub fn plus(self, other: Orientation) -> Self {
        Self::from_quarter_turns(self.quarter_turns() + other.quarter_turns())
    }

    pub fn minus(self, other: Orientation) -> Self {
        self.plus(other.inverse())
    }

    fn from_quarter_turns(turns: u32) -> Self {
        match turns % 4 {
            0 => Self::Deg0,
            1 => Self::Deg90,
            2 => Self::Deg180,
            _ => Self::Deg270,
        }
    }
}

impl TryFrom<i32> for Orientation {
    type Error = ScanError;

    fn try_from(degrees: i32) -> Result<Self, Self::Error> {
        Self::from_degrees(degrees)
    }
}

impl From<Orientation> for i32 {
    fn from(orientation: Orientation) -> Self {
        orientation.degrees() as i32
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}
