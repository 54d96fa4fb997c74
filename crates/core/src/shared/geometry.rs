use std::fmt;
use std::str::FromStr;

use super::error::OverlayError;

/// Reference on-screen size of the player and its overlay.
pub const DEFAULT_DISPLAY_SIZE: Size = Size {
    width: 640,
    height: 360,
};

/// Pixel dimensions of a frame or a drawing surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parses `WIDTHxHEIGHT`, e.g. `640x360`.
impl FromStr for Size {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid width '{w}': {e}"))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid height '{h}': {e}"))?;
        Ok(Size { width, height })
    }
}

/// Per-axis factors that take native frame coordinates to display
/// coordinates. Derived on demand, never cached across sources.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleFactors {
    pub x: f64,
    pub y: f64,
}

impl ScaleFactors {
    /// Fails with `InvalidGeometry` when the native size has a zero side.
    pub fn between(native: Size, display: Size) -> Result<Self, OverlayError> {
        if native.is_empty() {
            return Err(OverlayError::InvalidGeometry {
                width: native.width,
                height: native.height,
            });
        }
        Ok(Self {
            x: display.width as f64 / native.width as f64,
            y: display.height as f64 / native.height as f64,
        })
    }
}
