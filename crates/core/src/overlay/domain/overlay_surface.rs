use crate::shared::detection::{BoundingBox, Point};
use crate::shared::geometry::Size;

/// Straight (non-premultiplied) RGBA.
pub type Rgba = [u8; 4];

/// How a text label is drawn.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelStyle {
    pub color: Rgba,
    pub background: Rgba,
    /// Glyph height in pixels.
    pub size: f64,
    /// Gap between the text and the edge of its background.
    pub padding: u32,
}

/// Raster drawing target for the overlay.
///
/// Drawing calls between two `present` calls form one frame of overlay;
/// readers only ever observe presented frames.
pub trait OverlaySurface: Send {
    fn size(&self) -> Size;

    /// Wipes the whole surface to transparent.
    fn clear(&mut self);

    fn stroke_rect(&mut self, rect: &BoundingBox, color: Rgba, line_width: u32);

    fn stroke_polyline(&mut self, points: &[Point], closed: bool, color: Rgba, line_width: u32);

    fn fill_point(&mut self, center: Point, radius: f64, color: Rgba);

    /// Draws `text` on a filled background whose bottom-left corner sits at
    /// `anchor`. Surfaces without a font draw nothing.
    fn draw_text(&mut self, anchor: Point, text: &str, style: &LabelStyle);

    /// Publishes everything drawn since the previous `present`.
    fn present(&mut self);
}
