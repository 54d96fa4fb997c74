use crate::detection::domain::landmark_topology::LandmarkTopology;
use crate::shared::detection::{Detection, Point};
use crate::shared::geometry::Size;

use super::overlay_surface::{LabelStyle, OverlaySurface, Rgba};

/// Colours and stroke sizes for the overlay. Defaults mirror common
/// face-landmark tooling: blue boxes labelled with their score, cyan
/// contours, magenta points.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayStyle {
    pub box_color: Rgba,
    pub box_line_width: u32,
    pub landmark_line_color: Rgba,
    pub landmark_line_width: u32,
    pub point_color: Rgba,
    pub point_radius: f64,
    /// Score label above each box; `None` draws bare boxes.
    pub score_label: Option<LabelStyle>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            box_color: [0, 0, 255, 255],
            box_line_width: 2,
            landmark_line_color: [0, 255, 255, 255],
            landmark_line_width: 1,
            point_color: [255, 0, 255, 255],
            point_radius: 2.0,
            score_label: Some(LabelStyle {
                color: [255, 255, 255, 255],
                background: [0, 0, 0, 128],
                size: 14.0,
                padding: 4,
            }),
        }
    }
}

/// Sole writer of the overlay surface.
///
/// Owned by whichever sync loop is running; the player gets it back when
/// that loop stops, so two loops can never draw on one surface.
pub struct OverlayRenderer {
    surface: Box<dyn OverlaySurface>,
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(surface: Box<dyn OverlaySurface>, style: OverlayStyle) -> Self {
        Self { surface, style }
    }

    pub fn display_size(&self) -> Size {
        self.surface.size()
    }

    pub fn clear(&mut self) {
        self.surface.clear();
    }

    /// Draws detections already mapped into display space. Callers clear
    /// first so stale faces never survive into the next cycle.
    pub fn draw(&mut self, detections: &[Detection]) {
        for detection in detections {
            self.draw_one(detection);
        }
    }

    pub fn present(&mut self) {
        self.surface.present();
    }

    /// One cycle: clear, draw, present.
    pub fn render(&mut self, detections: &[Detection]) {
        self.clear();
        self.draw(detections);
        self.present();
    }

    fn draw_one(&mut self, detection: &Detection) {
        let style = &self.style;
        self.surface
            .stroke_rect(&detection.bbox, style.box_color, style.box_line_width);
        if let Some(label) = &style.score_label {
            let anchor = Point::new(detection.bbox.x, detection.bbox.y);
            self.surface
                .draw_text(anchor, &score_text(detection.score), label);
        }

        let points = &detection.landmarks;
        let topology = LandmarkTopology::for_point_count(points.len());
        for contour in topology.contours() {
            self.surface.stroke_polyline(
                &points[contour.indices.clone()],
                contour.closed,
                style.landmark_line_color,
                style.landmark_line_width,
            );
        }
        for &p in points {
            self.surface
                .fill_point(p, style.point_radius, style.point_color);
        }
    }
}

/// Scores are shown with two decimals, e.g. `0.93`.
fn score_text(score: f64) -> String {
    format!("{score:.2}")
}
