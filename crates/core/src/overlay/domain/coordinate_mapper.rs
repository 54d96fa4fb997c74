//! Native frame space → display space.
//!
//! Each axis is scaled independently, so a 4:3 frame shown in a 16:9 box is
//! stretched exactly the way the video surface stretches it.

use crate::shared::detection::{BoundingBox, Detection, Point};
use crate::shared::error::OverlayError;
use crate::shared::geometry::{ScaleFactors, Size};

pub fn map(detection: &Detection, native: Size, display: Size) -> Result<Detection, OverlayError> {
    let scale = ScaleFactors::between(native, display)?;
    Ok(apply(detection, scale))
}

/// Maps a whole cycle's detections with one set of scale factors.
pub fn map_all(
    detections: &[Detection],
    native: Size,
    display: Size,
) -> Result<Vec<Detection>, OverlayError> {
    let scale = ScaleFactors::between(native, display)?;
    Ok(detections.iter().map(|d| apply(d, scale)).collect())
}

fn apply(detection: &Detection, scale: ScaleFactors) -> Detection {
    let b = &detection.bbox;
    Detection {
        bbox: BoundingBox::new(
            b.x * scale.x,
            b.y * scale.y,
            b.width * scale.x,
            b.height * scale.y,
        ),
        score: detection.score,
        landmarks: detection
            .landmarks
            .iter()
            .map(|p| Point::new(p.x * scale.x, p.y * scale.y))
            .collect(),
    }
}
