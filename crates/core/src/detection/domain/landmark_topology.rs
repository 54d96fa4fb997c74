//! Connectivity of facial landmark sequences.
//!
//! The topology is a function of how many points a detector emits; the
//! renderer only ever slices the sequence, it never reorders it.
//!
//! The bundled ONNX engine emits the 5-point layout. The iBUG 68-point
//! layout serves dense landmark models plugged in through
//! [`DetectionEngine`](super::detection_engine::DetectionEngine).

use std::ops::Range;

/// A run of consecutive landmark indices drawn as one polyline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contour {
    pub indices: Range<usize>,
    pub closed: bool,
}

const fn open(start: usize, end: usize) -> Contour {
    Contour {
        indices: start..end,
        closed: false,
    }
}

const fn closed(start: usize, end: usize) -> Contour {
    Contour {
        indices: start..end,
        closed: true,
    }
}

/// iBUG 68-point layout.
static IBUG_68: [Contour; 9] = [
    open(0, 17),    // jaw
    open(17, 22),   // right brow
    open(22, 27),   // left brow
    open(27, 31),   // nose bridge
    open(30, 36),   // lower nose
    closed(36, 42), // right eye
    closed(42, 48), // left eye
    closed(48, 60), // outer lips
    closed(60, 68), // inner lips
];

/// Mouth corners of the 5-point layout
/// [left eye, right eye, nose, left mouth, right mouth].
static FIVE_POINT: [Contour; 1] = [open(3, 5)];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LandmarkTopology {
    /// 68 points: jaw, brows, nose, eyes, lips.
    Ibug68,
    /// 5 points: eyes, nose tip, mouth corners.
    FivePoint,
    /// Unknown layout; points are drawn unconnected.
    Points,
}

impl LandmarkTopology {
    pub fn for_point_count(count: usize) -> Self {
        match count {
            68 => LandmarkTopology::Ibug68,
            5 => LandmarkTopology::FivePoint,
            _ => LandmarkTopology::Points,
        }
    }

    pub fn contours(self) -> &'static [Contour] {
        match self {
            LandmarkTopology::Ibug68 => &IBUG_68,
            LandmarkTopology::FivePoint => &FIVE_POINT,
            LandmarkTopology::Points => &[],
        }
    }
}
