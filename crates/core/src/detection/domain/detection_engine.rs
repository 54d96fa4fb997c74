use std::sync::{Arc, Mutex};

use crate::shared::detection::Detection;
use crate::shared::error::OverlayError;
use crate::shared::frame::Frame;

/// Domain interface for face detection with landmarks.
///
/// `detect` may take longer than one loop tick. Callers never run two
/// detections against one engine at the same time; engines may therefore
/// keep per-call scratch state behind `&mut self`.
pub trait DetectionEngine: Send {
    /// Loads every model the engine needs. Must succeed before `detect`.
    fn load_models(&mut self) -> Result<(), OverlayError>;

    fn is_loaded(&self) -> bool;

    /// Detections in the input frame's pixel space, in no particular order.
    /// Fails with `ModelsNotLoaded` when called before `load_models`.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, OverlayError>;
}

/// One engine shared by every sync loop a player starts. The mutex is what
/// serializes a retiring loop's last inference against a new loop's first.
pub type SharedEngine = Arc<Mutex<Box<dyn DetectionEngine>>>;

pub fn share(engine: Box<dyn DetectionEngine>) -> SharedEngine {
    Arc::new(Mutex::new(engine))
}
