use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the overlay pipeline.
///
/// Per-cycle variants (`NotReady`, `InvalidGeometry`, `Inference`) are
/// absorbed by the sync loop and only skip that cycle. `MediaLoad` and
/// `ModelLoad` end up in front of the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OverlayError {
    #[error("video source is not ready: frame geometry is not known yet")]
    NotReady,
    #[error("detection requested before models finished loading")]
    ModelsNotLoaded,
    #[error("invalid native frame geometry {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },
    #[error("failed to load media {path}: {reason}")]
    MediaLoad { path: PathBuf, reason: String },
    #[error("failed to load detection models: {0}")]
    ModelLoad(String),
    #[error("video frame could not be decoded: {0}")]
    Decode(String),
    #[error("face detection failed: {0}")]
    Inference(String),
    #[error("overlay surface is no longer available")]
    SurfaceLost,
}

impl OverlayError {
    pub fn media_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        OverlayError::MediaLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that only invalidate the current detection cycle.
    pub fn is_per_cycle(&self) -> bool {
        matches!(
            self,
            OverlayError::NotReady
                | OverlayError::InvalidGeometry { .. }
                | OverlayError::Inference(_)
                | OverlayError::ModelsNotLoaded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_media_load_message_names_path() {
        let err = OverlayError::media_load("/tmp/clip.xyz", "Invalid data found");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/clip.xyz"));
        assert!(msg.contains("Invalid data found"));
    }

    #[test]
    fn test_invalid_geometry_message() {
        let err = OverlayError::InvalidGeometry {
            width: 0,
            height: 720,
        };
        assert_eq!(err.to_string(), "invalid native frame geometry 0x720");
    }

    #[rstest]
    #[case::not_ready(OverlayError::NotReady, true)]
    #[case::geometry(OverlayError::InvalidGeometry { width: 0, height: 0 }, true)]
    #[case::inference(OverlayError::Inference("boom".into()), true)]
    #[case::models(OverlayError::ModelsNotLoaded, true)]
    #[case::media(OverlayError::media_load("a.mp4", "bad"), false)]
    #[case::model_load(OverlayError::ModelLoad("404".into()), false)]
    #[case::surface(OverlayError::SurfaceLost, false)]
    #[case::decode(OverlayError::Decode("eof".into()), false)]
    fn test_is_per_cycle(#[case] err: OverlayError, #[case] expected: bool) {
        assert_eq!(err.is_per_cycle(), expected);
    }
}
