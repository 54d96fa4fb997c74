use std::time::Duration;

/// Face model with five keypoints per detection.
pub const FACE_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";

/// Fixed location all model files are fetched from.
pub const MODEL_BASE_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0";

/// Every file `load_models` must resolve before the first detection.
pub const REQUIRED_MODELS: &[&str] = &[FACE_MODEL_NAME];

/// Interval between detection cycles.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Extensions offered by the file picker. Anything else is still handed to
/// the decoder if the user chooses it.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "mkv", "webm", "avi", "ogv", "mpg", "mpeg", "wmv",
];
