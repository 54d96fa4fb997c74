use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::shared::error::OverlayError;
use crate::shared::geometry::Size;

use super::frame_source::FrameSource;

/// The media currently loaded into the player.
///
/// Owns the playback resource; dropping the last reference to the frame
/// source stops decoding and closes the file.
#[derive(Clone)]
pub struct VideoSource {
    id: u64,
    path: PathBuf,
    frame_source: Arc<dyn FrameSource>,
}

impl VideoSource {
    pub fn new(id: u64, path: &Path, frame_source: Arc<dyn FrameSource>) -> Self {
        Self {
            id,
            path: path.to_path_buf(),
            frame_source,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Native width/height, available only once the source is ready.
    pub fn native_size(&self) -> Result<Size, OverlayError> {
        self.frame_source.ready()
    }

    pub fn frame_source(&self) -> &Arc<dyn FrameSource> {
        &self.frame_source
    }
}

impl std::fmt::Debug for VideoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSource")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}
