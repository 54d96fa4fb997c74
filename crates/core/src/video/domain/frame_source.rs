use std::path::Path;
use std::sync::Arc;

use crate::shared::error::OverlayError;
use crate::shared::frame::Frame;
use crate::shared::geometry::Size;

/// The playback side of the player: whatever is currently on screen.
///
/// Shared between the shell (play/pause) and the sync loop (sampling), so
/// every method takes `&self`.
pub trait FrameSource: Send + Sync {
    /// Native frame dimensions. Fails with `NotReady` until the media has
    /// reported its geometry.
    fn ready(&self) -> Result<Size, OverlayError>;

    /// The most recently displayed frame. Playback keeps running, so the
    /// next call may return a different frame.
    fn current_frame(&self) -> Result<Arc<Frame>, OverlayError>;

    fn play(&self);

    fn pause(&self);

    fn is_playing(&self) -> bool;
}

/// Turns a user-chosen file into a playable [`FrameSource`].
///
/// Unsupported or unreadable files fail with `MediaLoad`.
pub trait MediaOpener: Send {
    fn open(&self, path: &Path) -> Result<Arc<dyn FrameSource>, OverlayError>;
}
