use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::detection::domain::detection_engine::SharedEngine;
use crate::overlay::domain::overlay_renderer::OverlayRenderer;
use crate::pipeline::cycle_logger::{CycleLogger, NullCycleLogger};
use crate::pipeline::sync_loop::{LoopHandle, LoopState, LoopStats, SyncLoop};
use crate::shared::constants::DEFAULT_TICK_INTERVAL;
use crate::shared::error::OverlayError;
use crate::shared::frame::Frame;
use crate::shared::geometry::{Size, DEFAULT_DISPLAY_SIZE};
use crate::video::domain::frame_source::MediaOpener;
use crate::video::domain::video_source::VideoSource;

/// Player-wide settings that outlive any one file.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerConfig {
    /// Size of the video area and of the overlay laid over it.
    pub display: Size,
    pub tick_interval: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            display: DEFAULT_DISPLAY_SIZE,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

type LoggerFactory = Box<dyn Fn() -> Box<dyn CycleLogger> + Send>;

/// The two user actions, choose file and play/pause, over one video
/// area with its overlay.
///
/// Holds at most one [`LoopHandle`]. Choosing a file always cancels the
/// current loop (getting the renderer back) before a new one is started.
pub struct PlayerShell {
    opener: Box<dyn MediaOpener>,
    engine: SharedEngine,
    renderer: Option<OverlayRenderer>,
    config: PlayerConfig,
    logger_factory: LoggerFactory,
    source: Option<VideoSource>,
    active_loop: Option<LoopHandle>,
    next_source_id: u64,
}

impl PlayerShell {
    pub fn new(
        opener: Box<dyn MediaOpener>,
        engine: SharedEngine,
        renderer: OverlayRenderer,
        config: PlayerConfig,
    ) -> Self {
        Self {
            opener,
            engine,
            renderer: Some(renderer),
            config,
            logger_factory: Box::new(|| Box::new(NullCycleLogger)),
            source: None,
            active_loop: None,
            next_source_id: 0,
        }
    }

    /// Each started loop gets a fresh logger from `factory`.
    pub fn with_logger_factory(
        mut self,
        factory: impl Fn() -> Box<dyn CycleLogger> + Send + 'static,
    ) -> Self {
        self.logger_factory = Box::new(factory);
        self
    }

    /// Replaces the current file. The previous loop is stopped first, so on
    /// a `MediaLoad` failure the player is left empty (`Idle`). New files
    /// start paused on their first frame.
    pub fn choose_file(&mut self, path: &Path) -> Result<&VideoSource, OverlayError> {
        self.unload();

        let frame_source = self.opener.open(path)?;
        let renderer = self.renderer.take().ok_or(OverlayError::SurfaceLost)?;

        self.next_source_id += 1;
        let source = VideoSource::new(self.next_source_id, path, frame_source);
        log::info!("Loaded {} (source {})", path.display(), source.id());

        let handle = SyncLoop::new(
            source.clone(),
            Arc::clone(&self.engine),
            renderer,
            self.config.tick_interval,
        )
        .with_logger((self.logger_factory)())
        .start();
        self.active_loop = Some(handle);

        Ok(&*self.source.insert(source))
    }

    /// Returns the new playing state; `false` with nothing loaded.
    pub fn toggle_play_pause(&mut self) -> bool {
        let Some(source) = &self.source else {
            return false;
        };
        let frame_source = source.frame_source();
        if frame_source.is_playing() {
            frame_source.pause();
        } else {
            frame_source.play();
        }
        frame_source.is_playing()
    }

    pub fn is_playing(&self) -> bool {
        self.source
            .as_ref()
            .is_some_and(|s| s.frame_source().is_playing())
    }

    /// Stops the loop, clears the overlay and releases the file.
    pub fn unload(&mut self) {
        if let Some(handle) = self.active_loop.take() {
            match handle.cancel() {
                Some(renderer) => self.renderer = Some(renderer),
                None => log::error!("Overlay surface lost with its loop"),
            }
        }
        if let Some(source) = self.source.take() {
            source.frame_source().pause();
            log::debug!("Released {}", source.path().display());
        }
    }

    pub fn state(&self) -> LoopState {
        self.active_loop
            .as_ref()
            .map_or(LoopState::Idle, LoopHandle::state)
    }

    pub fn stats(&self) -> Option<LoopStats> {
        self.active_loop.as_ref().map(LoopHandle::stats)
    }

    pub fn source(&self) -> Option<&VideoSource> {
        self.source.as_ref()
    }

    /// The frame the video area should show right now.
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.source.as_ref()?.frame_source().current_frame().ok()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }
}

impl Drop for PlayerShell {
    fn drop(&mut self) {
        self.unload();
    }
}
