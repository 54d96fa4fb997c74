//! Stubs shared by the sync loop and player shell tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::detection::domain::detection_engine::DetectionEngine;
use crate::pipeline::cycle_logger::{CycleLogger, METRIC_DROPPED_TICKS};
use crate::shared::detection::{BoundingBox, Detection};
use crate::shared::error::OverlayError;
use crate::shared::frame::Frame;
use crate::shared::geometry::Size;
use crate::video::domain::frame_source::{FrameSource, MediaOpener};

// --- Frame source ---

pub(crate) struct StubFrameSource {
    native: Size,
    ready: AtomicBool,
    playing: AtomicBool,
}

impl StubFrameSource {
    pub fn new(native: Size) -> Self {
        Self {
            native,
            ready: AtomicBool::new(true),
            playing: AtomicBool::new(false),
        }
    }

    pub fn not_ready(native: Size) -> Self {
        let source = Self::new(native);
        source.ready.store(false, Ordering::SeqCst);
        source
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }
}

impl FrameSource for StubFrameSource {
    fn ready(&self) -> Result<Size, OverlayError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(self.native)
        } else {
            Err(OverlayError::NotReady)
        }
    }

    fn current_frame(&self) -> Result<Arc<Frame>, OverlayError> {
        let size = self.ready()?;
        let len = (size.width * size.height * 3) as usize;
        Ok(Arc::new(Frame::new(vec![0; len], size.width, size.height, 3, 0)))
    }

    fn play(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

// --- Engine ---

pub(crate) const STUB_FACE: BoundingBox = BoundingBox::new(10.0, 10.0, 100.0, 100.0);

/// Counters a [`StubEngine`] updates, readable after the engine moved into
/// a loop.
#[derive(Default)]
pub(crate) struct EngineProbe {
    pub load_calls: AtomicUsize,
    pub detect_calls: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub detect_started: AtomicBool,
}

impl EngineProbe {
    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }
}

/// Returns one face per frame at native (10, 10, 100, 100) after `delay`.
pub(crate) struct StubEngine {
    pub probe: Arc<EngineProbe>,
    delay: Duration,
    fail_load: bool,
    loaded: bool,
}

impl StubEngine {
    pub fn new(delay: Duration) -> Self {
        Self {
            probe: Arc::new(EngineProbe::default()),
            delay,
            fail_load: false,
            loaded: false,
        }
    }

    pub fn failing_load() -> Self {
        Self {
            fail_load: true,
            ..Self::new(Duration::ZERO)
        }
    }
}

impl DetectionEngine for StubEngine {
    fn load_models(&mut self) -> Result<(), OverlayError> {
        self.probe.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(OverlayError::ModelLoad("asset fetch failed".into()));
        }
        self.loaded = true;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, OverlayError> {
        if !self.loaded {
            return Err(OverlayError::ModelsNotLoaded);
        }
        let probe = &self.probe;
        probe.detect_calls.fetch_add(1, Ordering::SeqCst);
        let now = probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        probe.max_active.fetch_max(now, Ordering::SeqCst);
        probe.detect_started.store(true, Ordering::SeqCst);

        std::thread::sleep(self.delay);

        probe.active.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![Detection::new(STUB_FACE, 0.9, vec![])])
    }
}

/// Plays back canned detection results in order, then keeps repeating the
/// last one.
pub(crate) struct ScriptedEngine {
    script: VecDeque<Result<Vec<Detection>, OverlayError>>,
    loaded: bool,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Result<Vec<Detection>, OverlayError>>) -> Self {
        Self {
            script: script.into(),
            loaded: false,
        }
    }
}

impl DetectionEngine for ScriptedEngine {
    fn load_models(&mut self) -> Result<(), OverlayError> {
        self.loaded = true;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, OverlayError> {
        if self.script.len() > 1 {
            if let Some(next) = self.script.pop_front() {
                return next;
            }
        }
        self.script.front().cloned().unwrap_or(Ok(Vec::new()))
    }
}

// --- Logger ---

/// Counts dropped-tick metrics into a shared counter.
#[derive(Default)]
pub(crate) struct CountingLogger {
    pub dropped_ticks: Arc<AtomicUsize>,
}

impl CycleLogger for CountingLogger {
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}

    fn metric(&mut self, name: &str, _value: f64) {
        if name == METRIC_DROPPED_TICKS {
            self.dropped_ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn info(&mut self, _message: &str) {}
}

// --- Media opener ---

/// Opens any path to a stub source whose native size is looked up by file
/// name; unknown names fail like an unsupported file.
pub(crate) struct StubOpener {
    pub sizes: Vec<(&'static str, Size)>,
    pub opened: Arc<Mutex<Vec<PathBuf>>>,
}

impl StubOpener {
    pub fn new(sizes: Vec<(&'static str, Size)>) -> Self {
        Self {
            sizes,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MediaOpener for StubOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn FrameSource>, OverlayError> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let size = self
            .sizes
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, s)| *s)
            .ok_or_else(|| OverlayError::media_load(path, "unsupported format"))?;
        self.opened.lock().unwrap().push(path.to_path_buf());
        Ok(Arc::new(StubFrameSource::new(size)))
    }
}

// --- Helpers ---

pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
