use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, tick, unbounded, Receiver, Sender, TrySendError};

use crate::detection::domain::detection_engine::{DetectionEngine, SharedEngine};
use crate::overlay::domain::coordinate_mapper;
use crate::overlay::domain::overlay_renderer::OverlayRenderer;
use crate::pipeline::cycle_logger::{
    CycleLogger, NullCycleLogger, METRIC_DROPPED_TICKS, METRIC_FACES, STAGE_DETECT, STAGE_DRAW,
};
use crate::shared::detection::Detection;
use crate::shared::error::OverlayError;
use crate::shared::frame::Frame;
use crate::shared::geometry::Size;
use crate::video::domain::video_source::VideoSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// No video source.
    Idle,
    /// Source chosen; waiting for models and for the first ready frame.
    Loading,
    Running,
    Stopped,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopState::Loading,
            2 => LoopState::Running,
            3 => LoopState::Stopped,
            _ => LoopState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LoopState::Idle => 0,
            LoopState::Loading => 1,
            LoopState::Running => 2,
            LoopState::Stopped => 3,
        }
    }
}

/// Point-in-time copy of a loop's counters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoopStats {
    pub cycles_drawn: u64,
    pub ticks_dropped: u64,
    pub cycles_skipped: u64,
    pub last_error: Option<OverlayError>,
}

/// Loop state and counters, written by the loop thread and read by anyone.
#[derive(Default)]
pub struct LoopStatus {
    state: AtomicU8,
    cycles_drawn: AtomicU64,
    ticks_dropped: AtomicU64,
    cycles_skipped: AtomicU64,
    last_error: Mutex<Option<OverlayError>>,
}

impl LoopStatus {
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            cycles_drawn: self.cycles_drawn.load(Ordering::Relaxed),
            ticks_dropped: self.ticks_dropped.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            last_error: lock(&self.last_error).clone(),
        }
    }

    fn set_state(&self, state: LoopState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn record_error(&self, error: OverlayError) {
        *lock(&self.last_error) = Some(error);
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct DetectRequest {
    cycle: u64,
    frame: Arc<Frame>,
}

enum WorkerEvent {
    ModelsLoaded,
    ModelLoadFailed(OverlayError),
    Detected {
        cycle: u64,
        /// Size of the frame this result was computed from.
        native: Size,
        result: Result<Vec<Detection>, OverlayError>,
        elapsed: Duration,
    },
}

/// Samples the playing frame on a fixed cadence, detects faces on it and
/// redraws the overlay.
///
/// A loop serves exactly one [`VideoSource`]. Switching files means
/// cancelling the running loop and starting a fresh one; the
/// [`OverlayRenderer`] is handed back on cancel for that purpose.
///
/// Threads: the loop thread owns the renderer and multiplexes stop requests,
/// ticks and detection results with `select!`. A per-loop worker thread
/// loads models and then runs one detection at a time. Ticks that fire
/// while a detection is outstanding are dropped.
pub struct SyncLoop {
    source: VideoSource,
    engine: SharedEngine,
    renderer: OverlayRenderer,
    tick_interval: Duration,
    logger: Box<dyn CycleLogger>,
}

impl SyncLoop {
    pub fn new(
        source: VideoSource,
        engine: SharedEngine,
        renderer: OverlayRenderer,
        tick_interval: Duration,
    ) -> Self {
        Self {
            source,
            engine,
            renderer,
            tick_interval,
            logger: Box::new(NullCycleLogger),
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn CycleLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn start(self) -> LoopHandle {
        let status = Arc::new(LoopStatus::default());
        status.set_state(LoopState::Loading);
        log::info!(
            "Starting overlay loop for {} every {:?}",
            self.source.path().display(),
            self.tick_interval
        );

        let (control_tx, control_rx) = bounded::<()>(1);
        let (request_tx, request_rx) = bounded::<DetectRequest>(1);
        let (event_tx, event_rx) = unbounded::<WorkerEvent>();

        // Detached: a slow inference must not hold up cancellation. Its
        // result lands on a channel nobody reads any more.
        spawn_worker(Arc::clone(&self.engine), request_rx, event_tx);

        let runner = CycleRunner {
            source: self.source,
            renderer: self.renderer,
            logger: self.logger,
            status: Arc::clone(&status),
            requests: request_tx,
            models_loaded: false,
            worker_alive: true,
            in_flight: None,
            next_cycle: 0,
        };
        let ticks = tick(self.tick_interval);
        let thread = std::thread::spawn(move || runner.run(control_rx, ticks, event_rx));

        LoopHandle {
            control: control_tx,
            thread: Some(thread),
            status,
        }
    }
}

fn spawn_worker(
    engine: SharedEngine,
    requests: Receiver<DetectRequest>,
    events: Sender<WorkerEvent>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let loaded = {
            let mut engine = lock_engine(&engine);
            if engine.is_loaded() {
                Ok(())
            } else {
                engine.load_models()
            }
        };
        let event = match loaded {
            Ok(()) => WorkerEvent::ModelsLoaded,
            Err(e) => {
                let _ = events.send(WorkerEvent::ModelLoadFailed(e));
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }

        for request in requests {
            let start = Instant::now();
            let result = lock_engine(&engine).detect(&request.frame);
            let event = WorkerEvent::Detected {
                cycle: request.cycle,
                native: request.frame.size(),
                result,
                elapsed: start.elapsed(),
            };
            if events.send(event).is_err() {
                break;
            }
        }
    })
}

fn lock_engine(engine: &SharedEngine) -> MutexGuard<'_, Box<dyn DetectionEngine>> {
    lock(&**engine)
}

struct CycleRunner {
    source: VideoSource,
    renderer: OverlayRenderer,
    logger: Box<dyn CycleLogger>,
    status: Arc<LoopStatus>,
    requests: Sender<DetectRequest>,
    models_loaded: bool,
    worker_alive: bool,
    in_flight: Option<u64>,
    next_cycle: u64,
}

impl CycleRunner {
    fn run(
        mut self,
        control: Receiver<()>,
        ticks: Receiver<Instant>,
        events: Receiver<WorkerEvent>,
    ) -> OverlayRenderer {
        let mut events = events;
        loop {
            let mut worker_gone = false;
            select! {
                recv(control) -> _ => break,
                recv(ticks) -> _ => self.on_tick(),
                recv(events) -> msg => match msg {
                    Ok(event) => self.on_event(event),
                    Err(_) => worker_gone = true,
                },
            }
            if worker_gone {
                self.on_worker_gone();
                events = never();
            }
        }
        self.finish()
    }

    fn on_tick(&mut self) {
        if !self.models_loaded || !self.worker_alive {
            return;
        }
        if self.in_flight.is_some() {
            self.drop_tick();
            return;
        }
        if !self.promote_when_ready() {
            return;
        }

        let frame = match self.source.frame_source().current_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.skip_cycle(self.next_cycle, e);
                return;
            }
        };

        // Cycle ids are only spent on requests the worker accepted.
        let cycle = self.next_cycle;
        match self.requests.try_send(DetectRequest { cycle, frame }) {
            Ok(()) => {
                self.next_cycle += 1;
                self.in_flight = Some(cycle);
            }
            Err(TrySendError::Full(_)) => self.drop_tick(),
            Err(TrySendError::Disconnected(_)) => self.on_worker_gone(),
        }
    }

    fn drop_tick(&mut self) {
        self.status.ticks_dropped.fetch_add(1, Ordering::Relaxed);
        self.logger.metric(METRIC_DROPPED_TICKS, 1.0);
    }

    /// Moves `Loading` to `Running` once models are in and the source knows
    /// its geometry. Returns whether the loop is running.
    fn promote_when_ready(&mut self) -> bool {
        match self.status.state() {
            LoopState::Running => true,
            LoopState::Loading => match self.source.native_size() {
                Ok(native) => {
                    self.status.set_state(LoopState::Running);
                    self.logger
                        .info(&format!("Overlay running, native frame size {native}"));
                    true
                }
                Err(_) => false,
            },
            LoopState::Idle | LoopState::Stopped => false,
        }
    }

    fn on_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::ModelsLoaded => {
                self.models_loaded = true;
                self.logger.info("Detection models loaded");
                self.promote_when_ready();
            }
            WorkerEvent::ModelLoadFailed(e) => {
                // Terminal for this source: stay in Loading, never draw.
                log::error!("Model loading failed: {e}");
                self.status.record_error(e);
            }
            WorkerEvent::Detected {
                cycle,
                native,
                result,
                elapsed,
            } => self.on_detected(cycle, native, result, elapsed),
        }
    }

    fn on_detected(
        &mut self,
        cycle: u64,
        native: Size,
        result: Result<Vec<Detection>, OverlayError>,
        elapsed: Duration,
    ) {
        if self.in_flight != Some(cycle) {
            log::debug!("Discarding detection for stale cycle {cycle}");
            return;
        }
        self.in_flight = None;
        self.logger.timing(STAGE_DETECT, millis(elapsed));

        let display = self.renderer.display_size();
        let mapped = result.and_then(|d| coordinate_mapper::map_all(&d, native, display));
        match mapped {
            Ok(detections) => {
                let start = Instant::now();
                self.renderer.render(&detections);
                self.logger.timing(STAGE_DRAW, millis(start.elapsed()));
                self.logger.metric(METRIC_FACES, detections.len() as f64);
                self.status.cycles_drawn.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.skip_cycle(cycle, e),
        }
    }

    /// The previous overlay stays up until the next successful cycle
    /// replaces it.
    fn skip_cycle(&mut self, cycle: u64, error: OverlayError) {
        if error.is_per_cycle() {
            log::debug!("Skipping cycle {cycle}: {error}");
        } else {
            log::warn!("Skipping cycle {cycle}: {error}");
        }
        self.status.cycles_skipped.fetch_add(1, Ordering::Relaxed);
        self.status.record_error(error);
    }

    fn on_worker_gone(&mut self) {
        if !self.worker_alive {
            return;
        }
        self.worker_alive = false;
        self.in_flight = None;
        if self.models_loaded {
            let error = OverlayError::Inference("detection worker exited".into());
            log::error!("{error}");
            self.status.record_error(error);
        }
    }

    fn finish(mut self) -> OverlayRenderer {
        self.renderer.clear();
        self.renderer.present();
        self.status.set_state(LoopState::Stopped);
        log::info!(
            "Stopped overlay loop for {}",
            self.source.path().display()
        );
        self.logger.summary();
        self.renderer
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Owns one running [`SyncLoop`]. Cancelling (or dropping) stops the loop
/// thread and waits for it; after that nothing is drawn on its behalf.
pub struct LoopHandle {
    control: Sender<()>,
    thread: Option<JoinHandle<OverlayRenderer>>,
    status: Arc<LoopStatus>,
}

impl LoopHandle {
    pub fn state(&self) -> LoopState {
        self.status.state()
    }

    pub fn stats(&self) -> LoopStats {
        self.status.stats()
    }

    /// Shared status that outlives the handle.
    pub fn status(&self) -> Arc<LoopStatus> {
        Arc::clone(&self.status)
    }

    /// Stops the loop and returns its renderer, already cleared. `None` if
    /// the loop thread panicked and took the renderer with it.
    pub fn cancel(mut self) -> Option<OverlayRenderer> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<OverlayRenderer> {
        let thread = self.thread.take()?;
        let _ = self.control.try_send(());
        match thread.join() {
            Ok(renderer) => Some(renderer),
            Err(_) => {
                log::error!("Overlay loop thread panicked");
                self.status.set_state(LoopState::Stopped);
                None
            }
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::detection_engine::share;
    use crate::overlay::domain::overlay_renderer::tests::{Op, RecordingSurface};
    use crate::overlay::domain::overlay_renderer::OverlayStyle;
    use crate::pipeline::test_support::{
        wait_until, CountingLogger, ScriptedEngine, StubEngine, StubFrameSource, STUB_FACE,
    };
    use crate::shared::detection::{BoundingBox, Point};
    use crate::video::domain::frame_source::FrameSource;
    use std::path::Path;

    const TICK: Duration = Duration::from_millis(5);
    const WAIT: Duration = Duration::from_secs(5);

    fn display() -> Size {
        Size::new(640, 360)
    }

    fn source_with(frame_source: Arc<dyn FrameSource>) -> VideoSource {
        VideoSource::new(1, Path::new("clip.mp4"), frame_source)
    }

    fn source(native: Size) -> VideoSource {
        source_with(Arc::new(StubFrameSource::new(native)))
    }

    fn renderer() -> (OverlayRenderer, RecordingSurface) {
        let surface = RecordingSurface::new(display());
        let renderer = OverlayRenderer::new(Box::new(surface.clone()), OverlayStyle::default());
        (renderer, surface)
    }

    #[test]
    fn test_draws_detections_mapped_to_display() {
        let (renderer, surface) = renderer();
        let engine = share(Box::new(StubEngine::new(Duration::ZERO)));
        let handle = SyncLoop::new(source(Size::new(1280, 720)), engine, renderer, TICK).start();

        assert!(wait_until(WAIT, || handle.stats().cycles_drawn >= 3));
        assert_eq!(handle.state(), LoopState::Running);
        assert!(surface
            .ops()
            .contains(&Op::Rect(BoundingBox::new(5.0, 5.0, 50.0, 50.0))));

        let status = handle.status();
        let renderer = handle.cancel();
        assert!(renderer.is_some());
        assert_eq!(status.state(), LoopState::Stopped);
        let ops = surface.ops();
        assert_eq!(&ops[ops.len() - 2..], &[Op::Clear, Op::Present]);
    }

    #[test]
    fn test_never_two_detections_in_flight() {
        let (renderer, _surface) = renderer();
        let stub = StubEngine::new(Duration::from_millis(60));
        let probe = Arc::clone(&stub.probe);
        let handle =
            SyncLoop::new(source(Size::new(320, 240)), share(Box::new(stub)), renderer, TICK)
                .start();

        std::thread::sleep(Duration::from_millis(400));
        let stats = handle.stats();
        drop(handle);

        assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
        assert!(stats.ticks_dropped > 0);
        // 400ms of 60ms detections, with slack for scheduling.
        assert!(probe.detect_calls() <= 8, "{} calls", probe.detect_calls());
    }

    #[test]
    fn test_result_arriving_after_stop_is_not_drawn() {
        let (renderer, surface) = renderer();
        let stub = StubEngine::new(Duration::from_millis(200));
        let probe = Arc::clone(&stub.probe);
        let handle =
            SyncLoop::new(source(Size::new(320, 240)), share(Box::new(stub)), renderer, TICK)
                .start();

        assert!(wait_until(WAIT, || probe
            .detect_started
            .load(Ordering::SeqCst)));
        let status = handle.status();
        handle.cancel();
        let ops_at_stop = surface.ops();

        // Let the pending detection finish.
        std::thread::sleep(Duration::from_millis(350));
        assert_eq!(surface.ops(), ops_at_stop);
        assert_eq!(surface.rect_count(), 0);
        assert_eq!(status.stats().cycles_drawn, 0);
        assert_eq!(probe.detect_calls(), 1);
    }

    #[test]
    fn test_model_load_failure_stays_loading_and_never_draws() {
        let (renderer, surface) = renderer();
        let stub = StubEngine::failing_load();
        let probe = Arc::clone(&stub.probe);
        let handle =
            SyncLoop::new(source(Size::new(320, 240)), share(Box::new(stub)), renderer, TICK)
                .start();

        assert!(wait_until(WAIT, || handle.stats().last_error.is_some()));
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(handle.state(), LoopState::Loading);
        assert!(matches!(
            handle.stats().last_error,
            Some(OverlayError::ModelLoad(_))
        ));
        assert_eq!(probe.detect_calls(), 0);
        assert!(surface.ops().is_empty());

        handle.cancel();
        assert_eq!(surface.rect_count(), 0);
    }

    #[test]
    fn test_waits_for_source_geometry_before_running() {
        let (renderer, _surface) = renderer();
        let frame_source = Arc::new(StubFrameSource::not_ready(Size::new(320, 240)));
        let stub = StubEngine::new(Duration::ZERO);
        let probe = Arc::clone(&stub.probe);
        let handle = SyncLoop::new(
            source_with(frame_source.clone()),
            share(Box::new(stub)),
            renderer,
            TICK,
        )
        .start();

        assert!(wait_until(WAIT, || probe.load_calls.load(Ordering::SeqCst) == 1));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(handle.state(), LoopState::Loading);
        assert_eq!(probe.detect_calls(), 0);

        frame_source.set_ready();
        assert!(wait_until(WAIT, || handle.stats().cycles_drawn >= 1));
        assert_eq!(handle.state(), LoopState::Running);
    }

    #[test]
    fn test_loaded_engine_is_not_reloaded_by_next_loop() {
        let stub = StubEngine::new(Duration::ZERO);
        let probe = Arc::clone(&stub.probe);
        let engine = share(Box::new(stub));

        let (renderer, _surface) = renderer();
        let first = SyncLoop::new(source(Size::new(64, 64)), engine.clone(), renderer, TICK).start();
        assert!(wait_until(WAIT, || first.stats().cycles_drawn >= 1));
        let renderer = first.cancel().unwrap();

        let second = SyncLoop::new(source(Size::new(64, 64)), engine, renderer, TICK).start();
        assert!(wait_until(WAIT, || second.stats().cycles_drawn >= 1));
        assert_eq!(probe.load_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_sized_frames_skip_cycles_without_stopping() {
        let (renderer, surface) = renderer();
        let engine = share(Box::new(StubEngine::new(Duration::ZERO)));
        let handle = SyncLoop::new(source(Size::new(0, 0)), engine, renderer, TICK).start();

        assert!(wait_until(WAIT, || handle.stats().cycles_skipped >= 3));
        let stats = handle.stats();
        assert_eq!(stats.cycles_drawn, 0);
        assert!(matches!(
            stats.last_error,
            Some(OverlayError::InvalidGeometry { .. })
        ));
        assert_eq!(handle.state(), LoopState::Running);
        assert_eq!(surface.rect_count(), 0);
    }

    #[test]
    fn test_failed_detection_skips_cycle_and_next_success_replaces_overlay() {
        let (renderer, surface) = renderer();
        let face = || Ok(vec![Detection::new(STUB_FACE, 0.9, vec![])]);
        let engine = ScriptedEngine::new(vec![
            face(),
            Err(OverlayError::Inference("session run failed".into())),
            face(),
        ]);
        let handle = SyncLoop::new(
            source(Size::new(1280, 720)),
            share(Box::new(engine)),
            renderer,
            TICK,
        )
        .start();

        assert!(wait_until(WAIT, || handle.stats().cycles_drawn >= 2));
        let stats = handle.stats();
        assert_eq!(handle.state(), LoopState::Running);
        assert_eq!(stats.cycles_skipped, 1);
        assert!(matches!(stats.last_error, Some(OverlayError::Inference(_))));

        // The failed cycle touches nothing; the next success starts with a clear.
        let cycle = [
            Op::Clear,
            Op::Rect(BoundingBox::new(5.0, 5.0, 50.0, 50.0)),
            Op::Label("0.90".into(), Point::new(5.0, 5.0)),
            Op::Present,
        ];
        let ops = surface.ops();
        assert_eq!(&ops[..4], &cycle);
        assert_eq!(&ops[4..8], &cycle);
    }

    #[test]
    fn test_every_dropped_tick_is_reported_to_logger() {
        let (renderer, _surface) = renderer();
        let logger = CountingLogger::default();
        let dropped = Arc::clone(&logger.dropped_ticks);
        let handle = SyncLoop::new(
            source(Size::new(320, 240)),
            share(Box::new(StubEngine::new(Duration::from_millis(40)))),
            renderer,
            TICK,
        )
        .with_logger(Box::new(logger))
        .start();

        assert!(wait_until(WAIT, || handle.stats().ticks_dropped >= 3));
        let status = handle.status();
        handle.cancel();
        assert_eq!(
            dropped.load(Ordering::SeqCst) as u64,
            status.stats().ticks_dropped
        );
    }

    #[test]
    fn test_dropping_handle_stops_loop() {
        let (renderer, _surface) = renderer();
        let engine = share(Box::new(StubEngine::new(Duration::ZERO)));
        let handle = SyncLoop::new(source(Size::new(64, 64)), engine, renderer, TICK).start();
        let status = handle.status();

        drop(handle);
        assert_eq!(status.state(), LoopState::Stopped);
    }

    #[test]
    fn test_loop_state_round_trips_through_atomic() {
        for state in [
            LoopState::Idle,
            LoopState::Loading,
            LoopState::Running,
            LoopState::Stopped,
        ] {
            assert_eq!(LoopState::from_u8(state.as_u8()), state);
        }
        assert_eq!(LoopStatus::default().state(), LoopState::Idle);
    }
}
