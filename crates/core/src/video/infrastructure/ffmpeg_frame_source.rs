use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::shared::error::OverlayError;
use crate::shared::frame::Frame;
use crate::shared::geometry::Size;
use crate::video::domain::frame_source::{FrameSource, MediaOpener};

/// Pacing used when the stream does not declare a frame rate.
const FALLBACK_FPS: f64 = 30.0;

/// Upper bound on how long the decode thread sleeps while paused before
/// re-checking its flags.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Opens files with [`FfmpegFrameSource`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegMediaOpener;

impl MediaOpener for FfmpegMediaOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn FrameSource>, OverlayError> {
        Ok(Arc::new(FfmpegFrameSource::open(path)?))
    }
}

/// Real-time playback of a video file via ffmpeg-next.
///
/// A decode thread converts frames to RGB24 and publishes them at the
/// stream's frame rate while playing. The first frame is decoded even when
/// paused; that is the moment the source becomes ready.
pub struct FfmpegFrameSource {
    state: Arc<PlaybackState>,
    decode_thread: Mutex<Option<JoinHandle<()>>>,
}

impl FfmpegFrameSource {
    /// Probes the container and starts the decode thread (paused).
    pub fn open(path: &Path) -> Result<Self, OverlayError> {
        let session = DecodeSession::open(path)?;
        log::info!(
            "Opened {} ({}x{} @ {:.2} fps)",
            path.display(),
            session.width,
            session.height,
            1.0 / session.frame_interval.as_secs_f64()
        );

        let state = Arc::new(PlaybackState::new());
        let thread_state = state.clone();
        let handle = thread::Builder::new()
            .name("video-decode".into())
            .spawn(move || run_playback(session, thread_state))
            .map_err(|e| OverlayError::media_load(path, e))?;

        Ok(Self {
            state,
            decode_thread: Mutex::new(Some(handle)),
        })
    }

    /// True once decoding reached the end of the stream.
    pub fn has_ended(&self) -> bool {
        self.state.ended.load(Ordering::Acquire)
    }
}

impl FrameSource for FfmpegFrameSource {
    fn ready(&self) -> Result<Size, OverlayError> {
        (*lock(&self.state.native)).ok_or(OverlayError::NotReady)
    }

    fn current_frame(&self) -> Result<Arc<Frame>, OverlayError> {
        lock(&self.state.latest)
            .clone()
            .ok_or(OverlayError::NotReady)
    }

    fn play(&self) {
        self.state.playing.store(true, Ordering::Release);
        self.state.wake();
    }

    fn pause(&self) {
        self.state.playing.store(false, Ordering::Release);
    }

    fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::Acquire)
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        self.state.closed.store(true, Ordering::Release);
        self.state.wake();
        if let Some(handle) = lock(&self.decode_thread).take() {
            if handle.join().is_err() {
                log::error!("Decode thread panicked");
            }
        }
    }
}

struct PlaybackState {
    playing: AtomicBool,
    closed: AtomicBool,
    ended: AtomicBool,
    native: Mutex<Option<Size>>,
    latest: Mutex<Option<Arc<Frame>>>,
    signal_lock: Mutex<()>,
    signal: Condvar,
}

impl PlaybackState {
    fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            native: Mutex::new(None),
            latest: Mutex::new(None),
            signal_lock: Mutex::new(()),
            signal: Condvar::new(),
        }
    }

    fn publish(&self, frame: Frame) {
        let mut native = lock(&self.native);
        if native.is_none() {
            log::debug!("Video ready: {}", frame.size());
        }
        *native = Some(frame.size());
        drop(native);
        *lock(&self.latest) = Some(Arc::new(frame));
    }

    fn wait(&self, timeout: Duration) {
        let guard = lock(&self.signal_lock);
        let _ = self
            .signal
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn wake(&self) {
        let _guard = lock(&self.signal_lock);
        self.signal.notify_all();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_playback(mut session: DecodeSession, state: Arc<PlaybackState>) {
    let mut has_poster = false;
    let mut next_due = Instant::now();

    while !state.closed.load(Ordering::Acquire) {
        let playing = state.playing.load(Ordering::Acquire);
        if has_poster && (!playing || session.done) {
            if session.done && playing {
                state.playing.store(false, Ordering::Release);
            }
            state.wait(IDLE_WAIT);
            next_due = Instant::now();
            continue;
        }

        match session.next_frame() {
            Some(Ok(frame)) => {
                state.publish(frame);
                has_poster = true;
            }
            Some(Err(e)) => log::warn!("Skipping undecodable frame: {e}"),
            None => {
                log::info!("End of stream after {} frames", session.frame_index);
                state.ended.store(true, Ordering::Release);
                state.playing.store(false, Ordering::Release);
                has_poster = true;
                continue;
            }
        }

        if !state.playing.load(Ordering::Acquire) {
            continue;
        }
        next_due += session.frame_interval;
        let now = Instant::now();
        if next_due > now {
            state.wait(next_due - now);
        } else {
            // Behind schedule: resync instead of bursting frames.
            next_due = now;
        }
    }
}

/// Demuxer, decoder and RGB converter for one open file.
struct DecodeSession {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    /// Input side of `scaler`; together with `width`/`height`.
    source_format: ffmpeg_next::format::Pixel,
    stream_index: usize,
    time_base: f64,
    frame_interval: Duration,
    width: u32,
    height: u32,
    frame_index: usize,
    flushing: bool,
    done: bool,
}

// Safety: a DecodeSession is built on the opening thread and then moved into
// the decode thread, which is its only user from then on.
unsafe impl Send for DecodeSession {}

impl DecodeSession {
    fn open(path: &Path) -> Result<Self, OverlayError> {
        ffmpeg_next::init().map_err(|e| OverlayError::media_load(path, e))?;

        let ictx = ffmpeg_next::format::input(path).map_err(|e| OverlayError::media_load(path, e))?;

        let (stream_index, rate, time_base, decoder) = {
            let stream = ictx
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or_else(|| OverlayError::media_load(path, "no video stream found"))?;
            let codec_ctx =
                ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
                    .map_err(|e| OverlayError::media_load(path, e))?;
            let decoder = codec_ctx
                .decoder()
                .video()
                .map_err(|e| OverlayError::media_load(path, e))?;
            (stream.index(), stream.rate(), stream.time_base(), decoder)
        };

        let width = decoder.width();
        let height = decoder.height();
        if width == 0 || height == 0 {
            return Err(OverlayError::media_load(path, "video stream has no frame size"));
        }

        let source_format = decoder.format();
        let scaler = rgb_scaler(source_format, width, height)
            .map_err(|e| OverlayError::media_load(path, e))?;

        Ok(Self {
            ictx,
            decoder,
            scaler,
            source_format,
            stream_index,
            time_base: rational_to_f64(time_base).unwrap_or(0.0),
            frame_interval: frame_interval(rational_to_f64(rate)),
            width,
            height,
            frame_index: 0,
            flushing: false,
            done: false,
        })
    }

    /// Decodes the next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Option<Result<Frame, OverlayError>> {
        if self.done {
            return None;
        }
        if let Some(result) = self.try_receive() {
            return Some(result);
        }
        if self.flushing {
            self.done = true;
            return None;
        }

        loop {
            let Some((stream, packet)) = self.ictx.packets().next() else {
                let _ = self.decoder.send_eof();
                self.flushing = true;
                if let Some(result) = self.try_receive() {
                    return Some(result);
                }
                self.done = true;
                return None;
            };

            if stream.index() != self.stream_index {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            if let Some(result) = self.try_receive() {
                return Some(result);
            }
        }
    }

    fn try_receive(&mut self) -> Option<Result<Frame, OverlayError>> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return None;
        }
        Some(self.convert(&decoded))
    }

    /// Converts a decoded frame to RGB24. Streams may change size or pixel
    /// format midway; the converter is rebuilt to follow them.
    fn convert(
        &mut self,
        decoded: &ffmpeg_next::util::frame::video::Video,
    ) -> Result<Frame, OverlayError> {
        let input = (decoded.format(), decoded.width(), decoded.height());
        if input != (self.source_format, self.width, self.height) {
            self.rebuild_scaler(input.0, input.1, input.2)?;
        }

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .map_err(|e| OverlayError::Decode(format!("pixel conversion failed: {e}")))?;

        let pixels = extract_rgb_pixels(&rgb_frame, self.width, self.height);
        let timestamp = decoded
            .timestamp()
            .or_else(|| decoded.pts())
            .filter(|&pts| pts >= 0)
            .map(|pts| Duration::from_secs_f64(pts as f64 * self.time_base))
            .unwrap_or(self.frame_interval * self.frame_index as u32);

        let frame = Frame::new(pixels, self.width, self.height, 3, self.frame_index)
            .with_timestamp(timestamp);
        self.frame_index += 1;
        Ok(frame)
    }

    fn rebuild_scaler(
        &mut self,
        format: ffmpeg_next::format::Pixel,
        width: u32,
        height: u32,
    ) -> Result<(), OverlayError> {
        if width == 0 || height == 0 {
            return Err(OverlayError::Decode(format!(
                "decoded frame has no size ({width}x{height})"
            )));
        }
        self.scaler = rgb_scaler(format, width, height).map_err(|e| {
            OverlayError::Decode(format!("cannot convert {width}x{height} {format:?}: {e}"))
        })?;
        log::info!(
            "Stream changed from {}x{} to {width}x{height} ({format:?})",
            self.width,
            self.height
        );
        self.source_format = format;
        self.width = width;
        self.height = height;
        Ok(())
    }
}

fn rgb_scaler(
    format: ffmpeg_next::format::Pixel,
    width: u32,
    height: u32,
) -> Result<ffmpeg_next::software::scaling::Context, ffmpeg_next::Error> {
    ffmpeg_next::software::scaling::Context::get(
        format,
        width,
        height,
        ffmpeg_next::format::Pixel::RGB24,
        width,
        height,
        ffmpeg_next::software::scaling::Flags::BILINEAR,
    )
}

fn rational_to_f64(r: ffmpeg_next::Rational) -> Option<f64> {
    if r.denominator() == 0 || r.numerator() <= 0 {
        None
    } else {
        Some(r.numerator() as f64 / r.denominator() as f64)
    }
}

fn frame_interval(fps: Option<f64>) -> Duration {
    let fps = fps.filter(|f| f.is_finite() && *f > 0.0).unwrap_or(FALLBACK_FPS);
    Duration::from_secs_f64(1.0 / fps)
}

/// Copies an ffmpeg RGB frame into a tightly packed buffer, dropping the
/// per-row stride padding.
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let row_bytes = width as usize * 3;

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
    }
    pixels
}
