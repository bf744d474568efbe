// SPDX-License-Identifier: MPL-2.0

//! Dual-stream capture orchestration
//!
//! Owns one [`VideoEncoder`] and one [`AudioEncoder`] and wires the capture
//! sources into them:
//!
//! ```text
//! camera thread ──> NV21 ──> rotate ──> chroma order ──> VideoEncoder ──┐
//!        └───────────────────────────────> PreviewSink                 ├──> StreamSink
//! audio-capture thread ──> PCM chunk ──────────────────> AudioEncoder ──┘
//! ```
//!
//! The video session is created lazily on the first camera frame, once the
//! real (rotated) dimensions are known.

use crate::backends::camera::{CameraSource, FrameHandler, LensFacing, RawVideoFrame, SensorRotation};
use crate::backends::capture_loop::{CaptureLoopController, LoopAction};
use crate::backends::microphone::MicrophoneSource;
use crate::config::Config;
use crate::constants::{audio, threads, timing};
use crate::errors::{AppError, AppResult, CaptureError, EncoderError};
use crate::media::codec::BackendFactory;
use crate::media::encoders::{
    AacConfig, AudioEncoder, EncoderState, MissingParameterSets, VideoEncoder,
};
use crate::media::sink::{PreviewSink, StreamKind, StreamSink};
use crate::media::yuv::{self, ChromaLayout};
use parking_lot::{Mutex, RwLock};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Pipeline parameters that are fixed for the lifetime of a manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Requested AAC parameters; rate and channels follow the microphone
    pub aac: AacConfig,
    /// Chroma order handed to the video encoder
    pub target_layout: ChromaLayout,
    pub initial_lens: LensFacing,
    pub release_grace: Duration,
    pub missing_parameter_sets: MissingParameterSets,
    /// Bytes per microphone read
    pub read_chunk_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            aac: AacConfig::default(),
            target_layout: ChromaLayout::default(),
            initial_lens: LensFacing::default(),
            release_grace: timing::RELEASE_GRACE,
            missing_parameter_sets: MissingParameterSets::default(),
            read_chunk_size: audio::READ_CHUNK_SIZE,
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            aac: config.audio.aac_config(),
            target_layout: config.camera.target_layout,
            initial_lens: config.camera.initial_lens,
            release_grace: config.encoder.release_grace(),
            missing_parameter_sets: config.encoder.missing_parameter_sets,
            read_chunk_size: audio::READ_CHUNK_SIZE,
        }
    }
}

/// Camera-path counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames delivered by the camera while running
    pub received: u64,
    /// Frames dropped because their size did not match the video session
    pub mismatched: u64,
}

/// Loop-thread state; stops the microphone when the loop ends
struct MicrophoneSession {
    microphone: Arc<Mutex<Box<dyn MicrophoneSource>>>,
    buffer: Vec<u8>,
    failures: u64,
}

impl Drop for MicrophoneSession {
    fn drop(&mut self) {
        self.microphone.lock().stop();
        debug!("Microphone stopped");
    }
}

struct Shared {
    video: VideoEncoder,
    audio: AudioEncoder,
    camera: Mutex<Box<dyn CameraSource>>,
    microphone: Arc<Mutex<Box<dyn MicrophoneSource>>>,
    preview: RwLock<Option<Arc<dyn PreviewSink>>>,
    lens: Mutex<LensFacing>,
    audio_loop: Mutex<Option<CaptureLoopController>>,
    running: AtomicBool,
    settings: PipelineSettings,
    frames_received: AtomicU64,
    frames_mismatched: AtomicU64,
}

/// Starts, stops and routes both capture streams
pub struct StreamManager {
    shared: Arc<Shared>,
}

impl StreamManager {
    pub fn new(
        factory: Arc<dyn BackendFactory>,
        sink: Arc<dyn StreamSink>,
        camera: Box<dyn CameraSource>,
        microphone: Box<dyn MicrophoneSource>,
        settings: PipelineSettings,
    ) -> Self {
        let video = VideoEncoder::new(Arc::clone(&factory), Arc::clone(&sink))
            .with_release_grace(settings.release_grace)
            .with_input_layout(settings.target_layout)
            .with_missing_parameter_sets(settings.missing_parameter_sets);
        let audio = AudioEncoder::new(factory, sink, settings.aac)
            .with_release_grace(settings.release_grace);

        let shared = Arc::new(Shared {
            video,
            audio,
            camera: Mutex::new(camera),
            microphone: Arc::new(Mutex::new(microphone)),
            preview: RwLock::new(None),
            lens: Mutex::new(settings.initial_lens),
            audio_loop: Mutex::new(None),
            running: AtomicBool::new(false),
            settings,
            frames_received: AtomicU64::new(0),
            frames_mismatched: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&shared);
        let handler: crate::media::encoders::FatalErrorHandler =
            Arc::new(move |kind: StreamKind, err: &EncoderError| {
                on_fatal_error(&weak, kind, err);
            });
        shared.video.set_fatal_error_handler(Arc::clone(&handler));
        shared.audio.set_fatal_error_handler(handler);

        Self { shared }
    }

    /// Forward raw camera frames to `preview` (or stop forwarding with `None`)
    pub fn set_preview_sink(&self, preview: Option<Arc<dyn PreviewSink>>) {
        *self.shared.preview.write() = preview;
    }

    /// Start audio capture and arm the camera
    ///
    /// Waits for a previous session's encoders to be released first. The
    /// video encoder is configured when the first camera frame arrives.
    pub fn start(&self) -> AppResult<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(AppError::Other("stream already running".to_string()));
        }

        match Shared::start_streams(&self.shared) {
            Ok(()) => {
                info!(lens = %self.lens(), "Streaming started");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to start streaming");
                self.shared.halt();
                Err(e)
            }
        }
    }

    /// Stop both streams
    ///
    /// Returns immediately: the camera is unbound and both encoders stop
    /// accepting input, but encoder release and the audio thread exit
    /// happen in the background. See [`StreamManager::wait_stopped`].
    pub fn stop(&self) {
        self.shared.halt();
    }

    /// Block until the audio thread has exited and both encoders are released
    pub fn wait_stopped(&self) {
        self.shared.join_background();
    }

    /// Flip between front and back lens
    ///
    /// While running only the camera binding changes; the video session is
    /// kept.
    pub fn switch_camera(&self) -> AppResult<LensFacing> {
        let lens = {
            let mut lens = self.shared.lens.lock();
            *lens = lens.flipped();
            *lens
        };

        if self.shared.running.load(Ordering::SeqCst) {
            let mut camera = self.shared.camera.lock();
            camera.unbind();
            camera.bind(lens, frame_handler(Arc::downgrade(&self.shared)))?;
        }

        info!(lens = %lens, "Switched camera");
        Ok(lens)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn lens(&self) -> LensFacing {
        *self.shared.lens.lock()
    }

    pub fn video(&self) -> &VideoEncoder {
        &self.shared.video
    }

    pub fn audio(&self) -> &AudioEncoder {
        &self.shared.audio
    }

    pub fn frame_stats(&self) -> FrameStats {
        FrameStats {
            received: self.shared.frames_received.load(Ordering::Relaxed),
            mismatched: self.shared.frames_mismatched.load(Ordering::Relaxed),
        }
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.shared.halt();
        self.shared.join_background();
    }
}

impl Shared {
    fn start_streams(this: &Arc<Self>) -> AppResult<()> {
        // Leftovers from the previous session
        this.join_background();
        this.frames_received.store(0, Ordering::Relaxed);
        this.frames_mismatched.store(0, Ordering::Relaxed);

        let (sample_rate, channels) = {
            let mut microphone = this.microphone.lock();
            microphone.start()?;
            (microphone.sample_rate(), microphone.channel_count())
        };

        let aac = AacConfig {
            sample_rate,
            channels,
            ..this.settings.aac
        };
        this.audio.initialize_with(aac)?;
        this.audio.start()?;

        let audio_loop = this.spawn_audio_loop().map_err(|e| {
            AppError::Other(format!("Failed to spawn audio capture thread: {}", e))
        })?;
        *this.audio_loop.lock() = Some(audio_loop);

        let lens = *this.lens.lock();
        this.camera
            .lock()
            .bind(lens, frame_handler(Arc::downgrade(this)))?;
        Ok(())
    }

    fn spawn_audio_loop(self: &Arc<Self>) -> std::io::Result<CaptureLoopController> {
        let microphone = Arc::clone(&self.microphone);
        let chunk_size = self.settings.read_chunk_size.min(audio::MAX_INPUT_SIZE);
        let weak = Arc::downgrade(self);

        CaptureLoopController::start_with_init(
            threads::AUDIO_LOOP,
            move || {
                Ok::<_, Infallible>(MicrophoneSession {
                    microphone,
                    buffer: vec![0u8; chunk_size],
                    failures: 0,
                })
            },
            move |session| {
                let Some(shared) = weak.upgrade() else {
                    return LoopAction::Stop;
                };
                shared.pump_audio(session)
            },
        )
    }

    /// One microphone read forwarded to the audio encoder
    fn pump_audio(&self, session: &mut MicrophoneSession) -> LoopAction {
        let result = session.microphone.lock().read(&mut session.buffer);
        match result {
            Ok(n) if n > 0 => {
                self.audio.encode(&session.buffer[..n]);
            }
            Ok(_) => thread::sleep(timing::READ_BACKOFF),
            Err(CaptureError::Disconnected) => {
                error!("Microphone disconnected, ending audio capture");
                return LoopAction::Stop;
            }
            Err(e) => {
                session.failures += 1;
                if session.failures == 1 || session.failures % timing::DROP_LOG_INTERVAL == 0 {
                    warn!(error = %e, failures = session.failures, "Microphone read failed");
                }
                thread::sleep(timing::READ_BACKOFF);
            }
        }
        LoopAction::Continue
    }

    /// Convert, encode and preview one camera frame
    fn handle_frame(self: &Arc<Self>, frame: RawVideoFrame) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let received = self.frames_received.fetch_add(1, Ordering::Relaxed) + 1;

        let (width, height) = (frame.width, frame.height);
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            if received == 1 || received % timing::DROP_LOG_INTERVAL == 0 {
                warn!(width, height, "Camera frame has odd or zero dimensions, dropping");
            }
            return;
        }

        let rotation = self.lens.lock().capture_rotation();
        let (out_w, out_h) = if rotation.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        };

        if !self.ensure_video_session(out_w, out_h) {
            return;
        }

        if self.video.dimensions() != Some((out_w, out_h)) {
            let mismatched = self.frames_mismatched.fetch_add(1, Ordering::Relaxed) + 1;
            if mismatched == 1 || mismatched % timing::DROP_LOG_INTERVAL == 0 {
                warn!(
                    frame = ?(out_w, out_h),
                    session = ?self.video.dimensions(),
                    mismatched,
                    "Camera frame size differs from video session, dropping"
                );
            }
            return;
        }

        let encoded = convert_for_encoder(
            &frame,
            rotation,
            self.settings.target_layout,
        );
        let submission = self.video.encode(&encoded);
        trace!(frame = received, ?submission, "Camera frame submitted");

        let preview = self.preview.read().clone();
        if let Some(preview) = preview {
            preview.on_preview_frame(&frame);
        }
        // `frame` dropped here, releasing it back to the source
    }

    /// Lazily configure and start the video encoder; `false` if not usable
    ///
    /// A session that cannot be set up stops the whole pipeline.
    fn ensure_video_session(self: &Arc<Self>, width: u32, height: u32) -> bool {
        match self.video.state() {
            EncoderState::Running => true,
            EncoderState::Uninitialized | EncoderState::Stopped => {
                let started = self
                    .video
                    .init(width, height)
                    .and_then(|()| self.video.start());
                match started {
                    Ok(()) => {
                        info!(width, height, "Video session started on first frame");
                        true
                    }
                    Err(e) => {
                        on_fatal_error(&Arc::downgrade(self), StreamKind::Video, &e);
                        false
                    }
                }
            }
            state => {
                trace!(%state, "Video encoder not accepting frames");
                false
            }
        }
    }

    /// Non-blocking stop of everything; no-op when not running
    fn halt(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.camera.lock().unbind();
        self.video.stop();
        self.audio.stop();

        match self.audio_loop.lock().as_ref() {
            Some(audio_loop) => audio_loop.request_stop(),
            // Start failed before the loop took ownership of the microphone
            None => self.microphone.lock().stop(),
        }

        info!("Streaming stopped");
    }

    fn join_background(&self) {
        let audio_loop = self.audio_loop.lock().take();
        if let Some(mut audio_loop) = audio_loop {
            audio_loop.stop();
        }
        self.video.wait_released();
        self.audio.wait_released();
    }
}

fn frame_handler(shared: Weak<Shared>) -> FrameHandler {
    Box::new(move |frame: RawVideoFrame| {
        if let Some(shared) = shared.upgrade() {
            shared.handle_frame(frame);
        }
    })
}

/// Planar camera frame -> rotated semi-planar buffer in the encoder's layout
fn convert_for_encoder(
    frame: &RawVideoFrame,
    rotation: SensorRotation,
    target_layout: ChromaLayout,
) -> Vec<u8> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let nv21 = yuv::to_semi_planar_420(&frame.plane_views(), w, h);

    let (mut oriented, out_w, out_h) = match rotation {
        SensorRotation::Rotate90 => (yuv::rotate90(&nv21, w, h), h, w),
        SensorRotation::Rotate270 => (yuv::rotate270(&nv21, w, h), h, w),
        SensorRotation::None | SensorRotation::Rotate180 => (nv21, w, h),
    };

    if target_layout == ChromaLayout::Nv12 {
        yuv::swap_chroma_order_in_place(&mut oriented, out_w, out_h);
    }
    oriented
}

fn on_fatal_error(shared: &Weak<Shared>, kind: StreamKind, err: &EncoderError) {
    error!(stream = %kind, error = %err, "Fatal encoder error, stopping pipeline");

    let Some(shared) = shared.upgrade() else {
        return;
    };
    // May be running on a codec or camera thread that stop() would wait on
    let spawned = thread::Builder::new()
        .name(threads::FATAL_STOP.to_string())
        .spawn(move || shared.halt());
    if let Err(e) = spawned {
        error!(error = %e, "Could not spawn pipeline stop thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::Plane;
    use std::time::Instant;

    fn frame(width: u32, height: u32) -> RawVideoFrame {
        let (w, h) = (width as usize, height as usize);
        RawVideoFrame {
            width,
            height,
            planes: [
                Plane::new((0..w * h).map(|i| i as u8).collect(), w, 1),
                Plane::new(vec![10; w * h / 4], w / 2, 1),
                Plane::new(vec![20; w * h / 4], w / 2, 1),
            ],
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn test_convert_back_lens_rotates_clockwise_to_nv12() {
        let out = convert_for_encoder(&frame(4, 2), SensorRotation::Rotate90, ChromaLayout::Nv12);
        assert_eq!(out.len(), 12);
        // Luma rows of 2x4 output: input column r read bottom-up
        assert_eq!(&out[..8], &[4, 0, 5, 1, 6, 2, 7, 3]);
        // NV12: U first
        assert_eq!(&out[8..], &[10, 20, 10, 20]);
    }

    #[test]
    fn test_convert_front_lens_keeps_nv21() {
        let out = convert_for_encoder(&frame(4, 2), SensorRotation::Rotate270, ChromaLayout::Nv21);
        assert_eq!(&out[..8], &[3, 7, 2, 6, 1, 5, 0, 4]);
        assert_eq!(&out[8..], &[20, 10, 20, 10]);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.camera.initial_lens = LensFacing::Front;
        config.encoder.release_grace_ms = 250;
        let settings = PipelineSettings::from(&config);
        assert_eq!(settings.initial_lens, LensFacing::Front);
        assert_eq!(settings.release_grace, Duration::from_millis(250));
        assert_eq!(settings.aac, AacConfig::default());
    }
}
