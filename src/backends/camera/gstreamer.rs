// SPDX-License-Identifier: MPL-2.0

//! GStreamer camera source
//!
//! Runs `<source> ! videoconvert ! videoscale ! I420 caps ! appsink` with a
//! one-buffer, drop-oldest appsink, so a slow frame handler only ever sees
//! the latest frame.

use super::types::{CameraSource, FrameHandler, LensFacing, Plane, RawVideoFrame};
use crate::config::CameraSettings;
use crate::errors::CaptureError;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

const START_CHECK_MS: u64 = 500;
const STOP_TIMEOUT_SECS: u64 = 2;
const FRAME_LOG_INTERVAL: u64 = 30;

struct ActivePipeline {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
    lens: LensFacing,
}

/// Camera source backed by a GStreamer pipeline per bound lens
pub struct GstCameraSource {
    settings: CameraSettings,
    active: Option<ActivePipeline>,
}

impl GstCameraSource {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            active: None,
        }
    }

    fn pipeline_description(&self, lens: LensFacing) -> String {
        format!(
            "{} ! videoconvert ! videoscale ! \
             video/x-raw,format=I420,width={},height={},framerate={}/1 ! \
             appsink name=sink",
            self.settings.source_for(lens),
            self.settings.width,
            self.settings.height,
            self.settings.framerate
        )
    }
}

impl CameraSource for GstCameraSource {
    fn bind(&mut self, lens: LensFacing, handler: FrameHandler) -> Result<(), CaptureError> {
        self.unbind();

        gstreamer::init().map_err(|e| CaptureError::InitializationFailed(e.to_string()))?;

        let description = self.pipeline_description(lens);
        info!(lens = %lens, pipeline = %description, "Creating camera pipeline");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| CaptureError::DeviceNotFound(format!("{} camera: {}", lens, e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| CaptureError::InitializationFailed("Failed to downcast to Pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CaptureError::InitializationFailed("Failed to get appsink".into()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| CaptureError::InitializationFailed("Failed to cast appsink".into()))?;

        appsink.set_property("emit-signals", true);
        appsink.set_property("sync", false);
        // Keep only the latest frame
        appsink.set_property("max-buffers", 1u32);
        appsink.set_property("drop", true);
        appsink.set_property("enable-last-sample", false);

        let handler = Mutex::new(handler);
        let frame_counter = AtomicU64::new(0);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let frame_num = frame_counter.fetch_add(1, Ordering::Relaxed);

                    let sample = appsink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    match sample_to_frame(&sample) {
                        Some(frame) => {
                            if frame_num % FRAME_LOG_INTERVAL == 0 {
                                debug!(
                                    frame = frame_num,
                                    width = frame.width,
                                    height = frame.height,
                                    "Camera frame"
                                );
                            }
                            (handler.lock())(frame);
                        }
                        None => {
                            if frame_num % FRAME_LOG_INTERVAL == 0 {
                                warn!(frame = frame_num, "Unreadable camera sample, skipping");
                            }
                        }
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        if let Err(e) = start_pipeline(&pipeline) {
            appsink.set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(e);
        }

        info!(lens = %lens, "Camera bound");
        self.active = Some(ActivePipeline {
            pipeline,
            appsink,
            lens,
        });
        Ok(())
    }

    fn unbind(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        debug!(lens = %active.lens, "Unbinding camera");
        active
            .appsink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        if let Err(e) = active.pipeline.set_state(gstreamer::State::Null) {
            warn!(error = %e, "Failed to stop camera pipeline");
        }
        let (result, state, _) = active
            .pipeline
            .state(gstreamer::ClockTime::from_seconds(STOP_TIMEOUT_SECS));
        debug!(result = ?result, state = ?state, "Camera pipeline stopped");
    }
}

impl Drop for GstCameraSource {
    fn drop(&mut self) {
        self.unbind();
    }
}

/// Set PLAYING and surface errors posted right after start
fn start_pipeline(pipeline: &gstreamer::Pipeline) -> Result<(), CaptureError> {
    pipeline.set_state(gstreamer::State::Playing).map_err(|e| {
        CaptureError::InitializationFailed(format!("Failed to start camera pipeline: {}", e))
    })?;

    let bus = pipeline
        .bus()
        .ok_or_else(|| CaptureError::InitializationFailed("No bus available".into()))?;
    if let Some(msg) = bus.timed_pop_filtered(
        gstreamer::ClockTime::from_mseconds(START_CHECK_MS),
        &[gstreamer::MessageType::Error],
    ) {
        if let gstreamer::MessageView::Error(err) = msg.view() {
            error!(
                error = %err.error(),
                debug = ?err.debug(),
                source = ?err.src().map(|s| s.name()),
                "Camera pipeline error during start"
            );
            return Err(CaptureError::DeviceNotFound(err.error().to_string()));
        }
    }
    Ok(())
}

/// Copy an I420 sample into an owned frame, keeping each plane's stride
fn sample_to_frame(sample: &gstreamer::Sample) -> Option<RawVideoFrame> {
    let captured_at = Instant::now();
    let buffer = sample.buffer()?;
    let info = VideoInfo::from_caps(sample.caps()?).ok()?;
    let map = buffer.map_readable().ok()?;
    let data = map.as_slice();

    let (width, height) = (info.width(), info.height());
    let chroma_rows = (height as usize).div_ceil(2);
    let chroma_cols = (width as usize).div_ceil(2);

    let plane = |index: usize, rows: usize, row_bytes: usize| -> Option<Plane> {
        let offset = info.offset()[index];
        let stride = usize::try_from(info.stride()[index]).ok()?;
        let len = stride * rows.saturating_sub(1) + row_bytes;
        let bytes = data.get(offset..offset + len)?;
        Some(Plane::new(bytes.to_vec(), stride, 1))
    };

    Some(RawVideoFrame {
        width,
        height,
        planes: [
            plane(0, height as usize, width as usize)?,
            plane(1, chroma_rows, chroma_cols)?,
            plane(2, chroma_rows, chroma_cols)?,
        ],
        captured_at,
    })
}
