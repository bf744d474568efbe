// SPDX-License-Identifier: MPL-2.0

//! Raw elementary stream files
//!
//! Writes the video stream as an Annex-B `.h264` file and the audio stream
//! as an ADTS `.aac` file. Both play directly in common players, which makes
//! them a convenient check of encoder output without a muxer.

use crate::config::OutputSettings;
use crate::constants::threads;
use crate::errors::{AppError, AppResult};
use crate::media::codec::AudioFormat;
use crate::media::formats::ParameterSets;
use crate::media::formats::h264::to_hex;
use crate::media::sink::{EncodedAacFrame, EncodedAccessUnit, StreamSink};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

enum WriterMessage {
    Video(Vec<u8>),
    Audio(Vec<u8>),
}

/// Totals reported when the writer is finished
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub video_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
    pub video_units: u64,
    pub video_bytes: u64,
    pub audio_frames: u64,
    pub audio_bytes: u64,
}

/// [`StreamSink`] that saves both streams to disk on a background thread
///
/// Callbacks only copy the data into a channel, so encoder threads never
/// wait on the filesystem.
pub struct ElementaryStreamWriter {
    sender: Mutex<Option<Sender<WriterMessage>>>,
    worker: Mutex<Option<JoinHandle<io::Result<WriterStats>>>>,
    save_video: bool,
    save_audio: bool,
}

impl ElementaryStreamWriter {
    /// Create `<dir>/<stem>.h264` and `<dir>/<stem>.aac` as enabled in `output`
    pub fn create(dir: &Path, stem: &str, output: &OutputSettings) -> AppResult<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            AppError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let video_path = output.save_video.then(|| dir.join(format!("{}.h264", stem)));
        let audio_path = output.save_audio.then(|| dir.join(format!("{}.aac", stem)));

        let open = |path: &Option<PathBuf>| -> AppResult<Option<BufWriter<File>>> {
            match path {
                Some(path) => File::create(path)
                    .map(|file| Some(BufWriter::new(file)))
                    .map_err(|e| {
                        AppError::Storage(format!("Failed to create {}: {}", path.display(), e))
                    }),
                None => Ok(None),
            }
        };
        let video_file = open(&video_path)?;
        let audio_file = open(&audio_path)?;

        let mut stats = WriterStats {
            video_path,
            audio_path,
            ..Default::default()
        };
        if let Some(path) = &stats.video_path {
            info!(path = %path.display(), "Writing video stream");
        }
        if let Some(path) = &stats.audio_path {
            info!(path = %path.display(), "Writing audio stream");
        }

        let (sender, receiver) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name(threads::FILE_WRITER.to_string())
            .spawn(move || {
                write_loop(receiver, video_file, audio_file, &mut stats)?;
                Ok(stats)
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            save_video: output.save_video,
            save_audio: output.save_audio,
        })
    }

    /// Flush and close both files
    ///
    /// Anything delivered after this call is discarded.
    pub fn finish(&self) -> AppResult<WriterStats> {
        // Dropping the sender ends the write loop once the queue is empty
        self.sender.lock().take();

        let Some(worker) = self.worker.lock().take() else {
            return Err(AppError::Storage("stream writer already finished".into()));
        };
        let stats = worker
            .join()
            .map_err(|_| AppError::Storage("stream writer thread panicked".into()))??;

        info!(
            video_units = stats.video_units,
            video_bytes = stats.video_bytes,
            audio_frames = stats.audio_frames,
            audio_bytes = stats.audio_bytes,
            "Stream files closed"
        );
        Ok(stats)
    }

    fn send(&self, message: WriterMessage) {
        if let Some(sender) = self.sender.lock().as_ref() {
            if sender.send(message).is_err() {
                warn!("Stream writer stopped, discarding data");
            }
        }
    }
}

impl Drop for ElementaryStreamWriter {
    fn drop(&mut self) {
        if self.worker.lock().is_some() {
            if let Err(e) = self.finish() {
                error!(error = %e, "Failed to close stream files");
            }
        }
    }
}

impl StreamSink for ElementaryStreamWriter {
    fn on_parameter_sets(&self, parameter_sets: &ParameterSets) {
        debug!(sps = %to_hex(parameter_sets.sps()), "SPS");
        debug!(pps = %to_hex(parameter_sets.pps()), "PPS");
    }

    fn on_video_access_unit(&self, unit: &EncodedAccessUnit<'_>) {
        if self.save_video {
            self.send(WriterMessage::Video(unit.data.to_vec()));
        }
    }

    fn on_audio_frame(&self, frame: &EncodedAacFrame<'_>) {
        if !self.save_audio {
            return;
        }
        if !frame.has_adts_header {
            warn!("AAC frame without ADTS header, file will not be playable");
        }
        self.send(WriterMessage::Audio(frame.data.to_vec()));
    }

    fn on_audio_format(&self, format: &AudioFormat) {
        debug!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Audio stream format"
        );
    }
}

fn write_loop(
    receiver: Receiver<WriterMessage>,
    mut video: Option<BufWriter<File>>,
    mut audio: Option<BufWriter<File>>,
    stats: &mut WriterStats,
) -> io::Result<()> {
    for message in receiver {
        match message {
            WriterMessage::Video(data) => {
                if let Some(file) = video.as_mut() {
                    file.write_all(&data)?;
                    stats.video_units += 1;
                    stats.video_bytes += data.len() as u64;
                }
            }
            WriterMessage::Audio(data) => {
                if let Some(file) = audio.as_mut() {
                    file.write_all(&data)?;
                    stats.audio_frames += 1;
                    stats.audio_bytes += data.len() as u64;
                }
            }
        }
    }

    if let Some(file) = video.as_mut() {
        file.flush()?;
    }
    if let Some(file) = audio.as_mut() {
        file.flush()?;
    }
    Ok(())
}
