// SPDX-License-Identifier: GPL-3.0-only

//! Persistent settings, stored as JSON under the user config directory

use crate::backends::camera::LensFacing;
use crate::constants::{audio, timing};
use crate::errors::{AppError, AppResult};
use crate::media::encoders::{AacConfig, MissingParameterSets};
use crate::media::yuv::ChromaLayout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Directory name used under the config and video directories
pub const APP_DIR: &str = "camera-stream";

const CONFIG_FILE: &str = "config.json";

/// AAC encoder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Requested sample rate; the microphone's actual rate wins
    pub sample_rate: u32,
    /// Requested channel count (1 or 2); falls back to mono if unsupported
    pub channels: u8,
    /// Bits per second
    pub bitrate: u32,
    /// Wrap frames in ADTS headers
    pub adts: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: audio::DEFAULT_SAMPLE_RATE,
            channels: audio::DEFAULT_CHANNELS,
            bitrate: audio::DEFAULT_BITRATE,
            adts: true,
        }
    }
}

impl AudioSettings {
    pub fn aac_config(&self) -> AacConfig {
        AacConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bitrate: self.bitrate,
            adts: self.adts,
        }
    }
}

/// Camera capture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Lens used when streaming starts
    pub initial_lens: LensFacing,
    /// GStreamer source description for the back lens
    pub back_source: String,
    /// GStreamer source description for the front lens
    pub front_source: String,
    /// Capture width before rotation
    pub width: u32,
    /// Capture height before rotation
    pub height: u32,
    pub framerate: u32,
    /// Chroma order the video encoder is fed
    pub target_layout: ChromaLayout,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            initial_lens: LensFacing::default(),
            back_source: "autovideosrc".to_string(),
            front_source: "autovideosrc".to_string(),
            width: 640,
            height: 480,
            framerate: crate::constants::video::FRAME_RATE,
            target_layout: ChromaLayout::default(),
        }
    }
}

impl CameraSettings {
    pub fn source_for(&self, lens: LensFacing) -> &str {
        match lens {
            LensFacing::Front => &self.front_source,
            LensFacing::Back => &self.back_source,
        }
    }
}

/// Microphone capture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicrophoneSettings {
    /// GStreamer source description
    pub source: String,
    /// Run capture through `webrtcdsp` (noise suppression, gain control)
    /// when the element is installed
    pub voice_processing: bool,
    /// Also enable echo cancellation; needs the playback stream routed
    /// through the matching WebRTC echo element
    pub echo_cancel: bool,
}

impl Default for MicrophoneSettings {
    fn default() -> Self {
        Self {
            source: "autoaudiosrc".to_string(),
            voice_processing: true,
            echo_cancel: false,
        }
    }
}

/// Where encoded streams are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub save_video: bool,
    pub save_audio: bool,
    /// Output directory; `None` uses `~/Videos/camera-stream`
    pub directory: Option<PathBuf>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            save_video: true,
            save_audio: true,
            directory: None,
        }
    }
}

impl OutputSettings {
    pub fn output_dir(&self) -> PathBuf {
        if let Some(dir) = &self.directory {
            return dir.clone();
        }
        dirs::video_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

/// Encoder session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Delay between stop and backend release, in milliseconds
    pub release_grace_ms: u64,
    /// Handling of key frames seen before SPS/PPS
    pub missing_parameter_sets: MissingParameterSets,
    /// Force a GStreamer H.264 encoder element instead of auto-selection
    pub video_encoder: Option<String>,
    /// Force a GStreamer AAC encoder element instead of auto-selection
    pub audio_encoder: Option<String>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            release_grace_ms: timing::RELEASE_GRACE.as_millis() as u64,
            missing_parameter_sets: MissingParameterSets::default(),
            video_encoder: None,
            audio_encoder: None,
        }
    }
}

impl EncoderSettings {
    pub fn release_grace(&self) -> Duration {
        Duration::from_millis(self.release_grace_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioSettings,
    pub camera: CameraSettings,
    pub microphone: MicrophoneSettings,
    pub output: OutputSettings,
    pub encoder: EncoderSettings,
}

impl Config {
    /// `~/.config/camera-stream/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Read and validate a config file
    pub fn load(path: &Path) -> AppResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Load from the default path, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                Self::default()
            }
        }
    }

    /// Reject settings no session could be started with
    pub fn validate(&self) -> AppResult<()> {
        self.audio
            .aac_config()
            .validate()
            .map_err(|e| AppError::Config(format!("audio: {}", e)))?;

        let camera = &self.camera;
        if camera.width == 0 || camera.height == 0 || camera.width % 2 != 0 || camera.height % 2 != 0
        {
            return Err(AppError::Config(format!(
                "camera: resolution {}x{} must be non-zero and even",
                camera.width, camera.height
            )));
        }
        if camera.framerate == 0 {
            return Err(AppError::Config("camera: framerate must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.aac_config(), AacConfig::default());
        assert_eq!(config.encoder.release_grace(), Duration::from_millis(1000));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "camera": { "initial_lens": "Front" } }"#).unwrap();
        assert_eq!(config.camera.initial_lens, LensFacing::Front);
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.microphone.source, "autoaudiosrc");
        assert!(config.microphone.voice_processing);
        assert!(!config.microphone.echo_cancel);
    }

    #[test]
    fn test_source_for_lens() {
        let mut camera = CameraSettings::default();
        camera.front_source = "v4l2src device=/dev/video2".to_string();
        assert_eq!(camera.source_for(LensFacing::Front), "v4l2src device=/dev/video2");
        assert_eq!(camera.source_for(LensFacing::Back), "autovideosrc");
    }

    #[test]
    fn test_output_dir_override() {
        let output = OutputSettings {
            directory: Some(PathBuf::from("/tmp/streams")),
            ..Default::default()
        };
        assert_eq!(output.output_dir(), PathBuf::from("/tmp/streams"));
    }
}
