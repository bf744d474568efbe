// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Recording camera and microphone to elementary stream files
//! - Listing installed encoders
//! - Printing the configuration

use camera_stream::backends::camera::{GstCameraSource, LensFacing};
use camera_stream::backends::microphone::GstMicrophone;
use camera_stream::config::Config;
use camera_stream::media::codec::CodecKind;
use camera_stream::media::codec::gstreamer::{GstBackendFactory, list_available_encoders};
use camera_stream::pipelines::{ElementaryStreamWriter, PipelineSettings, StreamManager};
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Arguments of `camera-stream record`
pub struct RecordOptions {
    pub duration: u64,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub front_lens: bool,
    pub switch_after: Option<u64>,
    pub save_audio: bool,
    pub save_video: bool,
}

fn load_config(path: Option<PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Config::load(&path)?),
        None => Ok(Config::load_or_default()),
    }
}

/// Record both streams for a fixed duration
pub fn record(options: RecordOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(options.config)?;
    if options.front_lens {
        config.camera.initial_lens = LensFacing::Front;
    }
    if let Some(dir) = options.output {
        config.output.directory = Some(dir);
    }
    config.output.save_audio &= options.save_audio;
    config.output.save_video &= options.save_video;

    let dir = config.output.output_dir();
    let stem = format!("stream_{}", Local::now().format("%Y%m%d_%H%M%S"));
    let writer = Arc::new(ElementaryStreamWriter::create(&dir, &stem, &config.output)?);

    let manager = StreamManager::new(
        Arc::new(GstBackendFactory::from_settings(&config.encoder)),
        writer.clone(),
        Box::new(GstCameraSource::new(config.camera.clone())),
        Box::new(GstMicrophone::new(&config.microphone, &config.audio)),
        PipelineSettings::from(&config),
    );

    println!("Output: {}", dir.join(&stem).display());
    println!("Duration: {} seconds", options.duration);
    println!("Lens: {}", manager.lens());

    println!();
    println!("Recording... (press Ctrl+C to stop early)");
    manager.start()?;

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let target_duration = Duration::from_secs(options.duration);
    let switch_at = options.switch_after.map(Duration::from_secs);
    let mut switched = false;

    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        if !manager.is_running() {
            println!();
            println!("Pipeline stopped unexpectedly");
            break;
        }
        if let Some(at) = switch_at {
            if !switched && start.elapsed() >= at {
                switched = true;
                let lens = manager.switch_camera()?;
                println!();
                println!("Switched to {} lens", lens);
            }
        }

        let elapsed = start.elapsed().as_secs();
        print!("\rRecording: {:02}:{:02}", elapsed / 60, elapsed % 60);
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    manager.stop();
    manager.wait_stopped();

    let video = manager.video().stats();
    let audio = manager.audio().stats();
    let frames = manager.frame_stats();
    drop(manager);

    let stats = writer.finish()?;
    println!(
        "Camera frames: {} received, {} encoded, {} dropped",
        frames.received, video.queued, video.dropped
    );
    println!("Audio chunks: {} encoded, {} dropped", audio.queued, audio.dropped);
    if let Some(path) = &stats.video_path {
        println!("Video saved: {} ({} bytes)", path.display(), stats.video_bytes);
    }
    if let Some(path) = &stats.audio_path {
        println!("Audio saved: {} ({} bytes)", path.display(), stats.audio_bytes);
    }

    Ok(())
}

/// List installed encoders, preferred first
pub fn list_encoders() -> Result<(), Box<dyn std::error::Error>> {
    let encoders = list_available_encoders();
    if encoders.is_empty() {
        println!("No H.264 or AAC encoders found.");
        return Ok(());
    }

    for (kind, title) in [(CodecKind::H264, "H.264"), (CodecKind::AacLc, "AAC")] {
        println!("{} encoders:", title);
        let mut any = false;
        for (rank, encoder) in encoders.iter().filter(|e| e.kind == kind).enumerate() {
            let marker = if rank == 0 { " (selected)" } else { "" };
            println!("  {}{}", encoder.element, marker);
            any = true;
        }
        if !any {
            println!("  none");
        }
        println!();
    }
    Ok(())
}

/// Print the effective or default configuration as JSON
pub fn show_config(
    print_default: bool,
    path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = if print_default {
        Config::default()
    } else {
        load_config(path)?
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    if !print_default {
        if let Some(path) = Config::default_path() {
            eprintln!("Config path: {}", path.display());
        }
    }
    Ok(())
}
