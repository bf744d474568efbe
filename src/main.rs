// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-stream")]
#[command(about = "Record camera and microphone to H.264 and AAC elementary streams")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record both streams to .h264 / .aac files
    Record {
        /// Recording duration in seconds
        #[arg(short, long, default_value_t = camera_stream::constants::timing::DEFAULT_RECORD_SECS)]
        duration: u64,

        /// Output directory (default: ~/Videos/camera-stream)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Config file (default: ~/.config/camera-stream/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Start with the front lens
        #[arg(long)]
        front_lens: bool,

        /// Switch lens after this many seconds
        #[arg(long)]
        switch_after: Option<u64>,

        /// Do not write the .aac file
        #[arg(long)]
        no_audio_file: bool,

        /// Do not write the .h264 file
        #[arg(long)]
        no_video_file: bool,
    },

    /// List installed H.264 and AAC encoders
    Encoders,

    /// Show configuration
    Config {
        /// Print the built-in defaults instead of the effective config
        #[arg(long)]
        print_default: bool,

        /// Config file (default: ~/.config/camera-stream/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_stream=trace, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            duration,
            output,
            config,
            front_lens,
            switch_after,
            no_audio_file,
            no_video_file,
        } => cli::record(cli::RecordOptions {
            duration,
            output,
            config,
            front_lens,
            switch_after,
            save_audio: !no_audio_file,
            save_video: !no_video_file,
        }),
        Commands::Encoders => cli::list_encoders(),
        Commands::Config {
            print_default,
            config,
        } => cli::show_config(print_default, config),
    }
}
