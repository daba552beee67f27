//! VideoKit CLI: orientation correction, cropping, and bitrate-bounded
//! re-encoding of captured video.
//!
//! Usage:
//!   videokit mutate <INPUT> [OPTIONS]   Transform and transcode a video
//!   videokit probe <INPUT>              Show orientation, sizes, and rates
//!   videokit check                      Check ffmpeg/ffprobe availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "videokit",
    about = "Rotate, crop, trim, and re-encode captured video",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform and transcode a video
    Mutate {
        /// Source video
        input: PathBuf,

        /// Quality profile: 640x480, 960x540, 1280x720, 1920x1080,
        /// 3840x2160, passthrough, or custom:<fps|->:<bitrate|->:<scale>
        #[arg(short, long)]
        quality: Option<String>,

        /// Crop rectangle in displayed pixels: x,y,w,h
        #[arg(long)]
        crop: Option<String>,

        /// Maximum output frame rate
        #[arg(long)]
        limit_fps: Option<u32>,

        /// Maximum output length (seconds)
        #[arg(long)]
        limit_length: Option<f64>,

        /// Video bitrate ceiling (bits per second)
        #[arg(long)]
        limit_bitrate: Option<u64>,

        /// Step order when transcoding: transcode-first|geometry-first
        #[arg(long)]
        order: Option<String>,

        /// Mutate settings as JSON; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Transcoder: sample-copy|direct
        #[arg(long, default_value = "sample-copy")]
        strategy: String,

        /// Keep the intermediate file of a two-step run
        #[arg(long)]
        keep_intermediates: bool,
    },

    /// Show orientation, sizes, and rates of a video
    Probe {
        /// Source video
        input: PathBuf,
    },

    /// Check that the external tools are installed
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut app = videokit_common::config::AppConfig::load();
    if cli.verbose {
        app.logging.level = "debug".to_string();
    }
    app.logging.json |= cli.json_logs;
    videokit_common::logging::init_logging(&app.logging);

    match cli.command {
        Commands::Mutate {
            input,
            quality,
            crop,
            limit_fps,
            limit_length,
            limit_bitrate,
            order,
            config,
            output,
            strategy,
            keep_intermediates,
        } => {
            let args = commands::mutate::MutateArgs {
                input,
                quality,
                crop,
                limit_fps,
                limit_length,
                limit_bitrate,
                order,
                config,
                output,
                strategy,
                keep_intermediates,
            };
            commands::mutate::run(app, args).await
        }
        Commands::Probe { input } => commands::probe::run(&app, input).await,
        Commands::Check => commands::check::run(&app).await,
    }
}
