//! Transform and transcode a video.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use videokit::{ExportProgress, MutateConfig, TranscodeStrategy, VideoKit};
use videokit_common::config::AppConfig;
use videokit_media_model::parse_crop_rect;

pub struct MutateArgs {
    pub input: PathBuf,
    pub quality: Option<String>,
    pub crop: Option<String>,
    pub limit_fps: Option<u32>,
    pub limit_length: Option<f64>,
    pub limit_bitrate: Option<u64>,
    pub order: Option<String>,
    pub config: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub strategy: String,
    pub keep_intermediates: bool,
}

fn mutate_config(args: &MutateArgs) -> anyhow::Result<MutateConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
            serde_json::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Invalid mutate config {}: {e}", path.display()))?
        }
        None => MutateConfig::default(),
    };

    if let Some(quality) = &args.quality {
        config.quality = quality.parse()?;
    }
    if let Some(crop) = &args.crop {
        config.crop_rect = Some(parse_crop_rect(crop)?);
    }
    if let Some(order) = &args.order {
        config.order = order.parse()?;
    }
    config.limit_fps = args.limit_fps.or(config.limit_fps);
    config.limit_length = args.limit_length.or(config.limit_length);
    config.limit_bitrate = args.limit_bitrate.or(config.limit_bitrate);

    config.validate()?;
    Ok(config)
}

pub async fn run(mut app: AppConfig, args: MutateArgs) -> anyhow::Result<()> {
    let config = mutate_config(&args)?;
    let strategy: TranscodeStrategy = args.strategy.parse()?;
    if let Some(dir) = &args.output {
        app.output.dir = Some(dir.clone());
    }
    if args.keep_intermediates {
        app.output.cleanup_intermediates = false;
    }

    println!("Mutating: {}", args.input.display());
    println!("  Quality: {}", config.quality);
    if let Some(rect) = &config.crop_rect {
        println!(
            "  Crop: {}x{} at ({}, {})",
            rect.size.width, rect.size.height, rect.origin.x, rect.origin.y
        );
    }
    if let Some(bitrate) = config.limit_bitrate {
        println!("  Bitrate ceiling: {bitrate} bit/s ({strategy})");
    }

    let progress = Arc::new(|p: ExportProgress| {
        print!(
            "\r  Progress: {:.1}% (ETA: {:.0}s)  ",
            p.progress * 100.0,
            p.eta_secs
        );
        let _ = std::io::stdout().flush();
    });
    let kit = VideoKit::from_app_config(&app, strategy).with_progress(progress);

    match kit.mutate(&args.input, config).await {
        Ok(output) => {
            println!("\nDone: {}", output.display());
            Ok(())
        }
        Err(e) => {
            println!("\nMutate failed ({:?}): {e}", e.kind());
            Err(e.into())
        }
    }
}
