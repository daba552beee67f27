//! Show what a mutate would see in a source.

use std::path::PathBuf;

use videokit_common::config::AppConfig;
use videokit_media_model::TrackKind;
use videokit_processing_core::orientation;
use videokit_transcode_engine::{FfprobeMetadata, MetadataProvider};

pub async fn run(app: &AppConfig, input: PathBuf) -> anyhow::Result<()> {
    let provider = FfprobeMetadata::from_config(&app.engine);
    let asset = provider
        .load(&input)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to probe {}: {e}", input.display()))?;

    println!("Source: {}", input.display());
    println!("  Duration: {:.3}s", asset.duration.seconds());
    println!();

    match asset.first_track(TrackKind::Video) {
        Some(video) => {
            let display = video.display_size();
            println!("Video (track {}):", video.index);
            println!("  Orientation: {}", orientation::resolve_track(video));
            println!(
                "  Natural size: {}x{}",
                video.natural_size.width, video.natural_size.height
            );
            println!("  Render size: {}x{}", display.width, display.height);
            println!("  Frame rate: {:.3}", video.nominal_frame_rate);
            println!(
                "  Data rate: {:.0} kbit/s",
                video.estimated_data_rate / 1000.0
            );
        }
        None => println!("Video: none (mutate will fail)"),
    }

    for audio in asset.tracks(TrackKind::Audio) {
        println!(
            "Audio (track {}): {:.0} kbit/s",
            audio.index,
            audio.estimated_data_rate / 1000.0
        );
    }

    Ok(())
}
